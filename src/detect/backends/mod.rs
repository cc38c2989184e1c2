pub mod scripted;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;
#[cfg(feature = "backend-tract")]
pub mod yolo;

pub use scripted::Scripted;
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::{TractFaceDetector, TractObjectDetector, TractPoseDetector};
