mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{FaceDetector, ObjectDetector, PoseDetector};
pub use backends::{Scripted, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::{yolo, TractFaceDetector, TractObjectDetector, TractPoseDetector};
pub use registry::{DetectorSet, FrameDetections};
pub use result::{BoundingBox, FaceResult, Keypoint, Landmark, ObjectDetection, PoseResult};
