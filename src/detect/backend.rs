use anyhow::Result;

use crate::detect::result::{FaceResult, ObjectDetection, PoseResult};
use crate::frame::Frame;

/// Pose estimation backend.
///
/// Backends are black boxes: they read one frame and return a structured result.
/// They must not keep the frame beyond the call.
pub trait PoseDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// `Ok(None)` when no person is visible.
    fn detect(&mut self, frame: &Frame) -> Result<Option<PoseResult>>;

    /// Optional warm-up hook, run once when monitoring starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Face counting backend.
pub trait FaceDetector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame) -> Result<FaceResult>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Object detection backend.
///
/// Implementations apply their own confidence threshold before returning.
pub trait ObjectDetector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<ObjectDetection>>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
