use anyhow::Result;

use crate::detect::backend::{FaceDetector, ObjectDetector, PoseDetector};
use crate::detect::result::{FaceResult, Keypoint, Landmark, ObjectDetection, PoseResult};
use crate::frame::Frame;

/// Stub backend for development. Always sees one test-taker sitting upright in
/// the middle of the frame with nothing else on the desk.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn compliant_pose() -> PoseResult {
        PoseResult::new()
            .with(Landmark::Nose, Keypoint::new(0.5, 0.35, 0.99))
            .with(Landmark::LeftShoulder, Keypoint::new(0.65, 0.7, 0.95))
            .with(Landmark::RightShoulder, Keypoint::new(0.35, 0.7, 0.95))
    }
}

impl PoseDetector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Option<PoseResult>> {
        Ok(Some(Self::compliant_pose()))
    }
}

impl FaceDetector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<FaceResult> {
        Ok(FaceResult::new(1))
    }
}

impl ObjectDetector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<ObjectDetection>> {
        Ok(Vec::new())
    }
}
