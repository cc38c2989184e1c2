use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};

use crate::detect::result::{FaceResult, ObjectDetection, PoseResult};
use crate::frame::Frame;

use super::backend::{FaceDetector, ObjectDetector, PoseDetector};
use super::backends::StubBackend;

/// The three detector backends a monitoring session runs on every frame.
///
/// Backends are wrapped in `Mutex` because `detect` takes `&mut self`, and in
/// `Arc` so one set can be shared between the controller and its worker thread
/// and reused across consecutive sessions.
#[derive(Clone)]
pub struct DetectorSet {
    pose: Arc<Mutex<dyn PoseDetector>>,
    face: Arc<Mutex<dyn FaceDetector>>,
    object: Arc<Mutex<dyn ObjectDetector>>,
}

/// Per-frame output of all three backends. A failed backend only affects its
/// own field.
#[derive(Debug)]
pub struct FrameDetections {
    pub pose: Result<Option<PoseResult>>,
    pub face: Result<FaceResult>,
    pub objects: Result<Vec<ObjectDetection>>,
}

impl DetectorSet {
    pub fn new<P, F, O>(pose: P, face: F, object: O) -> Self
    where
        P: PoseDetector + 'static,
        F: FaceDetector + 'static,
        O: ObjectDetector + 'static,
    {
        Self {
            pose: Arc::new(Mutex::new(pose)),
            face: Arc::new(Mutex::new(face)),
            object: Arc::new(Mutex::new(object)),
        }
    }

    /// Backends that always report a compliant test-taker.
    pub fn stub() -> Self {
        Self::new(StubBackend::new(), StubBackend::new(), StubBackend::new())
    }

    /// Backend identifiers as (pose, face, object).
    pub fn names(&self) -> Result<[&'static str; 3]> {
        Ok([
            relock(&self.pose).name(),
            relock(&self.face).name(),
            relock(&self.object).name(),
        ])
    }

    pub fn warm_up(&self) -> Result<()> {
        relock(&self.pose).warm_up()?;
        relock(&self.face).warm_up()?;
        relock(&self.object).warm_up()?;
        Ok(())
    }

    pub fn detect_pose(&self, frame: &Frame) -> Result<Option<PoseResult>> {
        relock(&self.pose).detect(frame)
    }

    pub fn detect_faces(&self, frame: &Frame) -> Result<FaceResult> {
        relock(&self.face).detect(frame)
    }

    pub fn detect_objects(&self, frame: &Frame) -> Result<Vec<ObjectDetection>> {
        relock(&self.object).detect(frame)
    }

    /// Run all three backends on one frame concurrently.
    ///
    /// A panicking backend is reported as an error for that backend only.
    pub fn run(&self, frame: &Frame) -> FrameDetections {
        std::thread::scope(|scope| {
            let pose = scope.spawn(|| self.detect_pose(frame));
            let face = scope.spawn(|| self.detect_faces(frame));
            let objects = scope.spawn(|| self.detect_objects(frame));
            FrameDetections {
                pose: pose
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("pose detector panicked"))),
                face: face
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("face detector panicked"))),
                objects: objects
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("object detector panicked"))),
            }
        })
    }
}

/// Lock a backend, taking it back if an earlier call panicked while holding it.
///
/// A panic only fails the frame it happened on; the backend is tried again on
/// the next frame and in later sessions.
fn relock<T: ?Sized>(backend: &Mutex<T>) -> MutexGuard<'_, T> {
    let guard = backend.lock().unwrap_or_else(PoisonError::into_inner);
    backend.clear_poison();
    guard
}

impl Default for DetectorSet {
    fn default() -> Self {
        Self::stub()
    }
}
