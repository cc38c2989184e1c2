use anyhow::{anyhow, Result};

use crate::detect::backend::{FaceDetector, ObjectDetector, PoseDetector};
use crate::detect::result::{FaceResult, ObjectDetection, PoseResult};
use crate::frame::Frame;

/// Backend that plays back a fixed script of results, one per frame.
///
/// After the last entry the final result keeps repeating. `Err` entries
/// simulate a backend failure for that frame.
#[derive(Clone, Debug)]
pub struct Scripted<T> {
    script: Vec<Result<T, String>>,
    cursor: usize,
}

impl<T: Clone> Scripted<T> {
    pub fn new(script: Vec<Result<T, String>>) -> Self {
        Self { script, cursor: 0 }
    }

    pub fn repeat(value: T) -> Self {
        Self::new(vec![Ok(value)])
    }

    pub fn sequence(values: Vec<T>) -> Self {
        Self::new(values.into_iter().map(Ok).collect())
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(vec![Err(message.into())])
    }

    fn next_result(&mut self) -> Result<T> {
        let last = self
            .script
            .len()
            .checked_sub(1)
            .ok_or_else(|| anyhow!("scripted backend has an empty script"))?;
        let entry = self.script[self.cursor.min(last)].clone();
        self.cursor = self.cursor.saturating_add(1);
        entry.map_err(|message| anyhow!(message))
    }
}

impl PoseDetector for Scripted<Option<PoseResult>> {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Option<PoseResult>> {
        self.next_result()
    }
}

impl FaceDetector for Scripted<FaceResult> {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<FaceResult> {
        self.next_result()
    }
}

impl ObjectDetector for Scripted<Vec<ObjectDetection>> {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<ObjectDetection>> {
        self.next_result()
    }
}
