//! Frame ingestion sources.
//!
//! This module provides different sources of frames for a monitoring session:
//! - Local camera devices via V4L2 (feature: ingest-v4l2), `stub://` synthetic camera
//! - Directories of still images (replaying a recorded attempt)
//! - Scripted replay (testing, including transient read failures)
//!
//! Sources are owned by the processing loop. The loop pulls frames until the
//! session stops or the source reports it is closed, then releases the source.
//! A failed `next_frame` is a transient condition: the loop skips the tick.

pub mod camera;
pub mod file;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod replay;

use anyhow::Result;

use crate::frame::Frame;

pub use camera::CameraSource;
pub use file::FileSource;
pub use replay::ReplaySource;

/// A supplier of frames for one monitoring session.
pub trait FrameSource: Send {
    /// Device or source identifier, used in logs and errors.
    fn name(&self) -> &str;

    /// Acquire the underlying device. Failure means the device is unavailable.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame.
    ///
    /// `Ok(None)` means no frame was available this tick. Errors are transient
    /// read failures; neither ends the session.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// False once the source is released or exhausted.
    fn is_open(&self) -> bool;

    /// Release the underlying device. Calling it again is a no-op.
    fn release(&mut self);

    fn stats(&self) -> SourceStats;
}

impl FrameSource for Box<dyn FrameSource> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub source: String,
}
