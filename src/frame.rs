//! Frames and the live-preview cell.
//!
//! - `Frame`: Immutable RGB8 image buffer with capture metadata. Cloning is cheap
//!   (pixels are reference counted), so the detection path, the preview cell and
//!   screenshot capture can all hold the same frame.
//! - `PreviewSlot`: Single-slot "latest frame" cell. Publishing overwrites the
//!   previous frame and never blocks the processing loop.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, TryLockError};

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Immutable frame. Pixels are packed RGB, row-major, 3 bytes per pixel.
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    captured_at: DateTime<Utc>,
    sequence: u64,
}

impl Frame {
    /// Wrap an RGB8 buffer. The buffer length must be `width * height * 3`.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::with_sequence(pixels, width, height, 0)
    }

    pub fn with_sequence(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            captured_at: Utc::now(),
            sequence,
        })
    }

    /// Uniformly coloured frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(rgb_len(width, height)?)
            .collect();
        Self::new(pixels, width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Per-source capture counter (0 when the frame was not produced by a source).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .finish_non_exhaustive()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// PreviewSlot
// ----------------------------------------------------------------------------

/// Latest-frame cell for live preview consumers.
///
/// There is no delivery guarantee: a frame published while a reader holds the
/// slot is dropped, and every publish replaces whatever was there.
#[derive(Default)]
pub struct PreviewSlot {
    slot: Mutex<Option<Frame>>,
}

impl PreviewSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot. Never blocks.
    pub fn publish(&self, frame: Frame) -> bool {
        match self.slot.try_lock() {
            Ok(mut guard) => {
                *guard = Some(frame);
                true
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                *poisoned.into_inner() = Some(frame);
                true
            }
            Err(TryLockError::WouldBlock) => false,
        }
    }

    /// Most recent frame, if any. Never blocks; returns `None` under contention.
    pub fn latest(&self) -> Option<Frame> {
        match self.slot.try_lock() {
            Ok(guard) => guard.clone(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().clone(),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn clear(&self) {
        match self.slot.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
