//! Scripted frame source.
//!
//! `ReplaySource` yields a fixed script of frames. A `None` entry in the script
//! is a transient read failure. It can also be configured to refuse the
//! connection, which is how an unavailable camera looks to the controller.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

pub struct ReplaySource {
    name: String,
    script: Vec<Option<Frame>>,
    cursor: usize,
    looping: bool,
    refuse_connect: bool,
    connected: bool,
    open: bool,
    frames_captured: u64,
    read_failures: u64,
    releases: Arc<AtomicUsize>,
}

impl ReplaySource {
    pub fn new(name: impl Into<String>, script: Vec<Option<Frame>>) -> Self {
        Self {
            name: name.into(),
            script,
            cursor: 0,
            looping: false,
            refuse_connect: false,
            connected: false,
            open: false,
            frames_captured: 0,
            read_failures: 0,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Repeat the script forever instead of closing after the last entry.
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Make `connect` fail, as a missing or busy camera would.
    pub fn unavailable(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    /// Counts how many times a connected device was actually released.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        self.releases.clone()
    }
}

impl FrameSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<()> {
        if self.refuse_connect {
            return Err(anyhow!("device {} busy or missing", self.name));
        }
        if self.script.is_empty() {
            return Err(anyhow!("replay script for {} is empty", self.name));
        }
        self.connected = true;
        self.open = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Err(anyhow!("replay source {} is not open", self.name));
        }
        let entry = self.script.get(self.cursor).cloned().flatten();
        self.cursor += 1;
        if self.cursor >= self.script.len() {
            if self.looping {
                self.cursor = 0;
            } else {
                self.open = false;
            }
        }
        match entry {
            Some(frame) => {
                self.frames_captured += 1;
                Ok(Some(frame))
            }
            None => {
                self.read_failures += 1;
                Err(anyhow!("transient read failure on {}", self.name))
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn release(&mut self) {
        // Exhausted sources are closed but still hold the device until released.
        if std::mem::take(&mut self.connected) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        self.open = false;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            read_failures: self.read_failures,
            source: self.name.clone(),
        }
    }
}
