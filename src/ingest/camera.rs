//! Camera frame source.
//!
//! This module provides `CameraSource`, the webcam watched during an exam.
//!
//! The camera source is responsible for:
//! - Opening a local device node (e.g., /dev/video0) when the session starts
//! - Capturing frames in-memory and converting them to RGB
//! - Releasing the device when the session stops
//!
//! Device capture uses libv4l (feature: ingest-v4l2). `stub://` devices produce
//! synthetic frames and are always available.

#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
use anyhow::Result;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;
#[cfg(feature = "ingest-v4l2")]
use std::time::Instant;

#[cfg(feature = "ingest-v4l2")]
use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or "stub://<name>".
    pub device: String,
    /// Requested capture rate (frames per second).
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Camera frame source.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.device.trim().is_empty() {
            anyhow::bail!("camera device must not be empty");
        }
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCamera::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            anyhow::bail!(
                "camera {} requires the ingest-v4l2 feature",
                config.device
            )
        }
    }
}

impl FrameSource for CameraSource {
    fn name(&self) -> &str {
        match &self.backend {
            CameraBackend::Synthetic(camera) => &camera.config.device,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => &camera.config.device,
        }
    }

    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.next_frame().map(Some),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.next_frame().map(Some),
        }
    }

    fn is_open(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.connected,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.state.is_some(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.release(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.release(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            CameraBackend::Synthetic(camera) => SourceStats {
                frames_captured: camera.frame_count,
                read_failures: 0,
                source: camera.config.device.clone(),
            },
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => SourceStats {
                frames_captured: camera.frame_count,
                read_failures: camera.read_failures,
                source: camera.config.device.clone(),
            },
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for development and tests
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
    connected: bool,
    frame_count: u64,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("CameraSource: connected to {} (synthetic)", self.config.device);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            anyhow::bail!("camera {} is not connected", self.config.device);
        }
        self.frame_count += 1;
        Frame::with_sequence(
            self.generate_synthetic_pixels(),
            self.config.width,
            self.config.height,
            self.frame_count,
        )
    }

    /// Slowly drifting gradient so consecutive frames differ.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        (0..pixel_count)
            .map(|i| ((i as u64 / 3 + self.frame_count) % 256) as u8)
            .collect()
    }

    fn release(&mut self) {
        if self.connected {
            self.connected = false;
            log::info!("CameraSource: released {} (synthetic)", self.config.device);
        }
    }
}

// ----------------------------------------------------------------------------
// Production camera using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceCameraState>,
    pixel_format: PixelFormat,
    frame_count: u64,
    read_failures: u64,
    last_frame_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceCameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            pixel_format: PixelFormat::Rgb24,
            frame_count: 0,
            read_failures: 0,
            last_frame_at: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: RGB3 rejected by {} ({}), trying YUYV",
                    self.config.device,
                    err
                );
                format.fourcc = v4l::FourCC::new(b"YUYV");
                device
                    .set_format(&format)
                    .context("set v4l2 YUYV format")?
            }
        };

        self.pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).with_context(|| {
            format!(
                "unsupported pixel format {} on {}",
                format.fourcc, self.config.device
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceCameraStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "CameraSource: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
        });
        let raw = match captured {
            Ok(raw) => raw,
            Err(err) => {
                self.read_failures += 1;
                return Err(anyhow::Error::new(err).context("capture v4l2 frame"));
            }
        };

        let rgb = normalize_to_rgb(
            &raw,
            self.active_width,
            self.active_height,
            self.pixel_format,
        )?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::with_sequence(rgb, self.active_width, self.active_height, self.frame_count)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "CameraSource: released {} after {} frames (last frame {:?} ago)",
                self.config.device,
                self.frame_count,
                self.last_frame_at.map(|at| at.elapsed())
            );
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
