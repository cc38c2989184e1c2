//! Screenshot persistence for severe violations.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::frame::Frame;

pub const DEFAULT_SCREENSHOT_DIR: &str = "static/screenshots";
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Collision suffixes tried before giving up on a name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Persists a frame and returns where it was written.
pub trait ScreenshotStore: Send {
    fn save(&mut self, frame: &Frame, prefix: &str, user_id: u64, at: DateTime<Utc>)
        -> Result<PathBuf>;
}

/// Writes `{prefix}_{user_id}_{unix_secs}.jpg` into one directory.
///
/// Existing files are never overwritten: a second screenshot in the same
/// second gets a `_1`, `_2`, ... suffix.
#[derive(Clone, Debug)]
pub struct JpegScreenshotStore {
    dir: PathBuf,
    quality: u8,
}

impl JpegScreenshotStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the target directory if it does not exist.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create screenshot dir {}", self.dir.display()))
    }

    fn create_unique(&self, stem: &str) -> Result<(PathBuf, File)> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{}.jpg", stem)
            } else {
                format!("{}_{}.jpg", stem, attempt)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("create {}", path.display()));
                }
            }
        }
        Err(anyhow!(
            "no free screenshot name for {} in {}",
            stem,
            self.dir.display()
        ))
    }
}

impl ScreenshotStore for JpegScreenshotStore {
    fn save(
        &mut self,
        frame: &Frame,
        prefix: &str,
        user_id: u64,
        at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let stem = format!("{}_{}_{}", prefix, user_id, at.timestamp());
        let (path, file) = self.create_unique(&stem)?;

        let mut writer = BufWriter::new(file);
        let written = JpegEncoder::new_with_quality(&mut writer, self.quality)
            .write_image(
                frame.pixels(),
                frame.width(),
                frame.height(),
                ExtendedColorType::Rgb8,
            )
            .context("encode jpeg")
            .and_then(|()| writer.flush().context("flush jpeg"));
        if let Err(err) = written {
            // Do not leave a truncated file behind.
            let _ = fs::remove_file(&path);
            return Err(err.context(format!("write screenshot {}", path.display())));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("timestamp")
    }

    #[test]
    fn writes_named_jpeg() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = JpegScreenshotStore::new(dir.path());
        let frame = Frame::filled(16, 8, [200, 10, 10])?;

        let path = store.save(&frame, "objek_cell_phone", 42, at())?;
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("objek_cell_phone_42_1700000000.jpg")
        );
        let decoded = image::open(&path)?.to_rgb8();
        assert_eq!(decoded.dimensions(), (16, 8));
        Ok(())
    }

    #[test]
    fn same_second_does_not_overwrite() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = JpegScreenshotStore::new(dir.path()).with_quality(50);
        let frame = Frame::filled(4, 4, [0, 0, 0])?;

        let first = store.save(&frame, "multiple_faces", 7, at())?;
        let second = store.save(&frame, "multiple_faces", 7, at())?;
        assert_ne!(first, second);
        assert!(second.ends_with("multiple_faces_7_1700000000_1.jpg"));
        assert!(first.exists() && second.exists());
        Ok(())
    }

    #[test]
    fn missing_dir_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = JpegScreenshotStore::new(dir.path().join("nope"));
        let frame = Frame::filled(4, 4, [0, 0, 0])?;
        assert!(store.save(&frame, "violation", 1, at()).is_err());

        store.ensure_dir()?;
        assert!(store.save(&frame, "violation", 1, at()).is_ok());
        Ok(())
    }
}
