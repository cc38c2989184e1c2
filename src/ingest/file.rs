//! Local image-sequence frame source.
//!
//! This module provides `FileSource` for replaying a recorded attempt stored as a
//! directory of still images (JPEG or PNG). Files are read in lexical order,
//! decoded in-memory and converted to RGB.
//!
//! The file source MUST NOT fetch remote URLs. When the last image has been
//! produced the source closes, which ends the monitoring loop.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Configuration for an image-sequence source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local directory (e.g., "recordings/attempt-42").
    pub dir: PathBuf,
    /// Start over after the last image instead of closing.
    pub looping: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            looping: false,
        }
    }
}

/// Image-sequence frame source.
pub struct FileSource {
    config: FileConfig,
    name: String,
    files: Vec<PathBuf>,
    cursor: usize,
    open: bool,
    frame_count: u64,
    read_failures: u64,
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        let name = config.dir.display().to_string();
        if name.contains("://") {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        Ok(Self {
            config,
            name,
            files: Vec::new(),
            cursor: 0,
            open: false,
            frame_count: 0,
            read_failures: 0,
        })
    }

    fn decode(&self, path: &Path) -> Result<Frame> {
        let image = image::open(path)
            .with_context(|| format!("decode {}", path.display()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        Frame::with_sequence(image.into_raw(), width, height, self.frame_count)
    }
}

impl FrameSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.config.dir)
            .with_context(|| format!("read image directory {}", self.config.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!(
                "no images found in {}",
                self.config.dir.display()
            ));
        }
        files.sort();
        log::info!("FileSource: connected to {} ({} images)", self.name, files.len());
        self.files = files;
        self.cursor = 0;
        self.open = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Err(anyhow!("file source {} is not open", self.name));
        }
        let Some(path) = self.files.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        if self.cursor >= self.files.len() {
            if self.config.looping {
                self.cursor = 0;
            } else {
                self.open = false;
            }
        }
        self.frame_count += 1;
        match self.decode(&path) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                self.read_failures += 1;
                Err(err)
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn release(&mut self) {
        if self.open {
            log::info!("FileSource: released {}", self.name);
        }
        self.open = false;
        self.files.clear();
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            read_failures: self.read_failures,
            source: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, name: &str, rgb: [u8; 3]) {
        let image = image::RgbImage::from_pixel(4, 3, image::Rgb(rgb));
        image.save(dir.join(name)).expect("write png");
    }

    #[test]
    fn replays_images_in_order_then_closes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_png(dir.path(), "002.png", [0, 255, 0]);
        write_png(dir.path(), "001.png", [255, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let mut source = FileSource::new(FileConfig {
            dir: dir.path().to_path_buf(),
            looping: false,
        })?;
        source.connect()?;

        let first = source.next_frame()?.expect("first frame");
        assert_eq!((first.width(), first.height()), (4, 3));
        assert_eq!(&first.pixels()[..3], &[255, 0, 0]);
        assert!(source.is_open());

        let second = source.next_frame()?.expect("second frame");
        assert_eq!(&second.pixels()[..3], &[0, 255, 0]);
        assert!(!source.is_open());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn looping_source_stays_open() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_png(dir.path(), "only.png", [9, 9, 9]);
        let mut source = FileSource::new(FileConfig {
            dir: dir.path().to_path_buf(),
            looping: true,
        })?;
        source.connect()?;
        for _ in 0..3 {
            assert!(source.next_frame()?.is_some());
        }
        assert!(source.is_open());
        Ok(())
    }

    #[test]
    fn empty_directory_cannot_connect() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = FileSource::new(FileConfig {
            dir: dir.path().to_path_buf(),
            looping: false,
        })?;
        assert!(source.connect().is_err());
        Ok(())
    }

    #[test]
    fn url_paths_are_rejected() {
        let config = FileConfig {
            dir: PathBuf::from("http://example.com/frames"),
            looping: false,
        };
        assert!(FileSource::new(config).is_err());
    }
}
