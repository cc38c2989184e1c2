use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::ClassifierSettings;
use crate::engine::{CooldownScope, EnginePolicy, DEFAULT_MAX_VIOLATIONS};
use crate::ingest::camera::CameraConfig;
use crate::screenshot::{DEFAULT_JPEG_QUALITY, DEFAULT_SCREENSHOT_DIR};
use crate::session::MonitorSettings;

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_COOLDOWN_SECS: f64 = 3.0;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 100;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ProctorConfigFile {
    camera: Option<CameraConfigFile>,
    policy: Option<PolicyConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    screenshots: Option<ScreenshotConfigFile>,
    #[serde(rename = "loop")]
    processing: Option<LoopConfigFile>,
    events: Option<EventsConfigFile>,
    models: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyConfigFile {
    max_violations: Option<u32>,
    cooldown_secs: Option<f64>,
    cooldown_scope: Option<CooldownScope>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    min_shoulder_visibility: Option<f32>,
    head_margin_ratio: Option<f32>,
    min_object_confidence: Option<f32>,
    forbidden_labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ScreenshotConfigFile {
    dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct LoopConfigFile {
    frame_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EventsConfigFile {
    path: Option<PathBuf>,
    violation_url: Option<String>,
    end_exam_url: Option<String>,
    http_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    pose: Option<PathBuf>,
    face: Option<PathBuf>,
    object: Option<PathBuf>,
}

/// Resolved monitor configuration.
#[derive(Debug, Clone)]
pub struct ProctorConfig {
    pub camera: CameraConfig,
    pub max_violations: u32,
    pub cooldown: Duration,
    pub cooldown_scope: CooldownScope,
    pub classifier: ClassifierSettings,
    pub screenshot_dir: PathBuf,
    pub jpeg_quality: u8,
    pub frame_interval: Duration,
    /// JSON-lines event log; `None` writes events to stdout.
    pub events_path: Option<PathBuf>,
    /// Exam platform endpoints; events are POSTed there as well when set.
    pub http_events: Option<HttpEventTarget>,
    pub models: ModelPaths,
}

/// Where the HTTP sink delivers events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEventTarget {
    pub violation_url: String,
    /// Falls back to `violation_url` when not configured.
    pub end_exam_url: String,
    pub timeout: Duration,
}

/// ONNX model files for the detector backends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelPaths {
    pub pose: Option<PathBuf>,
    pub face: Option<PathBuf>,
    pub object: Option<PathBuf>,
}

impl ModelPaths {
    pub fn is_complete(&self) -> bool {
        self.pose.is_some() && self.face.is_some() && self.object.is_some()
    }
}

impl ProctorConfig {
    /// File named by `PROCTOR_CONFIG` (if set), then `PROCTOR_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PROCTOR_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ProctorConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };

        let policy = file.policy.unwrap_or_default();
        let cooldown = Duration::try_from_secs_f64(
            policy.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
        )
        .map_err(|_| anyhow!("cooldown_secs must be finite and >= 0"))?;

        let defaults = ClassifierSettings::default();
        let classifier = match file.classifier {
            Some(c) => ClassifierSettings {
                min_shoulder_visibility: c
                    .min_shoulder_visibility
                    .unwrap_or(defaults.min_shoulder_visibility),
                head_margin_ratio: c.head_margin_ratio.unwrap_or(defaults.head_margin_ratio),
                min_object_confidence: c
                    .min_object_confidence
                    .unwrap_or(defaults.min_object_confidence),
                forbidden_labels: c.forbidden_labels.unwrap_or(defaults.forbidden_labels),
            },
            None => defaults,
        };

        let screenshots = file.screenshots.unwrap_or_default();
        let models = file.models.unwrap_or_default();
        let events = file.events.unwrap_or_default();
        let http_timeout =
            Duration::from_millis(events.http_timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS));
        let http_events = match (events.violation_url, events.end_exam_url) {
            (Some(violation_url), end_exam_url) => Some(HttpEventTarget {
                end_exam_url: end_exam_url.unwrap_or_else(|| violation_url.clone()),
                violation_url,
                timeout: http_timeout,
            }),
            (None, Some(_)) => {
                return Err(anyhow!("events.end_exam_url requires events.violation_url"))
            }
            (None, None) => None,
        };

        Ok(Self {
            camera,
            max_violations: policy.max_violations.unwrap_or(DEFAULT_MAX_VIOLATIONS),
            cooldown,
            cooldown_scope: policy.cooldown_scope.unwrap_or_default(),
            classifier,
            screenshot_dir: screenshots
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_DIR)),
            jpeg_quality: screenshots.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            frame_interval: Duration::from_millis(
                file.processing
                    .and_then(|p| p.frame_interval_ms)
                    .unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
            ),
            events_path: events.path,
            http_events,
            models: ModelPaths {
                pose: models.pose,
                face: models.face,
                object: models.object,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("PROCTOR_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(max) = std::env::var("PROCTOR_MAX_VIOLATIONS") {
            self.max_violations = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("PROCTOR_MAX_VIOLATIONS must be a positive integer"))?;
        }
        if let Ok(cooldown) = std::env::var("PROCTOR_COOLDOWN_SECS") {
            let secs: f64 = cooldown
                .trim()
                .parse()
                .map_err(|_| anyhow!("PROCTOR_COOLDOWN_SECS must be a number of seconds"))?;
            self.cooldown = Duration::try_from_secs_f64(secs)
                .map_err(|_| anyhow!("PROCTOR_COOLDOWN_SECS must be finite and >= 0"))?;
        }
        if let Ok(dir) = std::env::var("PROCTOR_SCREENSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.screenshot_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("PROCTOR_EVENTS_PATH") {
            if !path.trim().is_empty() {
                self.events_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(url) = std::env::var("PROCTOR_VIOLATION_URL") {
            if !url.trim().is_empty() {
                match &mut self.http_events {
                    Some(target) => target.violation_url = url,
                    None => {
                        self.http_events = Some(HttpEventTarget {
                            end_exam_url: url.clone(),
                            violation_url: url,
                            timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
                        })
                    }
                }
            }
        }
        if let Ok(url) = std::env::var("PROCTOR_END_EXAM_URL") {
            if !url.trim().is_empty() {
                match &mut self.http_events {
                    Some(target) => target.end_exam_url = url,
                    None => {
                        return Err(anyhow!(
                            "PROCTOR_END_EXAM_URL requires a violation url (PROCTOR_VIOLATION_URL)"
                        ))
                    }
                }
            }
        }
        if let Ok(interval) = std::env::var("PROCTOR_FRAME_INTERVAL_MS") {
            let ms: u64 = interval
                .trim()
                .parse()
                .map_err(|_| anyhow!("PROCTOR_FRAME_INTERVAL_MS must be an integer"))?;
            self.frame_interval = Duration::from_millis(ms);
        }
        if let Ok(labels) = std::env::var("PROCTOR_FORBIDDEN_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.classifier.forbidden_labels = parsed;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.target_fps == 0 || self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera fps, width and height must be greater than zero"));
        }
        if self.max_violations == 0 {
            return Err(anyhow!("max_violations must be at least 1"));
        }
        let ratio = self.classifier.head_margin_ratio;
        if !(0.0..0.5).contains(&ratio) {
            return Err(anyhow!("head_margin_ratio must be in [0, 0.5), got {}", ratio));
        }
        for (name, value) in [
            (
                "min_shoulder_visibility",
                self.classifier.min_shoulder_visibility,
            ),
            ("min_object_confidence", self.classifier.min_object_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be in [0, 1], got {}", name, value));
            }
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be in 1..=100"));
        }
        if let Some(target) = &self.http_events {
            for url in [&target.violation_url, &target.end_exam_url] {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(anyhow!("event url must be http(s), got {}", url));
                }
            }
            if target.timeout.is_zero() {
                return Err(anyhow!("events.http_timeout_ms must be greater than zero"));
            }
        }

        let labels: Vec<String> = self
            .classifier
            .forbidden_labels
            .iter()
            .map(|label| label.trim().to_lowercase())
            .filter(|label| !label.is_empty())
            .collect();
        if labels.is_empty() {
            log::warn!("no forbidden object labels configured; object checks are disabled");
        }
        self.classifier.forbidden_labels = labels;
        Ok(())
    }

    pub fn camera_config(&self) -> CameraConfig {
        self.camera.clone()
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            max_violations: self.max_violations,
            policy: EnginePolicy {
                cooldown: self.cooldown,
                scope: self.cooldown_scope,
            },
            frame_interval: self.frame_interval,
            classifier: self.classifier.clone(),
            screenshot_dir: self.screenshot_dir.clone(),
            jpeg_quality: self.jpeg_quality,
        }
    }
}

/// `.toml` files are parsed as TOML, anything else as JSON.
fn read_config_file(path: &Path) -> Result<ProctorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
