use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use exam_proctor::config::ProctorConfig;
use exam_proctor::CooldownScope;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PROCTOR_CONFIG",
        "PROCTOR_CAMERA",
        "PROCTOR_MAX_VIOLATIONS",
        "PROCTOR_COOLDOWN_SECS",
        "PROCTOR_SCREENSHOT_DIR",
        "PROCTOR_EVENTS_PATH",
        "PROCTOR_FRAME_INTERVAL_MS",
        "PROCTOR_FORBIDDEN_LABELS",
        "PROCTOR_VIOLATION_URL",
        "PROCTOR_END_EXAM_URL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ProctorConfig::load().expect("load defaults");
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!(cfg.camera.target_fps, 10);
    assert_eq!(cfg.max_violations, 3);
    assert_eq!(cfg.cooldown, Duration::from_secs(3));
    assert_eq!(cfg.cooldown_scope, CooldownScope::Global);
    assert_eq!(cfg.frame_interval, Duration::from_millis(100));
    assert_eq!(cfg.jpeg_quality, 90);
    assert_eq!(cfg.screenshot_dir.to_str(), Some("static/screenshots"));
    assert_eq!(
        cfg.classifier.forbidden_labels,
        vec!["cell phone", "book", "laptop"]
    );
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera": {
            "device": "/dev/video2",
            "target_fps": 5,
            "width": 1280,
            "height": 720
        },
        "policy": {
            "max_violations": 5,
            "cooldown_secs": 1.5,
            "cooldown_scope": "per_kind"
        },
        "classifier": {
            "head_margin_ratio": 0.2,
            "forbidden_labels": ["cell phone", "Headphones"]
        },
        "screenshots": {
            "dir": "/var/lib/proctor/shots",
            "jpeg_quality": 75
        },
        "loop": {
            "frame_interval_ms": 250
        },
        "events": {
            "path": "/var/log/proctor/events.jsonl",
            "violation_url": "http://exam.local/api/violation",
            "http_timeout_ms": 1500
        },
        "models": {
            "pose": "models/yolov8n-pose.onnx"
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("PROCTOR_CONFIG", file.path());
    std::env::set_var("PROCTOR_CAMERA", "stub://webcam");
    std::env::set_var("PROCTOR_MAX_VIOLATIONS", "4");
    std::env::set_var("PROCTOR_END_EXAM_URL", "http://exam.local/api/end_exam");

    let cfg = ProctorConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "stub://webcam");
    assert_eq!(cfg.camera.target_fps, 5);
    assert_eq!(cfg.camera.width, 1280);
    assert_eq!(cfg.camera.height, 720);
    assert_eq!(cfg.max_violations, 4);
    assert_eq!(cfg.cooldown, Duration::from_millis(1500));
    assert_eq!(cfg.cooldown_scope, CooldownScope::PerKind);
    assert!((cfg.classifier.head_margin_ratio - 0.2).abs() < f32::EPSILON);
    assert!((cfg.classifier.min_shoulder_visibility - 0.5).abs() < f32::EPSILON);
    assert_eq!(
        cfg.classifier.forbidden_labels,
        vec!["cell phone", "headphones"]
    );
    assert_eq!(cfg.jpeg_quality, 75);
    assert_eq!(cfg.frame_interval, Duration::from_millis(250));
    assert_eq!(
        cfg.events_path.as_deref().and_then(|p| p.to_str()),
        Some("/var/log/proctor/events.jsonl")
    );
    let http = cfg.http_events.as_ref().expect("http events");
    assert_eq!(http.violation_url, "http://exam.local/api/violation");
    assert_eq!(http.end_exam_url, "http://exam.local/api/end_exam");
    assert_eq!(http.timeout, Duration::from_millis(1500));
    assert!(cfg.models.pose.is_some());
    assert!(!cfg.models.is_complete());

    let settings = cfg.monitor_settings();
    assert_eq!(settings.max_violations, 4);
    assert_eq!(settings.policy.scope, CooldownScope::PerKind);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[camera]
device = "stub://front"

[policy]
max_violations = 2
cooldown_secs = 0.0

[screenshots]
dir = "shots"
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = ProctorConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.camera.device, "stub://front");
    assert_eq!(cfg.max_violations, 2);
    assert_eq!(cfg.cooldown, Duration::ZERO);
    assert_eq!(cfg.screenshot_dir.to_str(), Some("shots"));
}

#[test]
fn env_overrides_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PROCTOR_COOLDOWN_SECS", "0.5");
    std::env::set_var("PROCTOR_SCREENSHOT_DIR", "/tmp/shots");
    std::env::set_var("PROCTOR_EVENTS_PATH", "/tmp/events.jsonl");
    std::env::set_var("PROCTOR_FRAME_INTERVAL_MS", "20");
    std::env::set_var("PROCTOR_FORBIDDEN_LABELS", "book, remote");

    let cfg = ProctorConfig::load().expect("load config");
    assert_eq!(cfg.cooldown, Duration::from_millis(500));
    assert_eq!(cfg.screenshot_dir.to_str(), Some("/tmp/shots"));
    assert!(cfg.events_path.is_some());
    assert_eq!(cfg.frame_interval, Duration::from_millis(20));
    assert_eq!(cfg.classifier.forbidden_labels, vec!["book", "remote"]);
    assert!(cfg.http_events.is_none());

    std::env::set_var("PROCTOR_VIOLATION_URL", "https://exam.example/api/violation");
    let cfg = ProctorConfig::load().expect("load config");
    let http = cfg.http_events.expect("http events");
    assert_eq!(http.end_exam_url, "https://exam.example/api/violation");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PROCTOR_MAX_VIOLATIONS", "0");
    assert!(ProctorConfig::load().is_err());
    clear_env();

    std::env::set_var("PROCTOR_MAX_VIOLATIONS", "three");
    assert!(ProctorConfig::load().is_err());
    clear_env();

    std::env::set_var("PROCTOR_COOLDOWN_SECS", "-2");
    assert!(ProctorConfig::load().is_err());
    clear_env();

    std::env::set_var("PROCTOR_END_EXAM_URL", "http://exam.local/api/end_exam");
    assert!(ProctorConfig::load().is_err());
    clear_env();

    std::env::set_var("PROCTOR_VIOLATION_URL", "exam.local/api/violation");
    assert!(ProctorConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"classifier": {"min_shoulder_visibility": 1.5}}"#)
        .expect("write config");
    std::env::set_var("PROCTOR_CONFIG", file.path());
    assert!(ProctorConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"unknown_section": {}}"#)
        .expect("write config");
    std::env::set_var("PROCTOR_CONFIG", file.path());
    assert!(ProctorConfig::load().is_err());
    clear_env();
}
