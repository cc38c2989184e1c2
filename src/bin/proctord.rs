//! proctord - exam proctoring monitor daemon
//!
//! This daemon:
//! 1. Opens the configured camera (or a directory of recorded frames)
//! 2. Runs pose, face and object detection on every processed frame
//! 3. Debounces and counts violations, saving screenshots for severe ones
//! 4. Writes violation and end-of-exam events as JSON lines, and POSTs them to
//!    the exam platform when event urls are configured (sink-http)
//! 5. Exits when the exam is terminated, on Ctrl-C, or after --max-seconds

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use exam_proctor::config::{ModelPaths, ProctorConfig};
use exam_proctor::{
    CameraSource, DetectorSet, EventSink, FanoutSink, FileConfig, FileSource, FrameSource,
    JsonlSink, SessionController,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Exam taker id.
    #[arg(long)]
    user_id: u64,
    /// Exam id.
    #[arg(long)]
    exam_id: u64,
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "PROCTOR_CONFIG")]
    config: Option<PathBuf>,
    /// Camera device, overrides the config (e.g. /dev/video1 or stub://webcam).
    #[arg(long)]
    camera: Option<String>,
    /// Replay a directory of still images instead of a camera.
    #[arg(long, conflicts_with = "camera")]
    images: Option<PathBuf>,
    /// Loop the --images directory.
    #[arg(long, requires = "images")]
    loop_images: bool,
    /// JSON-lines event log, overrides the config. Defaults to stdout.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Stop monitoring after this many seconds.
    #[arg(long)]
    max_seconds: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = ProctorConfig::load_from(args.config.as_deref())?;
    if let Some(device) = &args.camera {
        cfg.camera.device = device.clone();
    }
    if let Some(path) = &args.events {
        cfg.events_path = Some(path.clone());
    }

    let sink = build_sink(&cfg)?;

    let detectors = build_detectors(&cfg.models, cfg.classifier.min_object_confidence)?;
    let [pose, face, object] = detectors.names()?;
    log::info!("detectors: pose={} face={} object={}", pose, face, object);

    let mut controller = match &args.images {
        Some(dir) => {
            let file_cfg = FileConfig {
                dir: dir.clone(),
                looping: args.loop_images,
            };
            SessionController::new(
                cfg.monitor_settings(),
                detectors,
                move || -> Result<Box<dyn FrameSource>> {
                    Ok(Box::new(FileSource::new(file_cfg.clone())?))
                },
                sink,
            )
        }
        None => {
            let camera = cfg.camera_config();
            SessionController::new(
                cfg.monitor_settings(),
                detectors,
                move || -> Result<Box<dyn FrameSource>> {
                    Ok(Box::new(CameraSource::new(camera.clone())?))
                },
                sink,
            )
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_handler.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    controller
        .start(args.user_id, args.exam_id)
        .context("failed to start monitoring")?;
    log::info!(
        "proctord running for user {} exam {} (max {} violations)",
        args.user_id,
        args.exam_id,
        cfg.max_violations
    );

    let started = Instant::now();
    let mut last_health_log = Instant::now();
    while controller.is_running() {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("shutdown signal received, stopping monitor...");
            break;
        }
        if let Some(limit) = args.max_seconds {
            if started.elapsed() >= Duration::from_secs(limit) {
                log::info!("time limit of {}s reached, stopping monitor...", limit);
                break;
            }
        }
        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let status = controller.status();
            log::info!(
                "monitor state={:?} frames={} violations={}/{}",
                status.state,
                status.frames_processed,
                status.violation_count,
                status.max_violations
            );
            last_health_log = Instant::now();
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    match controller.stop() {
        Some(report) => log::info!(
            "session finished: status={:?} outcome={:?} violations={} frames={} (captured={}, read failures={})",
            report.status,
            report.outcome,
            report.violation_count,
            report.frames_processed,
            report.source.frames_captured,
            report.source.read_failures
        ),
        None => log::warn!("monitoring thread exited without a report"),
    }
    Ok(())
}

/// JSON lines to a file or stdout, plus the exam platform when configured.
fn build_sink(cfg: &ProctorConfig) -> Result<Arc<dyn EventSink>> {
    let jsonl: Arc<dyn EventSink> = match &cfg.events_path {
        Some(path) => {
            log::info!("writing events to {}", path.display());
            Arc::new(JsonlSink::create(path)?)
        }
        None => Arc::new(JsonlSink::stdout()),
    };
    let fanout = FanoutSink::new().with(jsonl);

    #[cfg(feature = "sink-http")]
    let fanout = match &cfg.http_events {
        Some(target) => {
            log::info!(
                "posting events to {} (end of exam: {})",
                target.violation_url,
                target.end_exam_url
            );
            fanout.with(Arc::new(exam_proctor::HttpSink::new(
                target.violation_url.clone(),
                target.end_exam_url.clone(),
                target.timeout,
            )))
        }
        None => fanout,
    };
    #[cfg(not(feature = "sink-http"))]
    {
        if cfg.http_events.is_some() {
            log::warn!("event urls configured but built without sink-http; ignoring them");
        }
    }

    Ok(Arc::new(fanout))
}

#[cfg(feature = "backend-tract")]
fn build_detectors(models: &ModelPaths, min_object_confidence: f32) -> Result<DetectorSet> {
    use exam_proctor::detect::{TractFaceDetector, TractObjectDetector, TractPoseDetector};

    match (&models.pose, &models.face, &models.object) {
        (Some(pose), Some(face), Some(object)) => Ok(DetectorSet::new(
            TractPoseDetector::new(pose)?,
            TractFaceDetector::new(face)?,
            TractObjectDetector::new(object)?.with_threshold(min_object_confidence),
        )),
        _ => {
            log::warn!("models.pose, models.face and models.object not all set; using stub detectors");
            Ok(DetectorSet::stub())
        }
    }
}

#[cfg(not(feature = "backend-tract"))]
fn build_detectors(models: &ModelPaths, _min_object_confidence: f32) -> Result<DetectorSet> {
    if models.pose.is_some() || models.face.is_some() || models.object.is_some() {
        log::warn!("model paths configured but built without backend-tract; ignoring them");
    }
    log::warn!("using stub detectors (no real inference)");
    Ok(DetectorSet::stub())
}
