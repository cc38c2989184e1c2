//! Session controller.
//!
//! `SessionController` drives one monitoring session at a time:
//!
//! ```text
//! Idle --start()--> Running --stop() / threshold / source closed--> Stopped
//!                      ^                                               |
//!                      +-------------------start()--------------------+
//! ```
//!
//! The processing loop runs on its own thread and owns the frame source, the
//! aggregation engine and the `ExamSession`. The controller only shares atomics,
//! the preview slot and a status cell with it, so accessors never wait on
//! detector inference. A stop request is observed at the next loop iteration;
//! in-flight inference is not cancelled.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::classify::{Classifier, ClassifierSettings};
use crate::detect::DetectorSet;
use crate::engine::{AggregationEngine, EnginePolicy, DEFAULT_MAX_VIOLATIONS};
use crate::error::ProctorError;
use crate::frame::{Frame, PreviewSlot};
use crate::ingest::{FrameSource, SourceStats};
use crate::screenshot::{JpegScreenshotStore, DEFAULT_JPEG_QUALITY, DEFAULT_SCREENSHOT_DIR};
use crate::sink::{EventSink, ProctorEvent, TerminationPayload, ViolationPayload};
use crate::{ExamOutcome, ExamSession, SessionStatus};

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Opens a fresh frame source for each session.
pub type SourceOpener = Box<dyn Fn() -> Result<Box<dyn FrameSource>> + Send + Sync>;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Running,
    Stopped,
}

/// Everything a session needs besides the source, detectors and sink.
#[derive(Clone, Debug)]
pub struct MonitorSettings {
    pub max_violations: u32,
    pub policy: EnginePolicy,
    /// Minimum time between processed frames.
    pub frame_interval: Duration,
    pub classifier: ClassifierSettings,
    pub screenshot_dir: PathBuf,
    pub jpeg_quality: u8,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_violations: DEFAULT_MAX_VIOLATIONS,
            policy: EnginePolicy::default(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            classifier: ClassifierSettings::default(),
            screenshot_dir: PathBuf::from(DEFAULT_SCREENSHOT_DIR),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Final numbers of a finished session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    pub user_id: u64,
    pub exam_id: u64,
    pub violation_count: u32,
    pub status: SessionStatus,
    pub outcome: ExamOutcome,
    pub frames_processed: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub source: SourceStats,
}

/// Point-in-time view for status polling.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: ControllerState,
    pub user_id: Option<u64>,
    pub exam_id: Option<u64>,
    pub violation_count: u32,
    pub max_violations: u32,
    pub session_status: Option<SessionStatus>,
    pub frames_processed: u64,
}

/// State shared between the controller and the processing loop.
struct Shared {
    stop_requested: AtomicBool,
    loop_active: AtomicBool,
    violation_count: AtomicU32,
    frames_processed: AtomicU64,
    preview: PreviewSlot,
    status: Mutex<Option<SessionStatus>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            loop_active: AtomicBool::new(false),
            violation_count: AtomicU32::new(0),
            frames_processed: AtomicU64::new(0),
            preview: PreviewSlot::new(),
            status: Mutex::new(None),
        }
    }

    fn set_status(&self, status: SessionStatus) {
        match self.status.lock() {
            Ok(mut guard) => *guard = Some(status),
            Err(poisoned) => *poisoned.into_inner() = Some(status),
        }
    }

    fn status(&self) -> Option<SessionStatus> {
        match self.status.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Cloneable handle that asks the processing loop to stop.
///
/// Safe to use from any thread, e.g. a Ctrl-C handler. The loop exits at its
/// next iteration and releases the source; `SessionController::stop` still
/// has to be called to join it. The handle follows the controller, so one
/// taken before `start` stops the session started afterwards.
#[derive(Clone)]
pub struct StopHandle {
    current: Arc<Mutex<Arc<Shared>>>,
}

impl StopHandle {
    fn session(&self) -> Arc<Shared> {
        match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn request_stop(&self) {
        self.session().stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        !self.session().loop_active.load(Ordering::SeqCst)
    }
}

pub struct SessionController {
    settings: MonitorSettings,
    detectors: DetectorSet,
    opener: SourceOpener,
    sink: Arc<dyn EventSink>,
    shared: Arc<Shared>,
    current: Arc<Mutex<Arc<Shared>>>,
    worker: Option<JoinHandle<SessionReport>>,
    active: Option<(u64, u64)>,
    last_report: Option<SessionReport>,
    state: ControllerState,
}

impl SessionController {
    pub fn new<O>(
        settings: MonitorSettings,
        detectors: DetectorSet,
        opener: O,
        sink: Arc<dyn EventSink>,
    ) -> Self
    where
        O: Fn() -> Result<Box<dyn FrameSource>> + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared::new());
        Self {
            settings,
            detectors,
            opener: Box::new(opener),
            sink,
            current: Arc::new(Mutex::new(shared.clone())),
            shared,
            worker: None,
            active: None,
            last_report: None,
            state: ControllerState::Idle,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Open the camera and start the processing loop.
    ///
    /// Fails with `DeviceUnavailable` when the source cannot be opened or
    /// connected; the controller then stays in its previous state.
    pub fn start(&mut self, user_id: u64, exam_id: u64) -> Result<(), ProctorError> {
        self.reap_finished();
        if self.worker.is_some() {
            let (user_id, exam_id) = self.active.unwrap_or((user_id, exam_id));
            return Err(ProctorError::AlreadyRunning { user_id, exam_id });
        }

        let mut source = (self.opener)().map_err(|err| ProctorError::DeviceUnavailable {
            device: "camera".to_string(),
            reason: format!("{:#}", err),
        })?;
        if let Err(err) = source.connect() {
            let device = source.name().to_string();
            source.release();
            return Err(ProctorError::DeviceUnavailable {
                device,
                reason: format!("{:#}", err),
            });
        }
        log::info!("camera {} connected", source.name());

        if let Err(err) = self.detectors.warm_up() {
            source.release();
            return Err(ProctorError::DetectorInit(format!("{:#}", err)));
        }

        let store = JpegScreenshotStore::new(&self.settings.screenshot_dir)
            .with_quality(self.settings.jpeg_quality);
        if let Err(err) = store.ensure_dir() {
            log::warn!("screenshots may fail to save: {:#}", err);
        }

        let shared = Arc::new(Shared::new());
        shared.set_status(SessionStatus::Running);
        shared.loop_active.store(true, Ordering::SeqCst);

        let worker = Worker {
            source,
            detectors: self.detectors.clone(),
            classifier: Classifier::new(self.settings.classifier.clone()),
            engine: AggregationEngine::new(self.settings.policy, Box::new(store)),
            session: ExamSession::new(user_id, exam_id, self.settings.max_violations),
            sink: self.sink.clone(),
            shared: shared.clone(),
            frame_interval: self.settings.frame_interval,
        };
        let spawned = thread::Builder::new()
            .name(format!("proctor-{}-{}", user_id, exam_id))
            .spawn(move || worker.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                shared.loop_active.store(false, Ordering::SeqCst);
                return Err(ProctorError::Spawn(err));
            }
        };

        log::info!(
            "monitoring started for user {} exam {} (max {} violations, cooldown {:?})",
            user_id,
            exam_id,
            self.settings.max_violations,
            self.settings.policy.cooldown
        );
        match self.current.lock() {
            Ok(mut guard) => *guard = shared.clone(),
            Err(poisoned) => *poisoned.into_inner() = shared.clone(),
        }
        self.shared = shared;
        self.worker = Some(handle);
        self.active = Some((user_id, exam_id));
        self.state = ControllerState::Running;
        Ok(())
    }

    /// Stop monitoring and wait for the loop to release the camera.
    ///
    /// Returns the report of the session that was running (or that ended on
    /// its own since the last call). Calling it again is a no-op returning
    /// `None`.
    pub fn stop(&mut self) -> Option<SessionReport> {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        let report = self.join_worker();
        self.shared.preview.clear();
        if self.state == ControllerState::Running {
            self.state = ControllerState::Stopped;
        }
        if let Some(report) = &report {
            log::info!(
                "monitoring stopped for user {} exam {}: {} violation(s), {:?}",
                report.user_id,
                report.exam_id,
                report.violation_count,
                report.outcome
            );
        }
        report
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            current: self.current.clone(),
        }
    }

    pub fn state(&self) -> ControllerState {
        match self.state {
            ControllerState::Running if !self.shared.loop_active.load(Ordering::SeqCst) => {
                ControllerState::Stopped
            }
            state => state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ControllerState::Running
    }

    /// Current count. Never blocks on the processing loop.
    pub fn get_violation_count(&self) -> u32 {
        self.shared.violation_count.load(Ordering::SeqCst)
    }

    /// Most recent captured frame, for live preview. `None` when no session
    /// is running, before the first frame, or if the slot is momentarily busy.
    pub fn get_current_frame(&self) -> Option<Frame> {
        self.shared.preview.latest()
    }

    /// Clear the count left by a finished session.
    pub fn reset_violations(&mut self) -> Result<(), ProctorError> {
        self.reap_finished();
        if self.worker.is_some() {
            return Err(ProctorError::SessionActive);
        }
        self.shared.violation_count.store(0, Ordering::SeqCst);
        Ok(())
    }

    pub fn status(&self) -> StatusSnapshot {
        let (user_id, exam_id) = match self.active {
            Some((user, exam)) => (Some(user), Some(exam)),
            None => (None, None),
        };
        StatusSnapshot {
            state: self.state(),
            user_id,
            exam_id,
            violation_count: self.get_violation_count(),
            max_violations: self.settings.max_violations,
            session_status: self.shared.status(),
            frames_processed: self.shared.frames_processed.load(Ordering::SeqCst),
        }
    }

    /// Report of the most recently finished session.
    pub fn last_report(&self) -> Option<&SessionReport> {
        self.last_report.as_ref()
    }

    /// Join a worker whose loop already exited (threshold or source closed).
    fn reap_finished(&mut self) {
        let finished = self
            .worker
            .as_ref()
            .is_some_and(|handle| handle.is_finished());
        if finished {
            self.join_worker();
            self.state = ControllerState::Stopped;
        }
    }

    fn join_worker(&mut self) -> Option<SessionReport> {
        let handle = self.worker.take()?;
        match handle.join() {
            Ok(report) => {
                self.last_report = Some(report.clone());
                Some(report)
            }
            Err(_) => {
                log::error!("monitoring thread panicked");
                self.shared.loop_active.store(false, Ordering::SeqCst);
                None
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Processing loop
// ----------------------------------------------------------------------------

struct Worker {
    source: Box<dyn FrameSource>,
    detectors: DetectorSet,
    classifier: Classifier,
    engine: AggregationEngine,
    session: ExamSession,
    sink: Arc<dyn EventSink>,
    shared: Arc<Shared>,
    frame_interval: Duration,
}

impl Worker {
    fn run(mut self) -> SessionReport {
        while !self.shared.stop_requested.load(Ordering::SeqCst) && self.source.is_open() {
            let tick_start = Instant::now();
            if self.tick() {
                break;
            }
            if let Some(remaining) = self.frame_interval.checked_sub(tick_start.elapsed()) {
                thread::sleep(remaining);
            }
        }

        self.source.release();
        log::info!("camera {} released", self.source.name());
        self.session.end_normally();
        self.shared.set_status(self.session.status());
        self.shared.loop_active.store(false, Ordering::SeqCst);

        SessionReport {
            user_id: self.session.user_id(),
            exam_id: self.session.exam_id(),
            violation_count: self.session.violation_count(),
            status: self.session.status(),
            outcome: self.session.outcome(),
            frames_processed: self.shared.frames_processed.load(Ordering::SeqCst),
            started_at: self.session.started_at(),
            ended_at: Utc::now(),
            source: self.source.stats(),
        }
    }

    /// One frame through the pipeline. Returns true once the exam is terminated.
    fn tick(&mut self) -> bool {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return false,
            Err(err) => {
                log::debug!("frame read from {} failed: {:#}", self.source.name(), err);
                return false;
            }
        };
        self.shared.preview.publish(frame.clone());

        let detections = self.detectors.run(&frame);
        for signal in self.classifier.frame(&frame, &detections) {
            let Some(event) = self.engine.ingest(&mut self.session, signal, Utc::now()) else {
                continue;
            };
            self.shared
                .violation_count
                .store(self.session.violation_count(), Ordering::SeqCst);
            self.emit(ProctorEvent::Violation(ViolationPayload::new(
                &self.session,
                &event,
            )));
        }
        self.shared.frames_processed.fetch_add(1, Ordering::SeqCst);

        match self.session.take_termination() {
            Some(termination) => {
                self.shared.set_status(self.session.status());
                self.emit(ProctorEvent::EndExam(TerminationPayload::from(termination)));
                self.shared.stop_requested.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    fn emit(&self, event: ProctorEvent) {
        if let Err(err) = self.sink.emit(&event) {
            log::warn!("event sink rejected event: {:#}", err);
        }
    }
}
