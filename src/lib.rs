//! Exam Proctoring Monitor
//!
//! This crate watches a webcam feed during a timed exam and turns raw per-frame
//! detector output into debounced, classified violation events.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> DetectorSet (pose | face | object) -> Classifier
//!             -> AggregationEngine -> SessionController -> EventSink
//! ```
//!
//! # Module Structure
//!
//! - `frame`: Immutable frames and the single-slot preview cell
//! - `ingest`: Frame sources (V4L2 camera, image directories, scripted replay)
//! - `detect`: Detector adapters and their structured per-frame results
//! - `classify`: Pure mapping from detector results to violation signals
//! - `engine`: Shared-cooldown debounce, counting, screenshots, exam termination
//! - `session`: Monitoring lifecycle and the background processing loop
//! - `sink`: Outbound violation / end-of-exam payloads
//! - Core types: Severity, ViolationKind, ViolationSignal, ViolationEvent, ExamSession

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

pub mod classify;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod screenshot;
pub mod session;
pub mod sink;

pub use classify::{classify_face, classify_objects, classify_pose, Classifier, ClassifierSettings};
pub use detect::{
    BoundingBox, DetectorSet, FaceDetector, FaceResult, FrameDetections, Keypoint, Landmark,
    ObjectDetection, ObjectDetector, PoseDetector, PoseResult, Scripted, StubBackend,
};
pub use engine::{AggregationEngine, CooldownScope, EnginePolicy};
pub use error::ProctorError;
pub use frame::{Frame, PreviewSlot};
pub use ingest::{
    camera::CameraConfig, file::FileConfig, CameraSource, FileSource, FrameSource, ReplaySource,
    SourceStats,
};
pub use screenshot::{JpegScreenshotStore, ScreenshotStore};
pub use session::{
    ControllerState, MonitorSettings, SessionController, SessionReport, StatusSnapshot,
    StopHandle,
};
pub use sink::{
    EventSink, FanoutSink, JsonlSink, MemorySink, ProctorEvent, TerminationPayload,
    ViolationPayload,
};
#[cfg(feature = "sink-http")]
pub use sink::HttpSink;

/// Reason attached to the end-of-exam payload.
pub const TERMINATION_REASON: &str = "Terlalu banyak pelanggaran";

// -------------------- Severity --------------------

/// Violation severity. Serialized with the exam platform's level names.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Severity {
    /// ringan
    #[serde(rename = "ringan")]
    Minor,
    /// berat
    #[serde(rename = "berat")]
    Severe,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Minor => "ringan",
            Severity::Severe => "berat",
        }
    }

    pub fn is_severe(self) -> bool {
        matches!(self, Severity::Severe)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------- Violation Kinds --------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ShouldersNotVisible,
    HeadTurnedLeft,
    HeadTurnedRight,
    FaceNotDetected,
    MultipleFaces,
    /// Carries the detector label (e.g. "cell phone").
    ForbiddenObject(String),
}

impl ViolationKind {
    /// Severity is fixed per kind.
    pub fn severity(&self) -> Severity {
        match self {
            ViolationKind::ShouldersNotVisible
            | ViolationKind::HeadTurnedLeft
            | ViolationKind::HeadTurnedRight
            | ViolationKind::FaceNotDetected => Severity::Minor,
            ViolationKind::MultipleFaces | ViolationKind::ForbiddenObject(_) => Severity::Severe,
        }
    }

    /// Message shown to proctors and stored in the violation log.
    pub fn message(&self) -> String {
        match self {
            ViolationKind::ShouldersNotVisible => "Bahu tidak terlihat dengan jelas".to_string(),
            ViolationKind::HeadTurnedLeft => "Kepala terlalu sering menengok ke kiri".to_string(),
            ViolationKind::HeadTurnedRight => {
                "Kepala terlalu sering menengok ke kanan".to_string()
            }
            ViolationKind::FaceNotDetected => "Wajah tidak terdeteksi".to_string(),
            ViolationKind::MultipleFaces => "Terdeteksi wajah orang lain".to_string(),
            ViolationKind::ForbiddenObject(label) => {
                format!("Terdeteksi benda terlarang: {}", label)
            }
        }
    }

    /// File name prefix for screenshots taken for this kind.
    pub fn screenshot_prefix(&self) -> String {
        match self {
            ViolationKind::ForbiddenObject(label) => {
                let slug: String = label
                    .trim()
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
                    .collect();
                format!("objek_{}", slug)
            }
            ViolationKind::MultipleFaces => "multiple_faces".to_string(),
            _ => "violation".to_string(),
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::ShouldersNotVisible => f.write_str("SHOULDERS_NOT_VISIBLE"),
            ViolationKind::HeadTurnedLeft => f.write_str("HEAD_TURNED_LEFT"),
            ViolationKind::HeadTurnedRight => f.write_str("HEAD_TURNED_RIGHT"),
            ViolationKind::FaceNotDetected => f.write_str("FACE_NOT_DETECTED"),
            ViolationKind::MultipleFaces => f.write_str("MULTIPLE_FACES"),
            ViolationKind::ForbiddenObject(label) => write!(f, "FORBIDDEN_OBJECT({})", label),
        }
    }
}

// -------------------- Signals and Events --------------------

/// Candidate violation produced by the classifier. Ephemeral.
#[derive(Clone, Debug)]
pub struct ViolationSignal {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    /// Frame to persist if the signal is accepted as a severe violation.
    pub frame: Option<frame::Frame>,
}

impl ViolationSignal {
    pub fn new(kind: ViolationKind) -> Self {
        Self {
            severity: kind.severity(),
            message: kind.message(),
            kind,
            frame: None,
        }
    }

    pub fn with_frame(mut self, frame: frame::Frame) -> Self {
        self.frame = Some(frame);
        self
    }
}

/// Confirmed, debounced violation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViolationEvent {
    pub sequence_number: u32,
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub screenshot_path: Option<PathBuf>,
}

// -------------------- Exam Session --------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    EndedNormally,
    EndedByViolations,
}

/// Final result of an exam attempt, using the exam platform's status names.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExamOutcome {
    #[serde(rename = "selesai")]
    Completed,
    #[serde(rename = "diskualifikasi")]
    Disqualified,
}

/// Emitted once when the violation threshold ends the exam.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Termination {
    pub reason: String,
    pub violation_count: u32,
}

/// Per-attempt monitoring state, passed explicitly through the pipeline.
///
/// `violation_count` only grows and always equals the number of events emitted
/// for this session. `EndedByViolations` is entered once and is terminal.
#[derive(Clone, Debug)]
pub struct ExamSession {
    user_id: u64,
    exam_id: u64,
    violation_count: u32,
    max_violations: u32,
    last_signal_timestamp: Option<DateTime<Utc>>,
    last_signal_by_kind: HashMap<ViolationKind, DateTime<Utc>>,
    status: SessionStatus,
    termination_pending: bool,
    started_at: DateTime<Utc>,
}

impl ExamSession {
    pub fn new(user_id: u64, exam_id: u64, max_violations: u32) -> Self {
        Self {
            user_id,
            exam_id,
            violation_count: 0,
            max_violations,
            last_signal_timestamp: None,
            last_signal_by_kind: HashMap::new(),
            status: SessionStatus::Running,
            termination_pending: false,
            started_at: Utc::now(),
        }
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn exam_id(&self) -> u64 {
        self.exam_id
    }

    pub fn violation_count(&self) -> u32 {
        self.violation_count
    }

    pub fn max_violations(&self) -> u32 {
        self.max_violations
    }

    pub fn last_signal_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_signal_timestamp
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn outcome(&self) -> ExamOutcome {
        if self.status == SessionStatus::EndedByViolations
            || self.violation_count >= self.max_violations
        {
            ExamOutcome::Disqualified
        } else {
            ExamOutcome::Completed
        }
    }

    /// Close a running session without disqualification. No-op once ended.
    pub fn end_normally(&mut self) {
        if self.status == SessionStatus::Running {
            self.status = SessionStatus::EndedNormally;
        }
    }

    /// Returns the termination notice exactly once after the threshold is hit.
    pub fn take_termination(&mut self) -> Option<Termination> {
        if !self.termination_pending {
            return None;
        }
        self.termination_pending = false;
        Some(Termination {
            reason: TERMINATION_REASON.to_string(),
            violation_count: self.violation_count,
        })
    }

    pub(crate) fn last_signal_for(&self, kind: &ViolationKind) -> Option<DateTime<Utc>> {
        self.last_signal_by_kind.get(kind).copied()
    }

    /// Stamp the cooldown timers and bump the counter. Returns the new count.
    pub(crate) fn record_violation(&mut self, kind: &ViolationKind, now: DateTime<Utc>) -> u32 {
        self.last_signal_timestamp = Some(now);
        self.last_signal_by_kind.insert(kind.clone(), now);
        self.violation_count = self.violation_count.saturating_add(1);
        self.violation_count
    }

    /// Running -> EndedByViolations once the threshold is reached.
    pub(crate) fn check_threshold(&mut self) -> bool {
        if self.status != SessionStatus::Running || self.violation_count < self.max_violations {
            return false;
        }
        self.status = SessionStatus::EndedByViolations;
        self.termination_pending = true;
        true
    }
}

// -------------------- Tests --------------------
