//! Outbound events.
//!
//! Two payload shapes leave the monitor: one per accepted violation and a
//! single end-of-exam notice. Sinks deliver them; durable storage is the
//! receiver's concern.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::{ExamSession, Severity, Termination, ViolationEvent};

// ----------------------------------------------------------------------------
// Payloads
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViolationPayload {
    pub user_id: u64,
    pub exam_id: u64,
    pub message: String,
    pub level: Severity,
    pub screenshot_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub pelanggaran_ke: u32,
}

impl ViolationPayload {
    pub fn new(session: &ExamSession, event: &ViolationEvent) -> Self {
        Self {
            user_id: session.user_id(),
            exam_id: session.exam_id(),
            message: event.message.clone(),
            level: event.severity,
            screenshot_path: event
                .screenshot_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            timestamp: event.timestamp,
            pelanggaran_ke: event.sequence_number,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExamAction {
    #[serde(rename = "end_exam")]
    EndExam,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TerminationPayload {
    pub action: ExamAction,
    pub reason: String,
    pub pelanggaran_count: u32,
}

impl From<Termination> for TerminationPayload {
    fn from(termination: Termination) -> Self {
        Self {
            action: ExamAction::EndExam,
            reason: termination.reason,
            pelanggaran_count: termination.violation_count,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ProctorEvent {
    Violation(ViolationPayload),
    EndExam(TerminationPayload),
}

impl ProctorEvent {
    pub fn is_termination(&self) -> bool {
        matches!(self, ProctorEvent::EndExam(_))
    }
}

// ----------------------------------------------------------------------------
// Sinks
// ----------------------------------------------------------------------------

/// Receives every event emitted by a monitoring session.
///
/// Called from the processing loop. A returned error is logged and does not
/// stop monitoring.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ProctorEvent) -> Result<()>;
}

impl<F> EventSink for F
where
    F: Fn(&ProctorEvent) -> Result<()> + Send + Sync,
{
    fn emit(&self, event: &ProctorEvent) -> Result<()> {
        self(event)
    }
}

/// Keeps everything in memory. Used by tests and embedding callers that poll.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProctorEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProctorEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn violations(&self) -> Vec<ViolationPayload> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProctorEvent::Violation(payload) => Some(payload),
                ProctorEvent::EndExam(_) => None,
            })
            .collect()
    }

    pub fn terminations(&self) -> Vec<TerminationPayload> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProctorEvent::EndExam(payload) => Some(payload),
                ProctorEvent::Violation(_) => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &ProctorEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// One JSON document per line, flushed per event.
pub struct JsonlSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonlSink {
    /// Append to `path`, creating it if needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open event log {}", path.display()))?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &ProctorEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("serialize event")?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        writeln!(out, "{}", line).context("write event")?;
        out.flush().context("flush event log")?;
        Ok(())
    }
}

/// Forwards to several sinks. Every sink is tried; the first error is returned.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &ProctorEvent) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.emit(event) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// POSTs each event as JSON to the exam platform.
#[cfg(feature = "sink-http")]
pub struct HttpSink {
    agent: ureq::Agent,
    violation_url: String,
    end_exam_url: String,
}

#[cfg(feature = "sink-http")]
impl HttpSink {
    pub fn new(
        violation_url: impl Into<String>,
        end_exam_url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            violation_url: violation_url.into(),
            end_exam_url: end_exam_url.into(),
        }
    }
}

#[cfg(feature = "sink-http")]
impl EventSink for HttpSink {
    fn emit(&self, event: &ProctorEvent) -> Result<()> {
        let url = match event {
            ProctorEvent::Violation(_) => &self.violation_url,
            ProctorEvent::EndExam(_) => &self.end_exam_url,
        };
        let body = serde_json::to_string(event).context("serialize event")?;
        self.agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .with_context(|| format!("post event to {}", url))?;
        Ok(())
    }
}
