//! Debounce and aggregation.
//!
//! `AggregationEngine::ingest` decides whether a classifier signal becomes a
//! counted `ViolationEvent`. All state lives in the `ExamSession` passed in,
//! so one engine can be reused and concurrent sessions stay isolated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::screenshot::ScreenshotStore;
use crate::{ExamSession, ViolationEvent, ViolationSignal};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_VIOLATIONS: u32 = 3;

/// Which timer a new signal is debounced against.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    /// One timer shared by every kind. A recent minor violation also
    /// suppresses a different, possibly severe, one.
    #[default]
    Global,
    /// Each kind has its own timer.
    PerKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnginePolicy {
    pub cooldown: Duration,
    pub scope: CooldownScope,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            scope: CooldownScope::Global,
        }
    }
}

pub struct AggregationEngine {
    policy: EnginePolicy,
    screenshots: Box<dyn ScreenshotStore>,
}

impl AggregationEngine {
    pub fn new(policy: EnginePolicy, screenshots: Box<dyn ScreenshotStore>) -> Self {
        Self {
            policy,
            screenshots,
        }
    }

    pub fn policy(&self) -> EnginePolicy {
        self.policy
    }

    /// Turn one signal into at most one event.
    ///
    /// Discarded (returns `None`, session untouched) when the session has
    /// already ended or the signal falls inside the cooldown window. Otherwise
    /// the count is bumped, a screenshot is attempted for severe signals that
    /// carry a frame, and the threshold check runs after the event exists.
    /// A screenshot failure leaves `screenshot_path` empty and is only logged.
    pub fn ingest(
        &mut self,
        session: &mut ExamSession,
        signal: ViolationSignal,
        now: DateTime<Utc>,
    ) -> Option<ViolationEvent> {
        if !session.is_running() {
            log::debug!("session ended, dropping {} signal", signal.kind);
            return None;
        }

        let last = match self.policy.scope {
            CooldownScope::Global => session.last_signal_timestamp(),
            CooldownScope::PerKind => session.last_signal_for(&signal.kind),
        };
        if let Some(last) = last {
            if self.within_cooldown(last, now) {
                log::debug!("debounced {} signal", signal.kind);
                return None;
            }
        }

        let sequence_number = session.record_violation(&signal.kind, now);

        let screenshot_path = match (&signal.frame, signal.severity.is_severe()) {
            (Some(frame), true) => {
                let prefix = signal.kind.screenshot_prefix();
                match self.screenshots.save(frame, &prefix, session.user_id(), now) {
                    Ok(path) => Some(path),
                    Err(err) => {
                        log::warn!(
                            "screenshot for violation #{} not saved: {:#}",
                            sequence_number,
                            err
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let event = ViolationEvent {
            sequence_number,
            kind: signal.kind,
            severity: signal.severity,
            message: signal.message,
            timestamp: now,
            screenshot_path,
        };
        log::warn!(
            "violation #{} ({}) user={} exam={}: {}",
            event.sequence_number,
            event.severity,
            session.user_id(),
            session.exam_id(),
            event.message
        );

        if session.check_threshold() {
            log::warn!(
                "violation threshold reached ({}/{}), ending exam {} for user {}",
                session.violation_count(),
                session.max_violations(),
                session.exam_id(),
                session.user_id()
            );
        }
        Some(event)
    }

    fn within_cooldown(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - last).to_std() {
            Ok(elapsed) => elapsed < self.policy.cooldown,
            // Clock went backwards: treat as inside the window.
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::{SessionStatus, Severity, ViolationKind};
    use anyhow::{anyhow, Result};
    use chrono::Duration as ChronoDuration;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingStore {
        saved: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl ScreenshotStore for RecordingStore {
        fn save(
            &mut self,
            _frame: &Frame,
            prefix: &str,
            user_id: u64,
            at: DateTime<Utc>,
        ) -> Result<PathBuf> {
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            let name = format!("{}_{}_{}.jpg", prefix, user_id, at.timestamp());
            self.saved.lock().expect("lock").push(name.clone());
            Ok(PathBuf::from(name))
        }
    }

    fn engine(store: RecordingStore) -> AggregationEngine {
        AggregationEngine::new(EnginePolicy::default(), Box::new(store))
    }

    fn secs(base: DateTime<Utc>, s: i64) -> DateTime<Utc> {
        base + ChronoDuration::seconds(s)
    }

    #[test]
    fn second_signal_inside_cooldown_is_dropped() {
        let mut engine = engine(RecordingStore::default());
        let mut session = ExamSession::new(1, 1, 3);
        let t0 = Utc::now();

        let first = engine.ingest(
            &mut session,
            ViolationSignal::new(ViolationKind::FaceNotDetected),
            t0,
        );
        assert_eq!(first.map(|e| e.sequence_number), Some(1));
        let second = engine.ingest(
            &mut session,
            ViolationSignal::new(ViolationKind::FaceNotDetected),
            secs(t0, 2),
        );
        assert!(second.is_none());
        assert_eq!(session.violation_count(), 1);

        // Exactly at the cooldown boundary is accepted.
        let third = engine.ingest(
            &mut session,
            ViolationSignal::new(ViolationKind::FaceNotDetected),
            secs(t0, 3),
        );
        assert_eq!(third.map(|e| e.sequence_number), Some(2));
    }

    #[test]
    fn severe_signal_with_frame_gets_screenshot() -> Result<()> {
        let store = RecordingStore::default();
        let saved = store.saved.clone();
        let mut engine = engine(store);
        let mut session = ExamSession::new(9, 1, 3);
        let frame = Frame::filled(2, 2, [0, 0, 0])?;

        let event = engine
            .ingest(
                &mut session,
                ViolationSignal::new(ViolationKind::ForbiddenObject("cell phone".into()))
                    .with_frame(frame),
                Utc::now(),
            )
            .ok_or_else(|| anyhow!("expected event"))?;
        assert_eq!(event.severity, Severity::Severe);
        assert!(event.screenshot_path.is_some());
        assert!(saved.lock().expect("lock")[0].starts_with("objek_cell_phone_9_"));
        Ok(())
    }

    #[test]
    fn minor_signal_never_gets_screenshot() -> Result<()> {
        let store = RecordingStore::default();
        let saved = store.saved.clone();
        let mut engine = engine(store);
        let mut session = ExamSession::new(9, 1, 3);
        let frame = Frame::filled(2, 2, [0, 0, 0])?;

        let event = engine
            .ingest(
                &mut session,
                ViolationSignal::new(ViolationKind::HeadTurnedLeft).with_frame(frame),
                Utc::now(),
            )
            .ok_or_else(|| anyhow!("expected event"))?;
        assert!(event.screenshot_path.is_none());
        assert!(saved.lock().expect("lock").is_empty());
        Ok(())
    }

    #[test]
    fn screenshot_failure_still_counts() -> Result<()> {
        let mut engine = engine(RecordingStore {
            fail: true,
            ..RecordingStore::default()
        });
        let mut session = ExamSession::new(9, 1, 3);
        let event = engine
            .ingest(
                &mut session,
                ViolationSignal::new(ViolationKind::MultipleFaces)
                    .with_frame(Frame::filled(2, 2, [0, 0, 0])?),
                Utc::now(),
            )
            .ok_or_else(|| anyhow!("expected event"))?;
        assert_eq!(event.sequence_number, 1);
        assert!(event.screenshot_path.is_none());
        assert_eq!(session.violation_count(), 1);
        Ok(())
    }

    #[test]
    fn per_kind_scope_only_debounces_same_kind() {
        let mut engine = AggregationEngine::new(
            EnginePolicy {
                scope: CooldownScope::PerKind,
                ..EnginePolicy::default()
            },
            Box::new(RecordingStore::default()),
        );
        let mut session = ExamSession::new(1, 1, 10);
        let t0 = Utc::now();
        let kinds = [
            ViolationKind::FaceNotDetected,
            ViolationKind::MultipleFaces,
            ViolationKind::FaceNotDetected,
        ];
        let accepted: Vec<bool> = kinds
            .into_iter()
            .map(|kind| {
                engine
                    .ingest(&mut session, ViolationSignal::new(kind), secs(t0, 1))
                    .is_some()
            })
            .collect();
        assert_eq!(accepted, vec![true, true, false]);
    }

    #[test]
    fn clock_going_backwards_is_debounced() {
        let mut engine = engine(RecordingStore::default());
        let mut session = ExamSession::new(1, 1, 3);
        let t0 = Utc::now();
        assert!(engine
            .ingest(&mut session, ViolationSignal::new(ViolationKind::HeadTurnedRight), t0)
            .is_some());
        assert!(engine
            .ingest(
                &mut session,
                ViolationSignal::new(ViolationKind::HeadTurnedRight),
                secs(t0, -10)
            )
            .is_none());
    }

    #[test]
    fn signals_after_termination_are_discarded() {
        let mut engine = AggregationEngine::new(
            EnginePolicy {
                cooldown: Duration::ZERO,
                ..EnginePolicy::default()
            },
            Box::new(RecordingStore::default()),
        );
        let mut session = ExamSession::new(1, 1, 1);
        let t0 = Utc::now();
        assert!(engine
            .ingest(&mut session, ViolationSignal::new(ViolationKind::FaceNotDetected), t0)
            .is_some());
        assert_eq!(session.status(), SessionStatus::EndedByViolations);
        assert!(session.take_termination().is_some());

        assert!(engine
            .ingest(
                &mut session,
                ViolationSignal::new(ViolationKind::FaceNotDetected),
                secs(t0, 60)
            )
            .is_none());
        assert_eq!(session.violation_count(), 1);
        assert!(session.take_termination().is_none());
    }
}
