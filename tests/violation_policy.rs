use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use exam_proctor::{
    classify_face, classify_objects, classify_pose, AggregationEngine, BoundingBox,
    CooldownScope, EnginePolicy, ExamOutcome, ExamSession, FaceResult, Frame,
    JpegScreenshotStore, Keypoint, Landmark, ObjectDetection, PoseResult, SessionStatus,
    Severity, ViolationKind, ViolationSignal, TERMINATION_REASON,
};

const W: u32 = 640;
const H: u32 = 480;

fn frame() -> Frame {
    Frame::filled(W, H, [120, 120, 120]).expect("frame")
}

fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    base + ChronoDuration::seconds(secs)
}

fn engine_in(dir: &std::path::Path, scope: CooldownScope) -> AggregationEngine {
    AggregationEngine::new(
        EnginePolicy {
            cooldown: Duration::from_secs(3),
            scope,
        },
        Box::new(JpegScreenshotStore::new(dir)),
    )
}

fn upright_pose(nose_x: f32) -> PoseResult {
    PoseResult::new()
        .with(Landmark::Nose, Keypoint::new(nose_x, 0.3, 0.98))
        .with(Landmark::LeftShoulder, Keypoint::new(0.7, 0.75, 0.9))
        .with(Landmark::RightShoulder, Keypoint::new(0.3, 0.75, 0.9))
}

// ------ Classifier properties ------

#[test]
fn low_shoulder_visibility_always_flags_shoulders() {
    for step in 0..50 {
        let visibility = step as f32 / 100.0;
        for pose in [
            upright_pose(0.5).with(Landmark::LeftShoulder, Keypoint::new(0.7, 0.75, visibility)),
            upright_pose(0.5).with(Landmark::RightShoulder, Keypoint::new(0.3, 0.75, visibility)),
        ] {
            let signals = classify_pose(Some(&pose), W, H);
            let shoulders: Vec<_> = signals
                .iter()
                .filter(|s| s.kind == ViolationKind::ShouldersNotVisible)
                .collect();
            assert_eq!(shoulders.len(), 1, "visibility {}", visibility);
            assert_eq!(shoulders[0].severity, Severity::Minor);
        }
    }
}

#[test]
fn face_count_rules() {
    assert!(classify_face(&FaceResult::new(1)).is_empty());

    let none = classify_face(&FaceResult::new(0));
    assert_eq!(none.len(), 1);
    assert_eq!(none[0].kind, ViolationKind::FaceNotDetected);
    assert_eq!(none[0].severity, Severity::Minor);

    for count in 2..6 {
        let many = classify_face(&FaceResult::new(count));
        assert_eq!(many.len(), 1);
        assert_eq!(many[0].kind, ViolationKind::MultipleFaces);
        assert_eq!(many[0].severity, Severity::Severe);
    }
}

#[test]
fn scenario_a_head_turned_left() {
    let signals = classify_pose(Some(&upright_pose(0.10)), W, H);
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].kind, ViolationKind::HeadTurnedLeft);
    assert_eq!(signals[0].severity, Severity::Minor);
    assert_eq!(signals[0].message, "Kepala terlalu sering menengok ke kiri");
}

// ------ Aggregation engine ------

#[test]
fn scenario_b_cell_phone_gets_screenshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut engine = engine_in(dir.path(), CooldownScope::Global);
    let mut session = ExamSession::new(42, 7, 3);

    let detections = vec![ObjectDetection::new(
        "cell phone",
        0.8,
        BoundingBox::new(100.0, 120.0, 60.0, 110.0),
    )];
    let mut signals = classify_objects(&detections, &frame());
    assert_eq!(signals.len(), 1);
    let signal = signals.remove(0);
    assert_eq!(
        signal.kind,
        ViolationKind::ForbiddenObject("cell phone".to_string())
    );
    assert_eq!(signal.severity, Severity::Severe);

    let event = engine
        .ingest(&mut session, signal, Utc::now())
        .expect("event");
    let path = event.screenshot_path.expect("screenshot path");
    assert!(path.starts_with(dir.path()));
    assert!(path.exists());
    let name = path.file_name().and_then(|n| n.to_str()).expect("file name");
    assert!(name.starts_with("objek_cell_phone_42_"));
    assert!(name.ends_with(".jpg"));
}

#[test]
fn debounce_counts_only_first_signal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut engine = engine_in(dir.path(), CooldownScope::Global);
    let mut session = ExamSession::new(1, 1, 3);
    let t0 = Utc::now();

    let first = engine.ingest(
        &mut session,
        ViolationSignal::new(ViolationKind::HeadTurnedRight),
        t0,
    );
    let second = engine.ingest(
        &mut session,
        ViolationSignal::new(ViolationKind::HeadTurnedRight),
        at(t0, 1),
    );
    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(session.violation_count(), 1);
}

#[test]
fn global_cooldown_masks_other_kinds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut engine = engine_in(dir.path(), CooldownScope::Global);
    let mut session = ExamSession::new(1, 1, 3);
    let t0 = Utc::now();

    assert!(engine
        .ingest(
            &mut session,
            ViolationSignal::new(ViolationKind::FaceNotDetected),
            t0
        )
        .is_some());
    // A severe violation right after a minor one is silently suppressed.
    let masked = engine.ingest(
        &mut session,
        ViolationSignal::new(ViolationKind::ForbiddenObject("book".into()))
            .with_frame(frame()),
        at(t0, 1),
    );
    assert!(masked.is_none());
    assert_eq!(session.violation_count(), 1);
    assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
}

#[test]
fn per_kind_cooldown_keeps_distinct_kinds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut engine = engine_in(dir.path(), CooldownScope::PerKind);
    let mut session = ExamSession::new(1, 1, 5);
    let t0 = Utc::now();

    assert!(engine
        .ingest(
            &mut session,
            ViolationSignal::new(ViolationKind::FaceNotDetected),
            t0
        )
        .is_some());
    let severe = engine
        .ingest(
            &mut session,
            ViolationSignal::new(ViolationKind::ForbiddenObject("book".into()))
                .with_frame(frame()),
            at(t0, 1),
        )
        .expect("distinct kind is not masked");
    assert_eq!(severe.sequence_number, 2);
    assert!(severe.screenshot_path.is_some());

    // Same kind inside its own window is still debounced.
    assert!(engine
        .ingest(
            &mut session,
            ViolationSignal::new(ViolationKind::FaceNotDetected),
            at(t0, 2)
        )
        .is_none());
    assert_eq!(session.violation_count(), 2);
}

#[test]
fn scenario_c_third_severe_violation_terminates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut engine = engine_in(dir.path(), CooldownScope::Global);
    let mut session = ExamSession::new(5, 9, 3);
    let t0 = Utc::now();

    let mut events = Vec::new();
    for i in 0..3 {
        let signal = ViolationSignal::new(ViolationKind::MultipleFaces).with_frame(frame());
        let event = engine
            .ingest(&mut session, signal, at(t0, i * 3))
            .expect("accepted");
        events.push(event);
        if i < 2 {
            assert!(session.is_running());
            assert!(session.take_termination().is_none());
        }
    }

    let sequence: Vec<u32> = events.iter().map(|e| e.sequence_number).collect();
    assert_eq!(sequence, vec![1, 2, 3]);
    assert_eq!(session.status(), SessionStatus::EndedByViolations);
    assert_eq!(session.outcome(), ExamOutcome::Disqualified);

    let termination = session.take_termination().expect("termination");
    assert_eq!(termination.reason, TERMINATION_REASON);
    assert_eq!(termination.violation_count, 3);
    assert!(session.take_termination().is_none());

    // Late signals neither count nor terminate again.
    assert!(engine
        .ingest(
            &mut session,
            ViolationSignal::new(ViolationKind::MultipleFaces),
            at(t0, 60)
        )
        .is_none());
    assert_eq!(session.violation_count(), 3);
    assert!(session.take_termination().is_none());
}

#[test]
fn screenshot_failure_does_not_drop_violation() {
    let blocker = tempfile::NamedTempFile::new().expect("temp file");
    // A regular file cannot act as the screenshot directory.
    let mut engine = engine_in(blocker.path(), CooldownScope::Global);
    let mut session = ExamSession::new(1, 1, 3);

    let event = engine
        .ingest(
            &mut session,
            ViolationSignal::new(ViolationKind::ForbiddenObject("laptop".into()))
                .with_frame(frame()),
            Utc::now(),
        )
        .expect("event is still emitted");
    assert_eq!(event.sequence_number, 1);
    assert!(event.screenshot_path.is_none());
    assert_eq!(session.violation_count(), 1);
}

#[test]
fn same_second_screenshots_get_distinct_names() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut engine = AggregationEngine::new(
        EnginePolicy {
            cooldown: Duration::ZERO,
            scope: CooldownScope::Global,
        },
        Box::new(JpegScreenshotStore::new(dir.path())),
    );
    let mut session = ExamSession::new(3, 3, 10);
    let now = Utc::now();

    let paths: Vec<_> = (0..3)
        .map(|_| {
            engine
                .ingest(
                    &mut session,
                    ViolationSignal::new(ViolationKind::MultipleFaces).with_frame(frame()),
                    now,
                )
                .and_then(|e| e.screenshot_path)
                .expect("screenshot")
        })
        .collect();
    assert_ne!(paths[0], paths[1]);
    assert_ne!(paths[1], paths[2]);
    assert!(paths.iter().all(|p| p.exists()));
}
