//! Violation classifier.
//!
//! Pure mapping from one frame's detector results to candidate violation
//! signals. No state is kept between calls; debouncing and counting belong to
//! the aggregation engine.

use serde::{Deserialize, Serialize};

use crate::detect::{FaceResult, FrameDetections, Keypoint, Landmark, ObjectDetection, PoseResult};
use crate::frame::Frame;
use crate::{ViolationKind, ViolationSignal};

pub const DEFAULT_FORBIDDEN_LABELS: [&str; 3] = ["cell phone", "book", "laptop"];

/// Thresholds used by the classifier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClassifierSettings {
    /// Shoulders below this visibility count as not visible.
    pub min_shoulder_visibility: f32,
    /// Width fraction on each side of the frame that counts as "turned away".
    pub head_margin_ratio: f32,
    /// Object detections below this confidence are ignored.
    pub min_object_confidence: f32,
    pub forbidden_labels: Vec<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            min_shoulder_visibility: 0.5,
            head_margin_ratio: 0.25,
            min_object_confidence: 0.5,
            forbidden_labels: DEFAULT_FORBIDDEN_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Classifier {
    settings: ClassifierSettings,
}

impl Classifier {
    pub fn new(settings: ClassifierSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Shoulder visibility and head-turn rules. Both may fire for one pose.
    pub fn pose(
        &self,
        pose: Option<&PoseResult>,
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<ViolationSignal> {
        let Some(pose) = pose else {
            return vec![ViolationSignal::new(ViolationKind::ShouldersNotVisible)];
        };

        let mut signals = Vec::new();
        let shoulders_visible = [Landmark::LeftShoulder, Landmark::RightShoulder]
            .iter()
            .all(|&landmark| {
                pose.landmark(landmark).is_some_and(|kp| {
                    kp.visibility >= self.settings.min_shoulder_visibility
                        && inside_frame(kp, frame_width, frame_height)
                })
            });
        if !shoulders_visible {
            signals.push(ViolationSignal::new(ViolationKind::ShouldersNotVisible));
        }

        if let Some(nose) = pose.landmark(Landmark::Nose) {
            let nose_x = to_pixel(nose.x, frame_width);
            let margin = (frame_width as f32 * self.settings.head_margin_ratio) as i64;
            if nose_x < margin {
                signals.push(ViolationSignal::new(ViolationKind::HeadTurnedLeft));
            } else if nose_x > frame_width as i64 - margin {
                signals.push(ViolationSignal::new(ViolationKind::HeadTurnedRight));
            }
        }
        signals
    }

    pub fn face(&self, face: &FaceResult) -> Vec<ViolationSignal> {
        match face.count {
            0 => vec![ViolationSignal::new(ViolationKind::FaceNotDetected)],
            1 => Vec::new(),
            _ => vec![ViolationSignal::new(ViolationKind::MultipleFaces)],
        }
    }

    /// One signal per forbidden detection, each carrying `frame` for the screenshot.
    pub fn objects(&self, detections: &[ObjectDetection], frame: &Frame) -> Vec<ViolationSignal> {
        detections
            .iter()
            .filter(|d| d.confidence >= self.settings.min_object_confidence)
            .filter(|d| self.is_forbidden(&d.label))
            .map(|d| {
                ViolationSignal::new(ViolationKind::ForbiddenObject(d.label.trim().to_string()))
                    .with_frame(frame.clone())
            })
            .collect()
    }

    /// Classify everything detected on one frame.
    ///
    /// A failed detector only drops its own signals. Every severe signal leaves
    /// with the frame attached so the engine can persist a screenshot.
    pub fn frame(&self, frame: &Frame, detections: &FrameDetections) -> Vec<ViolationSignal> {
        let mut signals = Vec::new();
        match &detections.pose {
            Ok(pose) => signals.extend(self.pose(pose.as_ref(), frame.width(), frame.height())),
            Err(err) => log::warn!("pose detector failed on frame {}: {:#}", frame.sequence(), err),
        }
        match &detections.face {
            Ok(face) => signals.extend(self.face(face)),
            Err(err) => log::warn!("face detector failed on frame {}: {:#}", frame.sequence(), err),
        }
        match &detections.objects {
            Ok(objects) => signals.extend(self.objects(objects, frame)),
            Err(err) => {
                log::warn!("object detector failed on frame {}: {:#}", frame.sequence(), err)
            }
        }
        signals
            .into_iter()
            .map(|signal| {
                if signal.severity.is_severe() && signal.frame.is_none() {
                    signal.with_frame(frame.clone())
                } else {
                    signal
                }
            })
            .collect()
    }

    fn is_forbidden(&self, label: &str) -> bool {
        let label = label.trim();
        self.settings
            .forbidden_labels
            .iter()
            .any(|forbidden| forbidden.eq_ignore_ascii_case(label))
    }
}

/// `classify_pose` with default thresholds.
pub fn classify_pose(
    pose: Option<&PoseResult>,
    frame_width: u32,
    frame_height: u32,
) -> Vec<ViolationSignal> {
    Classifier::default().pose(pose, frame_width, frame_height)
}

/// `classify_face` with default thresholds.
pub fn classify_face(face: &FaceResult) -> Vec<ViolationSignal> {
    Classifier::default().face(face)
}

/// `classify_objects` with the default forbidden set and threshold.
pub fn classify_objects(detections: &[ObjectDetection], frame: &Frame) -> Vec<ViolationSignal> {
    Classifier::default().objects(detections, frame)
}

/// Normalized coordinate to pixel, truncating toward zero.
fn to_pixel(normalized: f32, extent: u32) -> i64 {
    (normalized * extent as f32) as i64
}

fn inside_frame(kp: &Keypoint, width: u32, height: u32) -> bool {
    let x = to_pixel(kp.x, width);
    let y = to_pixel(kp.y, height);
    x > 0 && x < width as i64 && y > 0 && y < height as i64
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
