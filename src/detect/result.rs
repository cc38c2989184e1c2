use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named body landmarks (COCO keypoint order).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Landmark {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl Landmark {
    pub const COCO_ORDER: [Landmark; 17] = [
        Landmark::Nose,
        Landmark::LeftEye,
        Landmark::RightEye,
        Landmark::LeftEar,
        Landmark::RightEar,
        Landmark::LeftShoulder,
        Landmark::RightShoulder,
        Landmark::LeftElbow,
        Landmark::RightElbow,
        Landmark::LeftWrist,
        Landmark::RightWrist,
        Landmark::LeftHip,
        Landmark::RightHip,
        Landmark::LeftKnee,
        Landmark::RightKnee,
        Landmark::LeftAnkle,
        Landmark::RightAnkle,
    ];

    pub fn from_coco_index(index: usize) -> Option<Self> {
        Self::COCO_ORDER.get(index).copied()
    }
}

/// Landmark position normalized to [0,1] x [0,1] plus visibility confidence.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub visibility: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, visibility: f32) -> Self {
        Self { x, y, visibility }
    }
}

/// Pose for the primary person in a frame. Detectors return `None` when no
/// pose was found.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PoseResult {
    pub landmarks: BTreeMap<Landmark, Keypoint>,
}

impl PoseResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, landmark: Landmark, keypoint: Keypoint) -> Self {
        self.landmarks.insert(landmark, keypoint);
        self
    }

    pub fn landmark(&self, landmark: Landmark) -> Option<&Keypoint> {
        self.landmarks.get(&landmark)
    }
}

/// Number of faces found in a frame.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaceResult {
    pub count: usize,
}

impl FaceResult {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

/// Axis-aligned box in pixel coordinates (top-left origin).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ObjectDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl ObjectDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_indices_map_to_landmarks() {
        assert_eq!(Landmark::from_coco_index(0), Some(Landmark::Nose));
        assert_eq!(Landmark::from_coco_index(5), Some(Landmark::LeftShoulder));
        assert_eq!(Landmark::from_coco_index(6), Some(Landmark::RightShoulder));
        assert_eq!(Landmark::from_coco_index(17), None);
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 5.0, 5.0);
        assert!((a.iou(&a) - 1.0).abs() < f32::EPSILON);
        assert_eq!(a.iou(&b), 0.0);

        let half = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&half) - 50.0 / 150.0).abs() < 1e-6);
    }
}
