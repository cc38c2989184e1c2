//! YOLOv8 output decoding shared by the ONNX backends.
//!
//! YOLOv8 heads emit a `[1, channels, anchors]` tensor where each anchor column
//! holds `cx, cy, w, h`, one score per class and optionally `x, y, conf` per
//! keypoint. Coordinates are in model-input pixels.

use anyhow::{anyhow, Result};

use crate::detect::result::BoundingBox;

pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// One decoded anchor, scaled to frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// (x, y, confidence) per keypoint, frame pixels.
    pub keypoints: Vec<(f32, f32, f32)>,
}

/// Decoding parameters for one model head.
#[derive(Clone, Copy, Debug)]
pub struct HeadLayout {
    pub num_classes: usize,
    pub num_keypoints: usize,
}

impl HeadLayout {
    pub fn channels(&self) -> usize {
        4 + self.num_classes + self.num_keypoints * 3
    }
}

/// Borrowed `[channels][anchors]` output tensor (batch dimension stripped).
pub struct YoloOutput<'a> {
    data: &'a [f32],
    channels: usize,
    anchors: usize,
}

impl<'a> YoloOutput<'a> {
    pub fn new(data: &'a [f32], channels: usize, anchors: usize) -> Result<Self> {
        let expected = channels
            .checked_mul(anchors)
            .ok_or_else(|| anyhow!("output dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "output length {} does not match {}x{}",
                data.len(),
                channels,
                anchors
            ));
        }
        Ok(Self {
            data,
            channels,
            anchors,
        })
    }

    fn value(&self, channel: usize, anchor: usize) -> f32 {
        self.data[channel * self.anchors + anchor]
    }

    /// Decode anchors whose best class score reaches `min_confidence`.
    ///
    /// `scale` maps model-input pixels to frame pixels as (x, y) factors.
    pub fn decode(
        &self,
        layout: HeadLayout,
        min_confidence: f32,
        scale: (f32, f32),
    ) -> Result<Vec<Candidate>> {
        if self.channels != layout.channels() {
            return Err(anyhow!(
                "model head has {} channels, expected {}",
                self.channels,
                layout.channels()
            ));
        }
        let (sx, sy) = scale;
        let kpt_offset = 4 + layout.num_classes;
        let mut out = Vec::new();
        for anchor in 0..self.anchors {
            let best = (0..layout.num_classes)
                .map(|class| (class, self.value(4 + class, anchor)))
                .fold(None, |best: Option<(usize, f32)>, candidate| match best {
                    Some(b) if b.1 >= candidate.1 => Some(b),
                    _ => Some(candidate),
                });
            let Some((class_id, confidence)) = best else {
                continue;
            };
            if !(confidence >= min_confidence) {
                continue;
            }
            let cx = self.value(0, anchor);
            let cy = self.value(1, anchor);
            let w = self.value(2, anchor);
            let h = self.value(3, anchor);
            let keypoints = (0..layout.num_keypoints)
                .map(|k| {
                    let base = kpt_offset + k * 3;
                    (
                        self.value(base, anchor) * sx,
                        self.value(base + 1, anchor) * sy,
                        self.value(base + 2, anchor),
                    )
                })
                .collect();
            out.push(Candidate {
                class_id,
                confidence,
                bbox: BoundingBox::new((cx - w / 2.0) * sx, (cy - h / 2.0) * sy, w * sx, h * sy),
                keypoints,
            });
        }
        Ok(out)
    }
}

/// Class-aware greedy NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-class head, three anchors, no keypoints.
    fn sample() -> Vec<f32> {
        vec![
            // cx
            50.0, 52.0, 200.0, //
            // cy
            50.0, 50.0, 100.0, //
            // w
            20.0, 20.0, 10.0, //
            // h
            20.0, 20.0, 10.0, //
            // class 0
            0.9, 0.8, 0.1, //
            // class 1
            0.1, 0.2, 0.3,
        ]
    }

    #[test]
    fn decode_filters_and_scales() -> Result<()> {
        let data = sample();
        let output = YoloOutput::new(&data, 6, 3)?;
        let layout = HeadLayout {
            num_classes: 2,
            num_keypoints: 0,
        };
        let candidates = output.decode(layout, 0.5, (2.0, 1.0))?;
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].class_id, 0);
        assert_eq!(candidates[0].bbox, BoundingBox::new(80.0, 40.0, 40.0, 20.0));
        Ok(())
    }

    #[test]
    fn nms_drops_overlapping_same_class() -> Result<()> {
        let data = sample();
        let output = YoloOutput::new(&data, 6, 3)?;
        let layout = HeadLayout {
            num_classes: 2,
            num_keypoints: 0,
        };
        let kept = non_max_suppression(output.decode(layout, 0.5, (1.0, 1.0))?, 0.45);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn keypoints_are_decoded() -> Result<()> {
        // One class, one keypoint, one anchor.
        let data = vec![10.0, 10.0, 4.0, 4.0, 0.9, 8.0, 6.0, 0.7];
        let output = YoloOutput::new(&data, 8, 1)?;
        let layout = HeadLayout {
            num_classes: 1,
            num_keypoints: 1,
        };
        let candidates = output.decode(layout, 0.5, (0.5, 0.5))?;
        assert_eq!(candidates[0].keypoints, vec![(4.0, 3.0, 0.7)]);
        Ok(())
    }

    #[test]
    fn mismatched_layout_is_rejected() -> Result<()> {
        let data = sample();
        let output = YoloOutput::new(&data, 6, 3)?;
        let layout = HeadLayout {
            num_classes: 80,
            num_keypoints: 0,
        };
        assert!(output.decode(layout, 0.5, (1.0, 1.0)).is_err());
        assert!(YoloOutput::new(&data, 5, 3).is_err());
        Ok(())
    }

    #[test]
    fn coco_labels_cover_forbidden_objects() {
        assert_eq!(COCO_LABELS[63], "laptop");
        assert_eq!(COCO_LABELS[67], "cell phone");
        assert_eq!(COCO_LABELS[73], "book");
    }
}
