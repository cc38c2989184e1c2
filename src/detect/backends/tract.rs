#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use super::yolo::{non_max_suppression, HeadLayout, YoloOutput, COCO_LABELS};
use crate::detect::backend::{FaceDetector, ObjectDetector, PoseDetector};
use crate::detect::result::{FaceResult, Keypoint, Landmark, ObjectDetection, PoseResult};
use crate::frame::Frame;

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU: f32 = 0.45;

/// Loaded YOLOv8 ONNX graph plus its fixed input size.
///
/// Frames are resized to the model input, so any camera resolution works.
/// No network I/O and no disk writes beyond model loading.
struct YoloModel {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
}

impl YoloModel {
    fn load(model_path: &Path, width: u32, height: u32) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            image::imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        };
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    /// Run the model and return the head as (data, channels, anchors).
    fn infer(&self, frame: &Frame) -> Result<(Vec<f32>, usize, usize)> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        Ok((view.iter().copied().collect(), shape[1], shape[2]))
    }

    /// Model-input pixels -> frame pixels.
    fn scale_for(&self, frame: &Frame) -> (f32, f32) {
        (
            frame.width() as f32 / self.width as f32,
            frame.height() as f32 / self.height as f32,
        )
    }
}

// ----------------------------------------------------------------------------
// Objects
// ----------------------------------------------------------------------------

/// YOLOv8 detector trained on COCO (e.g. yolov8n.onnx).
pub struct TractObjectDetector {
    model: YoloModel,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractObjectDetector {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Ok(Self {
            model: YoloModel::load(model_path.as_ref(), DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)?,
            confidence_threshold: 0.5,
            iou_threshold: DEFAULT_IOU,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

impl ObjectDetector for TractObjectDetector {
    fn name(&self) -> &'static str {
        "tract-yolov8"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<ObjectDetection>> {
        let (data, channels, anchors) = self.model.infer(frame)?;
        let layout = HeadLayout {
            num_classes: COCO_LABELS.len(),
            num_keypoints: 0,
        };
        let candidates = YoloOutput::new(&data, channels, anchors)?.decode(
            layout,
            self.confidence_threshold,
            self.model.scale_for(frame),
        )?;
        Ok(non_max_suppression(candidates, self.iou_threshold)
            .into_iter()
            .map(|c| ObjectDetection::new(COCO_LABELS[c.class_id], c.confidence, c.bbox))
            .collect())
    }
}

// ----------------------------------------------------------------------------
// Pose
// ----------------------------------------------------------------------------

/// YOLOv8-pose detector (17 COCO keypoints). Reports the most confident person.
pub struct TractPoseDetector {
    model: YoloModel,
    confidence_threshold: f32,
}

impl TractPoseDetector {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Ok(Self {
            model: YoloModel::load(model_path.as_ref(), DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)?,
            confidence_threshold: 0.5,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

impl PoseDetector for TractPoseDetector {
    fn name(&self) -> &'static str {
        "tract-yolov8-pose"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<PoseResult>> {
        let (data, channels, anchors) = self.model.infer(frame)?;
        let layout = HeadLayout {
            num_classes: 1,
            num_keypoints: Landmark::COCO_ORDER.len(),
        };
        let candidates = YoloOutput::new(&data, channels, anchors)?.decode(
            layout,
            self.confidence_threshold,
            self.model.scale_for(frame),
        )?;
        let Some(person) = non_max_suppression(candidates, DEFAULT_IOU).into_iter().next() else {
            return Ok(None);
        };

        let (w, h) = (frame.width() as f32, frame.height() as f32);
        let mut pose = PoseResult::new();
        for (index, (x, y, visibility)) in person.keypoints.into_iter().enumerate() {
            if let Some(landmark) = Landmark::from_coco_index(index) {
                pose = pose.with(landmark, Keypoint::new(x / w, y / h, visibility));
            }
        }
        Ok(Some(pose))
    }
}

// ----------------------------------------------------------------------------
// Faces
// ----------------------------------------------------------------------------

/// YOLOv8-face detector (single class, five landmarks). Only the count is used.
pub struct TractFaceDetector {
    model: YoloModel,
    confidence_threshold: f32,
}

impl TractFaceDetector {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Ok(Self {
            model: YoloModel::load(model_path.as_ref(), DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)?,
            confidence_threshold: 0.5,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

impl FaceDetector for TractFaceDetector {
    fn name(&self) -> &'static str {
        "tract-yolov8-face"
    }

    fn detect(&mut self, frame: &Frame) -> Result<FaceResult> {
        let (data, channels, anchors) = self.model.infer(frame)?;
        let layout = HeadLayout {
            num_classes: 1,
            num_keypoints: 5,
        };
        let candidates = YoloOutput::new(&data, channels, anchors)?.decode(
            layout,
            self.confidence_threshold,
            self.model.scale_for(frame),
        )?;
        Ok(FaceResult::new(
            non_max_suppression(candidates, DEFAULT_IOU).len(),
        ))
    }
}
