//! SCRFD face detector on ONNX Runtime.
//!
//! The frame is letterboxed into a 640x640 input (top-left aligned, zero
//! padded) and normalized to `(v - 127.5) / 128`, NCHW. The model emits one
//! score tensor and one box-distance tensor per feature stride, optionally
//! followed by keypoint tensors, which are ignored here.

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::LandmarkError;

pub const INPUT_SIZE: u32 = 640;

const SCORE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;

/// A detected face in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with `other`.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    fn scaled(self, factor: f32) -> FaceBox {
        FaceBox {
            x1: self.x1 * factor,
            y1: self.y1 * factor,
            x2: self.x2 * factor,
            y2: self.y2 * factor,
            score: self.score,
        }
    }
}

/// Output layout, keyed by the number of model outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Layout {
    strides: &'static [u32],
    anchors: usize,
}

fn layout(outputs: usize) -> Option<Layout> {
    match outputs {
        6 | 9 => Some(Layout {
            strides: &[8, 16, 32],
            anchors: 2,
        }),
        10 | 15 => Some(Layout {
            strides: &[8, 16, 32, 64, 128],
            anchors: 1,
        }),
        _ => None,
    }
}

pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    pub fn open(model_path: &Path) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| LandmarkError::Inference(format!("load {}: {e}", model_path.display())))?;
        tracing::debug!(path = %model_path.display(), "face detector loaded");
        Ok(Self { session })
    }

    /// Faces in `frame`, best score first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>, LandmarkError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let (input, scale) = letterbox(frame);

        let tensor = Tensor::from_array(input).map_err(|e| LandmarkError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;

        let mut tensors = Vec::with_capacity(outputs.len());
        for (_, value) in outputs.iter() {
            let (_, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| LandmarkError::Output(e.to_string()))?;
            tensors.push(data.to_vec());
        }

        let layout = layout(tensors.len())
            .ok_or_else(|| LandmarkError::Output(format!("{} detector outputs", tensors.len())))?;
        let levels = layout.strides.len();

        let mut boxes = Vec::new();
        for (level, &stride) in layout.strides.iter().enumerate() {
            let scores = &tensors[level];
            let distances = &tensors[level + levels];
            let cells = (INPUT_SIZE / stride) as usize;
            let expected = cells * cells * layout.anchors;
            if scores.len() != expected || distances.len() != expected * 4 {
                return Err(LandmarkError::Output(format!(
                    "stride {stride}: {} scores, {} distances, expected {expected}",
                    scores.len(),
                    distances.len()
                )));
            }
            boxes.extend(decode_level(scores, distances, stride, layout.anchors, SCORE_THRESHOLD));
        }

        // Letterbox coordinates back to frame pixels.
        Ok(non_max_suppression(boxes, NMS_THRESHOLD)
            .into_iter()
            .map(|b| b.scaled(1.0 / scale))
            .collect())
    }
}

/// Fit `frame` into the square input without distortion. Returns the tensor
/// and the frame-to-input scale.
pub fn letterbox(frame: &RgbImage) -> (Array4<f32>, f32) {
    let (width, height) = frame.dimensions();
    let scale = INPUT_SIZE as f32 / width.max(height) as f32;
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = image::imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    let input = Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        if (x as u32) < new_w && (y as u32) < new_h {
            (resized.get_pixel(x as u32, y as u32)[c] as f32 - 127.5) / 128.0
        } else {
            0.0
        }
    });
    (input, scale)
}

/// Decode one stride level. Anchor `i` sits at cell `i / anchors`, row-major,
/// and its box is given as `(left, top, right, bottom)` distances in units of
/// the stride.
pub fn decode_level(
    scores: &[f32],
    distances: &[f32],
    stride: u32,
    anchors: usize,
    threshold: f32,
) -> Vec<FaceBox> {
    let cells_per_row = (INPUT_SIZE / stride) as usize;
    let step = stride as f32;
    scores
        .iter()
        .enumerate()
        .filter(|(_, &s)| s >= threshold)
        .filter_map(|(i, &score)| {
            let d = distances.get(i * 4..i * 4 + 4)?;
            let cell = i / anchors.max(1);
            let cx = (cell % cells_per_row) as f32 * step;
            let cy = (cell / cells_per_row) as f32 * step;
            Some(FaceBox {
                x1: cx - d[0] * step,
                y1: cy - d[1] * step,
                x2: cx + d[2] * step,
                y2: cy + d[3] * step,
                score,
            })
        })
        .collect()
}

/// Greedy NMS; the survivors come back sorted by score, highest first.
pub fn non_max_suppression(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
