//! MediaPipe Face Mesh landmark source on ONNX Runtime.
//!
//! Each frame goes through the SCRFD detector first. The best face box is
//! expanded into a square crop, resized to the 192x192 mesh input (NHWC,
//! values in [0, 1]), and the mesh's input-space points are mapped back to
//! frame pixels through the crop.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::scrfd::{FaceBox, FaceDetector};
use super::{LandmarkError, LandmarkSet, LandmarkSource, LandmarkSourceFactory, Point};

pub const INPUT_SIZE: u32 = 192;
pub const MESH_POINTS: usize = 468;

pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
pub const RIGHT_EYE: [usize; 6] = [263, 387, 385, 362, 380, 373];
pub const NOSE_TIP: usize = 1;

/// Presence probability below which the crop is treated as faceless.
const PRESENCE_THRESHOLD: f32 = 0.5;

/// Extra context around the detector box, as a fraction of its longer side,
/// on each side.
pub const CROP_MARGIN: f32 = 0.25;

/// Frame region fed to the mesh model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Square crop around `face` with `margin`, clamped to the frame.
    /// `None` when nothing of the box lies inside the frame.
    pub fn around(face: &FaceBox, margin: f32, frame_width: u32, frame_height: u32) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        let side = face.width().max(face.height()) * (1.0 + 2.0 * margin);
        if !side.is_finite() || side < 1.0 {
            return None;
        }
        let cx = (face.x1 + face.x2) / 2.0;
        let cy = (face.y1 + face.y2) / 2.0;

        let x0 = (cx - side / 2.0).max(0.0);
        let y0 = (cy - side / 2.0).max(0.0);
        let x1 = (cx + side / 2.0).min(frame_width as f32);
        let y1 = (cy + side / 2.0).min(frame_height as f32);
        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            return None;
        }

        let x = x0.floor() as u32;
        let y = y0.floor() as u32;
        Some(Self {
            x,
            y,
            width: (x1.ceil() as u32).min(frame_width) - x,
            height: (y1.ceil() as u32).min(frame_height) - y,
        })
    }

    /// Map a point in mesh-input pixels to frame pixels.
    pub fn to_frame(&self, mx: f64, my: f64) -> Point {
        Point::new(
            self.x as f64 + mx * self.width as f64 / INPUT_SIZE as f64,
            self.y as f64 + my * self.height as f64 / INPUT_SIZE as f64,
        )
    }
}

pub struct FaceMeshDetector {
    detector: FaceDetector,
    session: Session,
}

impl FaceMeshDetector {
    pub fn open(detector_path: &Path, mesh_path: &Path) -> Result<Self, LandmarkError> {
        let detector = FaceDetector::open(detector_path)?;
        if !mesh_path.exists() {
            return Err(LandmarkError::ModelNotFound(mesh_path.display().to_string()));
        }
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(mesh_path))
            .map_err(|e| LandmarkError::Inference(format!("load {}: {e}", mesh_path.display())))?;
        tracing::debug!(path = %mesh_path.display(), "face mesh model loaded");
        Ok(Self { detector, session })
    }

    fn preprocess(frame: &RgbImage, crop: &CropRegion) -> Array4<f32> {
        let region =
            image::imageops::crop_imm(frame, crop.x, crop.y, crop.width, crop.height).to_image();
        let resized = image::imageops::resize(&region, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let size = INPUT_SIZE as usize;
        Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
    }
}

impl LandmarkSource for FaceMeshDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>, LandmarkError> {
        let (width, height) = frame.dimensions();
        let faces = self.detector.detect(frame)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };
        let Some(crop) = CropRegion::around(face, CROP_MARGIN, width, height) else {
            return Ok(None);
        };

        let input = Tensor::from_array(Self::preprocess(frame, &crop))
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;

        let mut mesh: Option<Vec<f32>> = None;
        let mut presence: Option<f32> = None;
        for (_, value) in outputs.iter() {
            let (_, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| LandmarkError::Output(e.to_string()))?;
            match data.len() {
                1 => presence = Some(data[0]),
                n if n >= MESH_POINTS * 3 => mesh = Some(data.to_vec()),
                _ => {}
            }
        }

        let mesh = mesh.ok_or_else(|| LandmarkError::Output("no landmark tensor".into()))?;
        if let Some(logit) = presence {
            if sigmoid(logit) < PRESENCE_THRESHOLD {
                return Ok(None);
            }
        }

        Ok(Some(landmarks_from_mesh(&mesh, &crop)))
    }
}

/// Pick the eye and nose points out of a flat `(x, y, z)` mesh and map them
/// to frame pixels.
pub fn landmarks_from_mesh(mesh: &[f32], crop: &CropRegion) -> LandmarkSet {
    let point = |i: usize| {
        let x = mesh.get(i * 3).copied().unwrap_or(0.0) as f64;
        let y = mesh.get(i * 3 + 1).copied().unwrap_or(0.0) as f64;
        crop.to_frame(x, y)
    };
    LandmarkSet {
        left_eye: LEFT_EYE.map(point),
        right_eye: RIGHT_EYE.map(point),
        nose_tip: point(NOSE_TIP),
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Opens one detector + mesh session pair per video.
#[derive(Debug, Clone)]
pub struct FaceMeshFactory {
    detector_path: PathBuf,
    mesh_path: PathBuf,
}

impl FaceMeshFactory {
    pub fn new(detector_path: impl Into<PathBuf>, mesh_path: impl Into<PathBuf>) -> Self {
        Self {
            detector_path: detector_path.into(),
            mesh_path: mesh_path.into(),
        }
    }

    /// Like [`FaceMeshFactory::new`], but only when both model files exist.
    pub fn locate(
        detector_path: impl Into<PathBuf>,
        mesh_path: impl Into<PathBuf>,
    ) -> Result<Self, LandmarkError> {
        let factory = Self::new(detector_path, mesh_path);
        for path in [&factory.detector_path, &factory.mesh_path] {
            if !path.is_file() {
                return Err(LandmarkError::ModelNotFound(path.display().to_string()));
            }
        }
        Ok(factory)
    }
}

impl LandmarkSourceFactory for FaceMeshFactory {
    fn open(&self) -> Result<Box<dyn LandmarkSource>, LandmarkError> {
        Ok(Box::new(FaceMeshDetector::open(&self.detector_path, &self.mesh_path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32) -> FaceBox {
        FaceBox {
            x1,
            y1,
            x2,
            y2,
            score: 0.9,
        }
    }

    #[test]
    fn test_mesh_indices_in_range() {
        assert!(LEFT_EYE.iter().chain(RIGHT_EYE.iter()).all(|&i| i < MESH_POINTS));
        assert!(NOSE_TIP < MESH_POINTS);
    }

    #[test]
    fn test_crop_is_square_with_margin() {
        // 200x240 face in the middle of a 1280x720 frame.
        let crop = CropRegion::around(&face(540.0, 240.0, 740.0, 480.0), 0.25, 1280, 720).unwrap();
        // side = 240 * 1.5 = 360, centred on (640, 360)
        assert_eq!(
            crop,
            CropRegion {
                x: 460,
                y: 180,
                width: 360,
                height: 360,
            }
        );
    }

    #[test]
    fn test_crop_clamped_to_frame() {
        let crop = CropRegion::around(&face(-20.0, -10.0, 80.0, 90.0), 0.25, 640, 480).unwrap();
        assert_eq!((crop.x, crop.y), (0, 0));
        assert!(crop.x + crop.width <= 640);
        assert!(crop.y + crop.height <= 480);
    }

    #[test]
    fn test_crop_outside_frame_is_none() {
        assert!(CropRegion::around(&face(700.0, 500.0, 800.0, 600.0), 0.0, 640, 480).is_none());
        assert!(CropRegion::around(&face(10.0, 10.0, 10.0, 10.0), 0.25, 640, 480).is_none());
    }

    #[test]
    fn test_small_face_in_large_frame_maps_back() {
        // A face covering a small part of a 1280x720 frame: mesh coordinates
        // land inside the detected box, not spread over the whole frame.
        let crop = CropRegion::around(&face(900.0, 100.0, 996.0, 196.0), 0.25, 1280, 720).unwrap();
        let mut mesh = vec![0.0f32; MESH_POINTS * 3];
        mesh[NOSE_TIP * 3] = 96.0;
        mesh[NOSE_TIP * 3 + 1] = 96.0;
        let set = landmarks_from_mesh(&mesh, &crop);
        assert!((set.nose_tip.x - 948.0).abs() < 1.0);
        assert!((set.nose_tip.y - 148.0).abs() < 1.0);
    }

    #[test]
    fn test_missing_models() {
        let err = FaceMeshFactory::new("/nonexistent/scrfd.onnx", "/nonexistent/face_mesh.onnx")
            .open()
            .err()
            .unwrap();
        assert!(matches!(err, LandmarkError::ModelNotFound(_)));

        let err = FaceMeshFactory::locate("/nonexistent/scrfd.onnx", "/nonexistent/face_mesh.onnx")
            .err()
            .unwrap();
        assert!(matches!(err, LandmarkError::ModelNotFound(p) if p.contains("scrfd")));
    }

    #[test]
    fn test_sigmoid_midpoint() {
        assert_eq!(sigmoid(0.0), 0.5);
    }
}
