//! Facial landmark contract.
//!
//! The analyzer only consumes the handful of points it needs: six points per
//! eye and the nose tip, in pixel coordinates of the source frame. The ONNX
//! detector pair (SCRFD box, then Face Mesh on the crop) lives in
//! [`face_mesh`].

pub mod face_mesh;
pub mod scrfd;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A 2D point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Landmarks for a single detected face in one frame.
///
/// Eye points are ordered `p1..p6`: `p1`/`p4` are the horizontal corners,
/// `(p2, p6)` and `(p3, p5)` are the vertical pairs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub left_eye: [Point; 6],
    pub right_eye: [Point; 6],
    pub nose_tip: Point,
}

impl LandmarkSet {
    /// Average eye aspect ratio of both eyes.
    pub fn mean_ear(&self) -> f64 {
        (eye_aspect_ratio(&self.left_eye) + eye_aspect_ratio(&self.right_eye)) / 2.0
    }

    /// Distance between the centres of the two eyes, where each centre is the
    /// midpoint of that eye's horizontal corners.
    pub fn inter_ocular_distance(&self) -> f64 {
        let left = self.left_eye[0].midpoint(&self.left_eye[3]);
        let right = self.right_eye[0].midpoint(&self.right_eye[3]);
        left.distance(&right)
    }
}

/// Eye aspect ratio: `(d(p2,p6) + d(p3,p5)) / (2 * d(p1,p4))`.
///
/// Returns 0.0 when the horizontal distance is zero, regardless of the
/// vertical distances.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> f64 {
    let [p1, p2, p3, p4, p5, p6] = eye;
    let horizontal = p1.distance(p4);
    if horizontal == 0.0 {
        return 0.0;
    }
    (p2.distance(p6) + p3.distance(p5)) / (2.0 * horizontal)
}

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("landmark model not found: {0}")]
    ModelNotFound(String),
    #[error("landmark inference failed: {0}")]
    Inference(String),
    #[error("unexpected landmark output: {0}")]
    Output(String),
}

/// A facial landmark detector for a single video.
///
/// Returns `Ok(None)` when no face is found in the frame. Only the first face
/// is reported.
pub trait LandmarkSource {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>, LandmarkError>;
}

/// Opens a fresh [`LandmarkSource`] for each video.
///
/// Detector state (tracking, session buffers) is scoped to one video and is
/// released when the returned source is dropped.
pub trait LandmarkSourceFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn LandmarkSource>, LandmarkError>;
}
