//! Facial jitter: frame-to-frame nose movement, normalized by face scale.

use crate::landmarks::{LandmarkSet, Point};

/// Exponential smoothing factor for nose displacement.
pub const JITTER_ALPHA: f64 = 0.2;

/// Tracks smoothed nose displacement across analyzed frames.
#[derive(Debug, Clone)]
pub struct JitterTracker {
    alpha: f64,
    prev_nose: Option<Point>,
    samples: Vec<f64>,
}

impl Default for JitterTracker {
    fn default() -> Self {
        Self::new(JITTER_ALPHA)
    }
}

impl JitterTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            prev_nose: None,
            samples: Vec::new(),
        }
    }

    /// Record one analyzed frame. Returns the smoothed sample, or `None` for
    /// the first frame (no previous nose position).
    pub fn observe(&mut self, landmarks: &LandmarkSet) -> Option<f64> {
        let nose = landmarks.nose_tip;
        let sample = self.prev_nose.map(|prev| {
            let scale = match landmarks.inter_ocular_distance() {
                d if d == 0.0 => 1.0,
                d => d,
            };
            let displacement = nose.distance(&prev) / scale;
            match self.samples.last() {
                Some(&last) => self.alpha * displacement + (1.0 - self.alpha) * last,
                None => displacement,
            }
        });
        if let Some(s) = sample {
            self.samples.push(s);
        }
        self.prev_nose = Some(nose);
        sample
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Population standard deviation of the smoothed samples.
    pub fn std_dev(&self) -> f64 {
        population_std_dev(&self.samples)
    }
}

/// Population standard deviation; 0.0 for an empty slice.
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
