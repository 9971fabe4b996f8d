//! Blink counting over a stream of per-frame EAR samples.
//!
//! Raw EAR is noisy, so each sample is pushed into a short FIFO and the
//! window mean is compared against a threshold derived from the same window.
//! A blink is a falling edge of the smoothed EAR through the threshold, with a
//! refractory period so one slow blink is never counted twice.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::threshold::{MadThreshold, ThresholdEstimator};

/// Capacity of the EAR smoothing window.
pub const EAR_WINDOW_CAPACITY: usize = 15;

/// Refractory period in seconds of video time.
const REFRACTORY_SECONDS: f64 = 0.15;

/// Lower bound on the refractory period, in analyzed frames.
const MIN_REFRACTORY_FRAMES: u64 = 2;

/// Fixed-capacity FIFO of raw EAR samples.
#[derive(Debug, Clone)]
pub struct EarWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl EarWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Push a sample, evicting the oldest one when full.
    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Arithmetic mean of the current contents, 0.0 when empty.
    ///
    /// Accumulated relative to the oldest sample so a window of identical
    /// samples yields exactly that sample.
    pub fn mean(&self) -> f64 {
        let Some(&base) = self.samples.front() else {
            return 0.0;
        };
        let offset: f64 = self.samples.iter().map(|s| s - base).sum();
        base + offset / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples oldest first.
    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}

/// Minimum analyzed-frame gap between two counted blinks:
/// `max(2, round((fps / stride) * 0.15))`.
pub fn min_frames_between_blinks(fps: f64, stride: u32) -> u64 {
    let stride = stride.max(1) as f64;
    let analyzed_fps = if fps.is_finite() && fps > 0.0 { fps / stride } else { 0.0 };
    let frames = (analyzed_fps * REFRACTORY_SECONDS).round() as u64;
    frames.max(MIN_REFRACTORY_FRAMES)
}

/// Outcome of feeding one sample to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkObservation {
    pub smoothed_ear: f64,
    pub threshold: f64,
    pub blink: bool,
}

/// Edge-triggered blink state machine.
///
/// All counters are in analyzed frames, not decoded frames.
pub struct BlinkDetector {
    window: EarWindow,
    estimator: Arc<dyn ThresholdEstimator>,
    static_threshold: f64,
    min_gap: u64,
    was_above: bool,
    frames_since_blink: u64,
    blinks: u64,
    smoothed_ear: f64,
    threshold: f64,
}

impl BlinkDetector {
    pub fn new(static_threshold: f64, min_gap: u64) -> Self {
        Self::with_estimator(static_threshold, min_gap, Arc::new(MadThreshold::default()))
    }

    pub fn with_estimator(
        static_threshold: f64,
        min_gap: u64,
        estimator: Arc<dyn ThresholdEstimator>,
    ) -> Self {
        Self {
            window: EarWindow::new(EAR_WINDOW_CAPACITY),
            estimator,
            static_threshold,
            min_gap,
            was_above: true,
            frames_since_blink: u64::MAX,
            blinks: 0,
            smoothed_ear: 0.0,
            threshold: static_threshold,
        }
    }

    /// Feed one raw EAR sample.
    pub fn observe(&mut self, raw_ear: f64) -> BlinkObservation {
        self.window.push(raw_ear);
        self.smoothed_ear = self.window.mean();
        self.threshold = self
            .estimator
            .threshold(&self.window.to_vec(), self.static_threshold);

        let is_below = self.smoothed_ear < self.threshold;
        let blink = self.was_above && is_below && self.frames_since_blink >= self.min_gap;
        if blink {
            self.blinks += 1;
            self.frames_since_blink = 0;
        }
        self.was_above = !is_below;
        self.frames_since_blink = self.frames_since_blink.saturating_add(1);

        BlinkObservation {
            smoothed_ear: self.smoothed_ear,
            threshold: self.threshold,
            blink,
        }
    }

    pub fn blinks(&self) -> u64 {
        self.blinks
    }

    pub fn min_gap(&self) -> u64 {
        self.min_gap
    }

    pub fn smoothed_ear(&self) -> f64 {
        self.smoothed_ear
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}
