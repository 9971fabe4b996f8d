//! Blink-rate and facial-jitter analysis over a video's landmark stream.
//!
//! A deepfake often gets blinking wrong (too rare, too regular) and shows
//! unnatural high-frequency motion around the face. This module turns a
//! sequence of per-frame landmark sets into two scalars capturing both.
//!
//! Only frames with a detected face are "analyzed": frames without one do not
//! touch the EAR window, the blink state, the jitter sequence or the
//! refractory counter.

pub mod extractor;
pub mod frames;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::blink::{min_frames_between_blinks, BlinkDetector};
use crate::jitter::JitterTracker;
use crate::landmarks::LandmarkSet;
use crate::threshold::{ThresholdEstimator, DEFAULT_EAR_THRESHOLD};

/// Default analysis stride: every 5th decoded frame is offered for analysis.
pub const DEFAULT_FRAME_STRIDE: u32 = 5;

/// Tunables for a single video analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerParams {
    /// Only every `frame_stride`-th frame is analyzed. 0 is treated as 1.
    pub frame_stride: u32,
    /// Static EAR blink threshold; the adaptive threshold never drops below it.
    pub ear_threshold: f64,
}

impl Default for AnalyzerParams {
    fn default() -> Self {
        Self {
            frame_stride: DEFAULT_FRAME_STRIDE,
            ear_threshold: DEFAULT_EAR_THRESHOLD,
        }
    }
}

impl AnalyzerParams {
    pub fn stride(&self) -> u32 {
        self.frame_stride.max(1)
    }
}

/// Per-video blink and jitter summary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoFeatureSummary {
    pub avg_blink_rate_per_minute: f64,
    pub facial_jitter_std_dev: f64,
    pub frames_analyzed: u64,
    /// Raw number of counted blinks.
    #[serde(default)]
    pub blinks: u64,
}

/// Streaming analyzer: feed frames in order with [`observe`](Self::observe),
/// then call [`finish`](Self::finish).
pub struct BlinkJitterAnalyzer {
    fps: f64,
    stride: u32,
    blink: BlinkDetector,
    jitter: JitterTracker,
    frames_analyzed: u64,
}

impl BlinkJitterAnalyzer {
    pub fn new(fps: f64, params: AnalyzerParams) -> Self {
        let stride = params.stride();
        Self {
            fps,
            stride,
            blink: BlinkDetector::new(params.ear_threshold, min_frames_between_blinks(fps, stride)),
            jitter: JitterTracker::default(),
            frames_analyzed: 0,
        }
    }

    /// Use a custom threshold strategy instead of median/MAD.
    pub fn with_estimator(
        fps: f64,
        params: AnalyzerParams,
        estimator: Arc<dyn ThresholdEstimator>,
    ) -> Self {
        let stride = params.stride();
        Self {
            fps,
            stride,
            blink: BlinkDetector::with_estimator(
                params.ear_threshold,
                min_frames_between_blinks(fps, stride),
                estimator,
            ),
            jitter: JitterTracker::default(),
            frames_analyzed: 0,
        }
    }

    /// Offer one sampled frame. `None` means no face was found in it.
    pub fn observe(&mut self, frame_index: u64, landmarks: Option<&LandmarkSet>) {
        let Some(landmarks) = landmarks else {
            return;
        };

        let obs = self.blink.observe(landmarks.mean_ear());
        if obs.blink {
            tracing::trace!(
                frame = frame_index,
                ear = obs.smoothed_ear,
                threshold = obs.threshold,
                "blink"
            );
        }
        self.jitter.observe(landmarks);
        self.frames_analyzed += 1;
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    pub fn blinks(&self) -> u64 {
        self.blink.blinks()
    }

    pub fn finish(self) -> VideoFeatureSummary {
        let blinks = self.blink.blinks();
        let minutes = if self.fps > 0.0 {
            (self.frames_analyzed as f64 * self.stride as f64) / (self.fps * 60.0)
        } else {
            0.0
        };
        let avg_blink_rate_per_minute = if minutes > 0.0 {
            blinks as f64 / minutes
        } else {
            blinks as f64
        };

        VideoFeatureSummary {
            avg_blink_rate_per_minute,
            facial_jitter_std_dev: self.jitter.std_dev(),
            frames_analyzed: self.frames_analyzed,
            blinks,
        }
    }
}

/// Analyze a complete landmark stream of `(frame_index, landmarks)` pairs.
pub fn analyze<I>(fps: f64, params: AnalyzerParams, frames: I) -> VideoFeatureSummary
where
    I: IntoIterator<Item = (u64, Option<LandmarkSet>)>,
{
    let mut analyzer = BlinkJitterAnalyzer::new(fps, params);
    for (index, landmarks) in frames {
        analyzer.observe(index, landmarks.as_ref());
    }
    analyzer.finish()
}
