//! Feature vector assembly.
//!
//! Slot order is the layout the classifier was trained against. Changing it
//! requires retraining.

use serde::{Deserialize, Serialize};

use crate::audio::AudioFeatureSummary;
use crate::probe::ContainerMetadata;
use crate::video::VideoFeatureSummary;

pub const FEATURE_COUNT: usize = 10;

/// Slot names in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "avg_blink_rate_per_minute",
    "facial_jitter_std_dev",
    "mfcc_mean",
    "mfcc_std",
    "duration_seconds",
    "bit_rate",
    "video_avg_fps",
    "video_width",
    "video_height",
    "audio_sample_rate",
];

/// Output of the three extraction branches for one media file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractedFeatures {
    pub video: Option<VideoFeatureSummary>,
    pub audio: Option<AudioFeatureSummary>,
    pub metadata: Option<ContainerMetadata>,
}

impl ExtractedFeatures {
    pub fn to_feature_vector(&self) -> FeatureVector {
        FeatureVector::build(self.video.as_ref(), self.audio.as_ref(), self.metadata.as_ref())
    }
}

/// Fixed-length classifier input. Every slot is finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Assemble the vector; absent summaries and fields contribute 0.0.
    pub fn build(
        video: Option<&VideoFeatureSummary>,
        audio: Option<&AudioFeatureSummary>,
        metadata: Option<&ContainerMetadata>,
    ) -> Self {
        let meta = |f: fn(&ContainerMetadata) -> Option<f64>| metadata.and_then(f).unwrap_or(0.0);

        Self::from_values([
            video.map_or(0.0, |v| v.avg_blink_rate_per_minute),
            video.map_or(0.0, |v| v.facial_jitter_std_dev),
            audio.map_or(0.0, |a| a.mfcc_mean),
            audio.map_or(0.0, |a| a.mfcc_std),
            meta(|m| m.duration_seconds),
            meta(|m| m.bit_rate.map(|b| b as f64)),
            meta(|m| m.video_avg_fps),
            meta(|m| m.video_width.map(f64::from)),
            meta(|m| m.video_height.map(f64::from)),
            meta(|m| m.audio_sample_rate.map(f64::from)),
        ])
    }

    /// Wrap raw values, replacing NaN and infinities with 0.0.
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values.map(|v| if v.is_finite() { v } else { 0.0 }))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn values(&self) -> [f64; FEATURE_COUNT] {
        self.0
    }

    pub fn get(&self, slot: usize) -> Option<f64> {
        self.0.get(slot).copied()
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self([0.0; FEATURE_COUNT])
    }
}
