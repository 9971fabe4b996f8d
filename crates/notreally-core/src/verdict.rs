//! Authenticity score and narrative summary.

use serde::{Deserialize, Serialize};

use crate::classifier::ClassificationResult;
use crate::vector::ExtractedFeatures;

/// Scores at or above this are reported as real.
pub const REAL_SCORE_THRESHOLD: f64 = 80.0;

pub const LOW_BLINK_RATE: f64 = 10.0;
pub const HIGH_JITTER: f64 = 0.2;
pub const SYNTHETIC_AUDIO_STD: f64 = 0.3;

pub const REAL_SUMMARY: &str = "This appears to be a real video.";
const FALLBACK_CUE: &str = "multiple subtle cues";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub real: f64,
    pub fake: f64,
}

/// The heuristic features reported alongside the score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LegacyFeatures {
    pub blink_rate: f64,
    pub facial_jitter: f64,
    pub audio_mfcc_variance: f64,
}

impl LegacyFeatures {
    /// Absent summaries read as 0.0.
    pub fn from_extracted(features: &ExtractedFeatures) -> Self {
        Self {
            blink_rate: features.video.map_or(0.0, |v| v.avg_blink_rate_per_minute),
            facial_jitter: features.video.map_or(0.0, |v| v.facial_jitter_std_dev),
            audio_mfcc_variance: features.audio.map_or(0.0, |a| a.mfcc_std),
        }
    }

    /// Human-readable indicators triggered by these features.
    pub fn indicators(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.blink_rate < LOW_BLINK_RATE {
            flags.push("low blink rate");
        }
        if self.facial_jitter >= HIGH_JITTER {
            flags.push("high facial jitter");
        }
        if self.audio_mfcc_variance >= SYNTHETIC_AUDIO_STD {
            flags.push("synthetic-sounding audio patterns");
        }
        flags
    }
}

/// Score payload stored for a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub authenticity_score: f64,
    pub confidence: f64,
    pub probabilities: Probabilities,
    pub features: LegacyFeatures,
    pub summary: String,
}

impl Verdict {
    pub fn new(result: ClassificationResult, features: LegacyFeatures) -> Self {
        let prob_real = clamp_unit(result.prob_real);
        let prob_fake = clamp_unit(result.prob_fake);
        let authenticity_score = prob_real * 100.0;
        Self {
            authenticity_score,
            confidence: prob_real.max(prob_fake),
            probabilities: Probabilities {
                real: result.prob_real,
                fake: result.prob_fake,
            },
            summary: summarize(authenticity_score, &features),
            features,
        }
    }
}

/// Narrative for a score and the legacy features behind it.
pub fn summarize(authenticity_score: f64, features: &LegacyFeatures) -> String {
    if authenticity_score >= REAL_SCORE_THRESHOLD {
        return REAL_SUMMARY.to_string();
    }
    let flags = features.indicators();
    let cues = if flags.is_empty() {
        FALLBACK_CUE.to_string()
    } else {
        flags.join(", ")
    };
    format!("Potential deepfake indicators: {cues}.")
}

fn clamp_unit(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(real: f64) -> ClassificationResult {
        ClassificationResult {
            prob_real: real,
            prob_fake: 1.0 - real,
        }
    }

    fn features(blink_rate: f64, facial_jitter: f64, audio_mfcc_variance: f64) -> LegacyFeatures {
        LegacyFeatures {
            blink_rate,
            facial_jitter,
            audio_mfcc_variance,
        }
    }

    #[test]
    fn test_real_summary_at_82() {
        let v = Verdict::new(result(0.82), features(0.0, 5.0, 5.0));
        assert!((v.authenticity_score - 82.0).abs() < 1e-9);
        assert_eq!(v.summary, "This appears to be a real video.");
    }

    #[test]
    fn test_score_of_exactly_80_is_real() {
        assert_eq!(summarize(80.0, &features(0.0, 1.0, 1.0)), REAL_SUMMARY);
    }

    #[test]
    fn test_low_blink_rate_only() {
        let v = Verdict::new(result(0.4), features(8.0, 0.1, 0.1));
        assert_eq!(v.summary, "Potential deepfake indicators: low blink rate.");
        assert!((v.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_all_indicators_joined_in_order() {
        assert_eq!(
            summarize(10.0, &features(2.0, 0.2, 0.3)),
            "Potential deepfake indicators: low blink rate, high facial jitter, \
             synthetic-sounding audio patterns."
        );
    }

    #[test]
    fn test_fallback_cue() {
        assert_eq!(
            summarize(50.0, &features(15.0, 0.05, 0.1)),
            "Potential deepfake indicators: multiple subtle cues."
        );
    }

    #[test]
    fn test_ranges() {
        for p in [0.0, 0.25, 0.5, 0.99, 1.0, 1.2, -0.1] {
            let v = Verdict::new(result(p), LegacyFeatures::default());
            assert!((0.0..=100.0).contains(&v.authenticity_score));
            assert!((0.0..=1.0).contains(&v.confidence));
        }
    }

    #[test]
    fn test_missing_audio_reads_as_zero() {
        let legacy = LegacyFeatures::from_extracted(&ExtractedFeatures::default());
        assert_eq!(legacy, LegacyFeatures::default());
        // Only the blink-rate cue can fire when everything is absent.
        assert_eq!(legacy.indicators(), vec!["low blink rate"]);
    }

    #[test]
    fn test_payload_shape() {
        let v = Verdict::new(result(0.9), features(12.0, 0.01, 0.02));
        let json = serde_json::to_value(&v).unwrap();
        assert!(json["probabilities"]["real"].is_number());
        assert!(json["features"]["audio_mfcc_variance"].is_number());
        assert!(json["summary"].is_string());
    }
}
