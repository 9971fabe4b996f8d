//! Spectral summary of a media file's audio track.

pub mod decode;
pub mod mfcc;
pub mod resample;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::Extractor;
use mfcc::{grid_mean_std, Mfcc, MfccParams};

/// Sample rate audio is analyzed at.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("no audio track")]
    NoAudioTrack,
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("no audio samples decoded")]
    Empty,
    #[error("transcode failed: {0}")]
    Transcode(String),
    #[error("wav read failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("resample failed: {0}")]
    Resample(String),
}

/// MFCC mean/std summary of the whole audio track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatureSummary {
    pub mfcc_mean: f64,
    pub mfcc_std: f64,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

/// Decodes a mono 16 kHz track and reduces its MFCC grid to two scalars.
#[derive(Debug, Clone)]
pub struct AudioSummarizer {
    ffmpeg: String,
    sample_rate: u32,
    params: MfccParams,
}

impl Default for AudioSummarizer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl AudioSummarizer {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            sample_rate: TARGET_SAMPLE_RATE,
            params: MfccParams::default(),
        }
    }

    /// Summarize the audio of `path`; `None` when there is no usable track.
    pub fn summarize(&self, path: &Path) -> Option<AudioFeatureSummary> {
        let samples = match self.load_mono(path) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "audio unavailable");
                return None;
            }
        };
        summarize_samples(&samples, self.sample_rate, &self.params)
    }

    /// Decode and resample to mono at the analysis rate, falling back to an
    /// external transcode when in-process decoding fails.
    pub fn load_mono(&self, path: &Path) -> Result<Vec<f64>, AudioError> {
        let decoded = match decode::decode_track(path) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::debug!(error = %e, "in-process decode failed, transcoding");
                decode::transcode_and_decode(&self.ffmpeg, path, self.sample_rate)?
            }
        };
        let mono = resample::downmix(&decoded.samples, decoded.channels);
        resample::resample_mono(&mono, decoded.sample_rate, self.sample_rate)
    }
}

impl Extractor<AudioFeatureSummary> for AudioSummarizer {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn try_extract(&self, media: &Path) -> Option<AudioFeatureSummary> {
        self.summarize(media)
    }
}

/// Summarize an already decoded mono signal.
pub fn summarize_samples(
    samples: &[f64],
    sample_rate: u32,
    params: &MfccParams,
) -> Option<AudioFeatureSummary> {
    if samples.is_empty() || sample_rate == 0 {
        return None;
    }
    let grid = Mfcc::new(sample_rate, params.clone()).compute(samples);
    let (mfcc_mean, mfcc_std) = grid_mean_std(&grid)?;
    Some(AudioFeatureSummary {
        mfcc_mean,
        mfcc_std,
        sample_rate,
        duration_seconds: samples.len() as f64 / sample_rate as f64,
    })
}
