//! Mel-frequency cepstral coefficients.
//!
//! Matches the conventions of the feature front-end the classifier was
//! trained with: centered zero-padded frames, periodic Hann window, power
//! spectrum, Slaney mel filterbank, dB scaling with an 80 dB floor below the
//! peak, orthonormal DCT-II.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// MFCC analysis parameters
#[derive(Debug, Clone, PartialEq)]
pub struct MfccParams {
    pub n_mfcc: usize,
    pub n_mels: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    /// Dynamic range kept below the loudest bin, in dB. `None` disables clipping.
    pub top_db: Option<f64>,
}

impl Default for MfccParams {
    fn default() -> Self {
        Self {
            n_mfcc: 13,
            n_mels: 128,
            n_fft: 2048,
            hop_length: 512,
            top_db: Some(80.0),
        }
    }
}

const AMIN: f64 = 1e-10;

/// Reusable MFCC front-end for one sample rate.
pub struct Mfcc {
    params: MfccParams,
    window: Vec<f64>,
    mel_basis: Vec<Vec<f64>>,
    fft: Arc<dyn Fft<f64>>,
}

impl Mfcc {
    pub fn new(sample_rate: u32, params: MfccParams) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(params.n_fft);
        Self {
            window: hann_periodic(params.n_fft),
            mel_basis: mel_filterbank(sample_rate as f64, params.n_fft, params.n_mels),
            fft,
            params,
        }
    }

    pub fn params(&self) -> &MfccParams {
        &self.params
    }

    /// Coefficient grid indexed `[coefficient][frame]`.
    pub fn compute(&self, samples: &[f64]) -> Vec<Vec<f64>> {
        let mut mel_db = self.mel_db_frames(samples);
        let n_frames = mel_db.len();

        if let Some(top_db) = self.params.top_db {
            let peak = mel_db
                .iter()
                .flatten()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            let floor = peak - top_db;
            for v in mel_db.iter_mut().flatten() {
                *v = v.max(floor);
            }
        }

        let mut grid = vec![Vec::with_capacity(n_frames); self.params.n_mfcc];
        for frame in &mel_db {
            let coeffs = dct2_ortho(frame, self.params.n_mfcc);
            for (row, c) in grid.iter_mut().zip(coeffs) {
                row.push(c);
            }
        }
        grid
    }

    /// Log-mel energies of centered frames, `[frame][mel]` in dB. Each power
    /// spectrum is projected onto the filterbank as soon as it is computed.
    fn mel_db_frames(&self, samples: &[f64]) -> Vec<Vec<f64>> {
        let n_fft = self.params.n_fft;
        let hop = self.params.hop_length.max(1);
        let pad = n_fft / 2;

        let mut padded = vec![0.0; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let n_frames = 1 + (padded.len() - n_fft) / hop;
        let n_bins = n_fft / 2 + 1;
        let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];
        let mut power = vec![0.0; n_bins];
        let mut frames = Vec::with_capacity(n_frames);

        for f in 0..n_frames {
            let start = f * hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            for (p, c) in power.iter_mut().zip(&buffer[..n_bins]) {
                *p = c.norm_sqr();
            }
            frames.push(
                self.mel_basis
                    .iter()
                    .map(|filter| {
                        let energy: f64 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                        10.0 * energy.max(AMIN).log10()
                    })
                    .collect(),
            );
        }
        frames
    }
}

/// Mean and population standard deviation over every cell of the grid.
pub fn grid_mean_std(grid: &[Vec<f64>]) -> Option<(f64, f64)> {
    let count = grid.iter().map(Vec::len).sum::<usize>();
    if count == 0 {
        return None;
    }
    let n = count as f64;
    let mean = grid.iter().flatten().sum::<f64>() / n;
    let var = grid.iter().flatten().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

fn hann_periodic(size: usize) -> Vec<f64> {
    let n = size as f64;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / n).cos()))
        .collect()
}

// Slaney mel scale: linear below 1 kHz, logarithmic above.
const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        mel * F_SP
    }
}

/// Triangular mel filters with Slaney area normalization, `[mel][bin]`.
fn mel_filterbank(sample_rate: f64, n_fft: usize, n_mels: usize) -> Vec<Vec<f64>> {
    let n_bins = n_fft / 2 + 1;
    let nyquist = sample_rate / 2.0;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|i| i as f64 * nyquist / (n_bins - 1) as f64)
        .collect();

    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(nyquist);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
            let enorm = 2.0 / (hi - lo);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - lo) / (center - lo);
                    let upper = (hi - f) / (hi - center);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II, first `keep` coefficients.
fn dct2_ortho(input: &[f64], keep: usize) -> Vec<f64> {
    let n = input.len() as f64;
    (0..keep)
        .map(|k| {
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, x)| x * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos())
                .sum();
            let scale = if k == 0 { (1.0 / (4.0 * n)).sqrt() } else { (1.0 / (2.0 * n)).sqrt() };
            2.0 * scale * sum
        })
        .collect()
}
