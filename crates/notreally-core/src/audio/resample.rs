//! Sample-rate conversion for mono signals.

use rubato::{FftFixedIn, Resampler};

use super::AudioError;

const CHUNK_FRAMES: usize = 1024;

/// Resample a mono signal from `from` Hz to `to` Hz.
///
/// The output is aligned with the input (resampler delay removed) and has
/// `ceil(len * to / from)` samples.
pub fn resample_mono(samples: &[f64], from: u32, to: u32) -> Result<Vec<f64>, AudioError> {
    if from == 0 || to == 0 {
        return Err(AudioError::Resample(format!("invalid rates {from} -> {to}")));
    }
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f64>::new(from as usize, to as usize, CHUNK_FRAMES, 2, 1)
        .map_err(|e| AudioError::Resample(e.to_string()))?;

    let expected = (samples.len() as u64 * to as u64).div_ceil(from as u64) as usize;
    let delay = resampler.output_delay();
    let mut out: Vec<f64> = Vec::with_capacity(expected + delay + CHUNK_FRAMES);

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let n = resampler.input_frames_next();
        let input: [&[f64]; 1] = [&samples[pos..pos + n]];
        let chunk = resampler
            .process(&input[..], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        out.extend_from_slice(&chunk[0]);
        pos += n;
    }
    if pos < samples.len() {
        let input: [&[f64]; 1] = [&samples[pos..]];
        let chunk = resampler
            .process_partial(Some(&input[..]), None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        out.extend_from_slice(&chunk[0]);
    }
    // Flush the delay line.
    while out.len() < expected + delay {
        let chunk = resampler
            .process_partial(None::<&[Vec<f64>]>, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if chunk[0].is_empty() {
            break;
        }
        out.extend_from_slice(&chunk[0]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}

/// Average interleaved channels down to one.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f64> {
    if channels <= 1 {
        return interleaved.iter().map(|&s| s as f64).collect();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().map(|&s| s as f64).sum::<f64>() / channels as f64)
        .collect()
}
