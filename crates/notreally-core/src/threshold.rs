//! Blink threshold estimation over the recent EAR window.

/// Static EAR threshold used when no robust estimate is available.
pub const DEFAULT_EAR_THRESHOLD: f64 = 0.21;

/// Strategy for deriving the blink threshold from recent EAR samples.
///
/// `window` holds raw EAR samples, oldest first.
pub trait ThresholdEstimator: Send + Sync {
    fn threshold(&self, window: &[f64], static_threshold: f64) -> f64;
}

/// Always returns the static threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticThreshold;

impl ThresholdEstimator for StaticThreshold {
    fn threshold(&self, _window: &[f64], static_threshold: f64) -> f64 {
        static_threshold
    }
}

/// Robust adaptive threshold: `max(static, median - k * MAD)`.
///
/// Falls back to the static threshold until `min_samples` are available.
#[derive(Debug, Clone, Copy)]
pub struct MadThreshold {
    pub min_samples: usize,
    pub mad_scale: f64,
}

impl Default for MadThreshold {
    fn default() -> Self {
        Self {
            min_samples: 5,
            mad_scale: 1.5,
        }
    }
}

impl ThresholdEstimator for MadThreshold {
    fn threshold(&self, window: &[f64], static_threshold: f64) -> f64 {
        if window.len() < self.min_samples {
            return static_threshold;
        }
        let (Some(med), Some(mad)) = (median(window), median_absolute_deviation(window)) else {
            return static_threshold;
        };
        static_threshold.max(med - self.mad_scale * mad)
    }
}

/// Median of `values`; the mean of the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median of absolute deviations from the median.
pub fn median_absolute_deviation(values: &[f64]) -> Option<f64> {
    let med = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_mad() {
        let values = [1.0, 2.0, 3.0, 4.0, 8.0];
        assert_eq!(median(&values), Some(3.0));
        // deviations from 3: [2, 1, 0, 1, 5] -> median 1
        assert_eq!(median_absolute_deviation(&values), Some(1.0));
    }

    #[test]
    fn test_mad_threshold_needs_five_samples() {
        let estimator = MadThreshold::default();
        let window = [0.5, 0.5, 0.5, 0.5];
        assert_eq!(estimator.threshold(&window, 0.21), 0.21);
    }

    #[test]
    fn test_mad_threshold_adapts_upwards() {
        let estimator = MadThreshold::default();
        // median 0.5, MAD 0.0 -> 0.5
        let window = [0.5; 6];
        assert_eq!(estimator.threshold(&window, 0.21), 0.5);
    }

    #[test]
    fn test_mad_threshold_never_below_static() {
        let estimator = MadThreshold::default();
        let window = [0.0, 0.1, 0.2, 0.3, 0.4];
        // median 0.2, MAD 0.1 -> 0.05, clamped to 0.21
        assert_eq!(estimator.threshold(&window, 0.21), 0.21);
    }

    #[test]
    fn test_static_threshold_ignores_window() {
        assert_eq!(StaticThreshold.threshold(&[0.9; 15], 0.3), 0.3);
    }
}
