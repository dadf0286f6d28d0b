//! Local trend estimation over windowed samples
//!
//! A degree-1 least-squares fit over a handful of trailing samples is the
//! engine's only notion of "trend". It is deliberately crude: the signals
//! are low-rate and noisy, and every consumer only asks whether the slope
//! clears a threshold, not what the signal will do next.
//!
//! Fewer than two points (or two points at the same instant) yield the
//! no-trend sentinel `None` rather than an error; the detectors treat that
//! as "nothing to say this tick".

use crate::series::{Sample, TimeSeries};

/// Slope of the best-fit line through `samples`, in value units per second.
///
/// Returns `None` below two points or when all timestamps coincide.
/// Side-effect free.
pub fn linear_slope(samples: &[Sample]) -> Option<f64> {
    let n = samples.len();
    if n < 2 {
        return None;
    }

    let inv_n = 1.0 / n as f64;
    let mean_t: f64 = samples.iter().map(|s| s.timestamp).sum::<f64>() * inv_n;
    let mean_v: f64 = samples.iter().map(|s| s.value).sum::<f64>() * inv_n;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for s in samples {
        let dt = s.timestamp - mean_t;
        covariance += dt * (s.value - mean_v);
        variance += dt * dt;
    }

    if variance > 0.0 {
        Some(covariance / variance)
    } else {
        None
    }
}

/// Trend estimator bound to a trailing window size.
#[derive(Debug, Clone, Copy)]
pub struct TrendEstimator {
    window: usize,
}

impl TrendEstimator {
    /// Estimator over the last `window` samples.
    pub const fn new(window: usize) -> Self {
        Self { window }
    }

    /// The trailing window size in samples.
    pub const fn window(&self) -> usize {
        self.window
    }

    /// Slope over the last `window` samples of `series`, requiring the
    /// window to be completely filled.
    pub fn tail_slope(&self, series: &TimeSeries) -> Option<f64> {
        if series.len() < self.window {
            return None;
        }
        linear_slope(series.tail(self.window))
    }

    /// Slope over the samples within `half_width` seconds of `center`.
    pub fn slope_around(&self, series: &TimeSeries, center: f64, half_width: f64) -> Option<f64> {
        linear_slope(series.slice_around(center, half_width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Sample;
    use proptest::prelude::*;

    fn ramp(slope: f64, n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::new(i as f64, slope * i as f64 + 3.0))
            .collect()
    }

    #[test]
    fn exact_line_recovered() {
        let slope = linear_slope(&ramp(0.25, 10)).unwrap();
        assert!((slope - 0.25).abs() < 1e-12);
    }

    #[test]
    fn too_few_points_is_no_trend() {
        assert!(linear_slope(&[]).is_none());
        assert!(linear_slope(&[Sample::new(0.0, 1.0)]).is_none());
    }

    #[test]
    fn coincident_timestamps_is_no_trend() {
        let samples = [Sample::new(5.0, 1.0), Sample::new(5.0, 2.0)];
        assert!(linear_slope(&samples).is_none());
    }

    #[test]
    fn tail_slope_needs_full_window() {
        let mut series = TimeSeries::new();
        for s in ramp(0.5, 9) {
            series.push(s);
        }
        let est = TrendEstimator::new(10);
        assert!(est.tail_slope(&series).is_none());

        series.push(Sample::new(9.0, 0.5 * 9.0 + 3.0));
        let slope = est.tail_slope(&series).unwrap();
        assert!((slope - 0.5).abs() < 1e-12);
    }

    proptest! {
        /// Noise bounded by eps perturbs the recovered slope by a bounded
        /// amount on a fixed 10-sample 1 Hz window.
        #[test]
        fn slope_recovery_under_bounded_noise(
            true_slope in -1.0f64..1.0,
            offset in -100.0f64..100.0,
            noise in proptest::collection::vec(-0.01f64..0.01, 10),
        ) {
            let samples: Vec<Sample> = noise
                .iter()
                .enumerate()
                .map(|(i, e)| Sample::new(i as f64, true_slope * i as f64 + offset + e))
                .collect();
            let slope = linear_slope(&samples).unwrap();
            // Worst-case leverage of +-0.01 noise on this window is well
            // under 0.01 in slope units
            prop_assert!((slope - true_slope).abs() < 0.01);
        }
    }
}
