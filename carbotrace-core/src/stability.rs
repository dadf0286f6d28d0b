//! Bounded-variation checks over the CO2 series
//!
//! Both regeneration protocols gate on the same question: has the CO2
//! concentration sat inside a narrow band for long enough? Asked twice, with
//! different anchors:
//!
//! - before heating, over the plain trailing window (`is_stable_now`), and
//! - after the thermal peak, over the trailing window restricted to lie
//!   entirely after the peak (`is_restabilized_after_peak`).
//!
//! A window qualifies when every sample lies within the configured band of
//! the **window mean**. The mean (rather than the window's first sample) is
//! the reference so a slow drift that stays inside the band is judged by
//! the whole window, not by wherever the window happened to open.
//!
//! Restabilization is independent of the heater: the predicate never looks
//! at the setpoint, so it can complete before or after the temperature is
//! back at baseline.
//!
//! Both predicates answer `false` (not an error) when the series does not
//! yet cover the duration.

use crate::{
    config::EngineConfig,
    detect::DetectionState,
    series::{Sample, TimeSeries},
    time::Timestamp,
};

/// Fewest samples a window can hold and still be called a trend.
const MIN_WINDOW_SAMPLES: usize = 3;

/// Read-only stability predicates over the CO2 series.
#[derive(Debug, Clone, Copy)]
pub struct GasStabilityChecker {
    band: f64,
    duration: f64,
}

impl GasStabilityChecker {
    /// Checker configured from the engine thresholds.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            band: config.co2_stable_band,
            duration: config.co2_stable_duration,
        }
    }

    /// True iff every sample of the trailing window lies within the band of
    /// the window mean, and the window covers the full duration.
    pub fn is_stable_now(&self, co2: &TimeSeries) -> bool {
        self.stable_mean(co2).is_some()
    }

    /// Mean of the trailing window when [`is_stable_now`][Self::is_stable_now]
    /// holds. Protocols take their pre-rise CO2 baseline from this.
    pub fn stable_mean(&self, co2: &TimeSeries) -> Option<f64> {
        let window = co2.trailing(self.duration)?;
        self.band_mean(window)
    }

    /// True iff the trailing window both lies entirely after the recorded
    /// CO2 peak and satisfies the band condition.
    ///
    /// Answers `false` until the peak has been detected, and for as long as
    /// the trailing window still reaches back across the peak.
    pub fn is_restabilized_after_peak(&self, co2: &TimeSeries, state: &DetectionState) -> bool {
        self.restabilized_mean(co2, state).is_some()
    }

    /// Mean of the post-peak window when restabilization holds. The
    /// protocols read the restabilized CO2 level off this.
    pub fn restabilized_mean(&self, co2: &TimeSeries, state: &DetectionState) -> Option<f64> {
        if !state.co2_peak_detected {
            return None;
        }
        let peak_time: Timestamp = state.co2_peak_time?;
        let window = co2.trailing(self.duration)?;
        if window.first()?.timestamp < peak_time {
            return None; // window still reaches back across the peak
        }
        self.band_mean(window)
    }

    fn band_mean(&self, window: &[Sample]) -> Option<f64> {
        if window.len() < MIN_WINDOW_SAMPLES {
            return None;
        }
        let mean = window.iter().map(|s| s.value).sum::<f64>() / window.len() as f64;
        let inside = window
            .iter()
            .all(|s| libm::fabs(s.value - mean) <= self.band);
        if inside {
            Some(mean)
        } else {
            None
        }
    }
}
