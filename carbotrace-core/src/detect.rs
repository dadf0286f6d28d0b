//! Increase/Stabilization Detection over the Conductance Series
//!
//! ## Overview
//!
//! The detector is a small state machine driven once per tick with the full
//! conductance series. It moves through three phases:
//!
//! ```text
//! Quiet ──slope > increase_threshold──▶ Increasing
//!   ▲                                       │
//!   │                      |slope| flat for stability_duration
//!   │                                       ▼
//!   └──conductance < reset_threshold── Stabilized
//! ```
//!
//! The phase is not stored as an enum: the flags `increase_detected` and
//! `stabilized` in [`DetectionState`] *are* the phase, because that is the
//! shape the host consumes and resets. One piece of memory survives the
//! reset edge: after a reset-below-threshold event the detector remembers
//! it, and the next rise refreshes the percolation time instead of leaving
//! the pre-reset one in place.
//!
//! A second, independent watcher follows the CO2 series for the
//! rise-then-peak shape that the thermal regeneration produces. It is armed
//! with a baseline (by the orchestrator when the conductance increase is
//! detected, or by a protocol when heating starts) and raises
//! `co2_peak_detected` once the series has risen clear of the baseline and
//! turned demonstrably downward.
//!
//! ## Edge cases
//!
//! Too few samples for any check is an idempotent no-op, never an error.
//! Out-of-order timestamps are not expected from the single-writer host and
//! are not handled.

use crate::{
    config::EngineConfig,
    series::TimeSeries,
    time::{elapsed, Timestamp},
    trend::{linear_slope, TrendEstimator},
};

/// Qualitative detection flags and reference timestamps for one session.
///
/// Mutated only by [`IncreaseDetector`], [`Co2PeakWatcher`] and the session
/// reset; read by the orchestrator and by external status consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectionState {
    /// Sustained conductance increase in progress or completed.
    pub increase_detected: bool,
    /// Conductance flat for the required duration after an increase.
    pub stabilized: bool,
    /// CO2 passed a local maximum after its rise.
    pub co2_peak_detected: bool,
    /// Onset of the (most recent) sustained increase, T perco.
    ///
    /// Set only on a `Quiet -> Increasing` transition. Preserved across a
    /// `Stabilized -> Quiet` reset; refreshed when conductance rises again
    /// after having fallen below the reset threshold.
    pub percolation_time: Option<Timestamp>,
    /// When stabilization was declared.
    pub stabilization_time: Option<Timestamp>,
    /// When the restabilization watch opened (at the CO2 peak).
    pub restabilization_reference_time: Option<Timestamp>,
    /// Timestamp of the CO2 local maximum.
    pub co2_peak_time: Option<Timestamp>,
    /// Value of the CO2 local maximum, ppm.
    pub co2_peak_value: Option<f64>,
}

impl DetectionState {
    /// Fresh state, nothing detected.
    pub const fn new() -> Self {
        Self {
            increase_detected: false,
            stabilized: false,
            co2_peak_detected: false,
            percolation_time: None,
            stabilization_time: None,
            restabilization_reference_time: None,
            co2_peak_time: None,
            co2_peak_value: None,
        }
    }
}

/// Conductance increase/stabilization detector.
///
/// Holds the slope bookkeeping that is internal to detection; everything
/// the host cares about lands in [`DetectionState`].
#[derive(Debug, Clone)]
pub struct IncreaseDetector {
    estimator: TrendEstimator,
    increase_threshold: f64,
    stability_threshold: f64,
    stability_duration: f64,
    sliding_half_window: f64,
    reset_threshold: f64,
    /// Start of the current flat stretch, cleared whenever the slope leaves
    /// the stability band.
    calm_since: Option<Timestamp>,
    /// Steepest slope seen since the increase, for diagnostics.
    max_slope: f64,
    max_slope_time: Option<Timestamp>,
    /// Set by a reset-below-threshold event; makes the next rise refresh
    /// the percolation time.
    after_reset: bool,
}

impl IncreaseDetector {
    /// Detector configured from the engine thresholds.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            estimator: TrendEstimator::new(config.slope_window),
            increase_threshold: config.increase_threshold,
            stability_threshold: config.stability_threshold,
            stability_duration: config.stability_duration,
            sliding_half_window: config.sliding_half_window,
            reset_threshold: config.conductance_reset_threshold,
            calm_since: None,
            max_slope: 0.0,
            max_slope_time: None,
            after_reset: false,
        }
    }

    /// `Quiet -> Increasing`: slope of the trailing window exceeds the
    /// increase threshold.
    ///
    /// Sets `increase_detected` and records the percolation time as the
    /// start of the window that tripped the check. No-op while already
    /// increasing, after a reset (see
    /// [`check_conductance_increase_after_decrease`][Self::check_conductance_increase_after_decrease]),
    /// or with a partially filled window.
    pub fn detect_increase(&mut self, state: &mut DetectionState, conductance: &TimeSeries) -> bool {
        if state.increase_detected || self.after_reset {
            return false;
        }
        self.rise(state, conductance)
    }

    /// `Quiet -> Increasing` after a reset-below-threshold event.
    ///
    /// Same slope check as [`detect_increase`][Self::detect_increase], but
    /// only armed once [`check_reset_detection_indicators`][Self::check_reset_detection_indicators]
    /// has fired; the percolation time is refreshed to the new rise,
    /// overwriting the value preserved across the reset.
    pub fn check_conductance_increase_after_decrease(
        &mut self,
        state: &mut DetectionState,
        conductance: &TimeSeries,
    ) -> bool {
        if state.increase_detected || !self.after_reset {
            return false;
        }
        if self.rise(state, conductance) {
            self.after_reset = false;
            crate::log_info!(
                "conductance rising again after reset, percolation time refreshed to {:?}",
                state.percolation_time
            );
            true
        } else {
            false
        }
    }

    fn rise(&mut self, state: &mut DetectionState, conductance: &TimeSeries) -> bool {
        let Some(slope) = self.estimator.tail_slope(conductance) else {
            return false;
        };
        if slope <= self.increase_threshold {
            return false;
        }

        let window = conductance.tail(self.estimator.window());
        state.increase_detected = true;
        state.percolation_time = window.first().map(|s| s.timestamp);
        self.max_slope = slope;
        self.max_slope_time = conductance.last_timestamp();
        self.calm_since = None;
        crate::log_info!(
            "increase detected at t={:?}: slope {} uS/s",
            conductance.last_timestamp(),
            slope
        );
        true
    }

    /// `Increasing -> Stabilized`: slope magnitude stays inside the
    /// stability band for the full stability duration, measured on sample
    /// timestamps.
    ///
    /// The slope is re-estimated each tick over a sliding window ending at
    /// the newest sample; a single excursion out of the band restarts the
    /// flat stretch.
    pub fn detect_stabilization(
        &mut self,
        state: &mut DetectionState,
        conductance: &TimeSeries,
    ) -> bool {
        if !state.increase_detected || state.stabilized {
            return false;
        }
        let Some(now) = conductance.last_timestamp() else {
            return false;
        };
        let Some(slope) = self.estimator.slope_around(
            conductance,
            now - self.sliding_half_window,
            self.sliding_half_window,
        ) else {
            return false;
        };

        if slope > self.max_slope {
            self.max_slope = slope;
            self.max_slope_time = Some(now);
        }

        if libm::fabs(slope) < self.stability_threshold {
            let since = *self.calm_since.get_or_insert(now);
            if elapsed(since, now) >= self.stability_duration {
                state.stabilized = true;
                state.stabilization_time = Some(now);
                crate::log_info!(
                    "stabilization detected at t={}: slope {} uS/s",
                    now,
                    slope
                );
                return true;
            }
        } else {
            self.calm_since = None;
        }
        false
    }

    /// `Stabilized -> Quiet`: conductance fell below the reset threshold.
    ///
    /// Clears `increase_detected` and `stabilized` but preserves the
    /// percolation time, and arms the rise-after-decrease check.
    pub fn check_reset_detection_indicators(
        &mut self,
        state: &mut DetectionState,
        conductance: &TimeSeries,
    ) -> bool {
        if !state.stabilized {
            return false;
        }
        let Some(current) = conductance.last_value() else {
            return false;
        };
        if current >= self.reset_threshold {
            return false;
        }

        state.increase_detected = false;
        state.stabilized = false;
        self.calm_since = None;
        self.max_slope = 0.0;
        self.max_slope_time = None;
        self.after_reset = true;
        crate::log_info!(
            "conductance back down to {} uS, detection indicators reset",
            current
        );
        true
    }

    /// Steepest slope observed since the increase, uS/s. Diagnostic only.
    pub fn max_slope(&self) -> f64 {
        self.max_slope
    }

    /// When the steepest slope was observed.
    pub fn max_slope_time(&self) -> Option<Timestamp> {
        self.max_slope_time
    }

    /// Forget all internal bookkeeping (new session).
    pub fn reset(&mut self) {
        self.calm_since = None;
        self.max_slope = 0.0;
        self.max_slope_time = None;
        self.after_reset = false;
    }
}

/// Outcome of one [`Co2PeakWatcher::observe`] call that changed something.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Co2Event {
    /// CO2 rose clear of the baseline.
    RiseDetected {
        /// Timestamp of the sample that cleared the rise threshold.
        at: Timestamp,
    },
    /// CO2 passed its local maximum; restabilization watch opened.
    PeakDetected {
        /// Timestamp of the maximum itself.
        peak_at: Timestamp,
        /// Timestamp at which the watch opened (the current sample).
        watch_from: Timestamp,
    },
}

/// Watches the CO2 series for the rise-then-peak shape of a regeneration.
///
/// Dormant until [`armed`][Self::arm] with a baseline concentration. The
/// peak condition is three-fold, following the bench behavior: the recent
/// maximum must stand clear of the baseline, the current value must have
/// dropped from that maximum, and the short-window slope must be
/// convincingly negative.
#[derive(Debug, Clone, Default)]
pub struct Co2PeakWatcher {
    baseline: Option<f64>,
    rise_detected: bool,
    rise_threshold: f64,
    peak_drop: f64,
    descent_slope: f64,
}

/// Samples scanned backwards for the recent maximum.
const PEAK_LOOKBACK: usize = 10;
/// Samples in the descent-slope check.
const DESCENT_WINDOW: usize = 3;
/// Minimum CO2 samples before peak detection is meaningful.
const MIN_CO2_SAMPLES: usize = 5;

impl Co2PeakWatcher {
    /// Watcher configured from the engine thresholds; starts disarmed.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            baseline: None,
            rise_detected: false,
            rise_threshold: config.co2_rise_threshold,
            peak_drop: config.co2_peak_drop,
            descent_slope: config.co2_peak_descent_slope,
        }
    }

    /// Arm the watcher against a pre-rise baseline, ppm.
    pub fn arm(&mut self, baseline: f64) {
        self.baseline = Some(baseline);
        self.rise_detected = false;
    }

    /// Disarm and forget the baseline.
    pub fn disarm(&mut self) {
        self.baseline = None;
        self.rise_detected = false;
    }

    /// Whether the watcher currently holds a baseline.
    pub fn is_armed(&self) -> bool {
        self.baseline.is_some()
    }

    /// Pre-rise baseline, if armed.
    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Advance the watcher with the current CO2 series.
    ///
    /// Idempotent no-op when disarmed, when the peak is already found, or
    /// with too few samples.
    pub fn observe(&mut self, state: &mut DetectionState, co2: &TimeSeries) -> Option<Co2Event> {
        let baseline = self.baseline?;
        if state.co2_peak_detected {
            return None;
        }
        let last = co2.last()?;

        if !self.rise_detected {
            if last.value - baseline >= self.rise_threshold {
                self.rise_detected = true;
                crate::log_info!(
                    "co2 increase detected: {} ppm over baseline",
                    last.value - baseline
                );
                return Some(Co2Event::RiseDetected { at: last.timestamp });
            }
            return None;
        }

        if co2.len() < MIN_CO2_SAMPLES {
            return None;
        }

        let lookback = co2.tail(PEAK_LOOKBACK);
        let peak = lookback
            .iter()
            .fold(lookback[0], |best, s| if s.value > best.value { *s } else { best });

        let risen_enough = peak.value - baseline >= self.rise_threshold;
        let dropped_enough = peak.value - last.value >= self.peak_drop;
        let descending = linear_slope(co2.tail(DESCENT_WINDOW))
            .map(|slope| slope < self.descent_slope)
            .unwrap_or(false);

        if risen_enough && dropped_enough && descending {
            state.co2_peak_detected = true;
            state.co2_peak_time = Some(peak.timestamp);
            state.co2_peak_value = Some(peak.value);
            state.restabilization_reference_time = Some(last.timestamp);
            crate::log_info!(
                "co2 peak detected: {} ppm at t={}",
                peak.value,
                peak.timestamp
            );
            return Some(Co2Event::PeakDetected {
                peak_at: peak.timestamp,
                watch_from: last.timestamp,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Sample;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn push_ramp(series: &mut TimeSeries, t0: f64, v0: f64, slope: f64, n: usize) {
        for i in 0..n {
            let t = t0 + i as f64;
            series.push(Sample::new(t, v0 + slope * i as f64));
        }
    }

    #[test]
    fn increase_fires_within_one_window() {
        let cfg = config();
        let mut detector = IncreaseDetector::new(&cfg);
        let mut state = DetectionState::new();
        let mut cond = TimeSeries::new();

        // Flat preamble, then a ramp well above the 0.1 uS/s threshold
        push_ramp(&mut cond, 0.0, 1.0, 0.0, 20);
        assert!(!detector.detect_increase(&mut state, &cond));

        push_ramp(&mut cond, 20.0, 1.0, 0.5, 10);
        assert!(detector.detect_increase(&mut state, &cond));
        assert!(state.increase_detected);
        // Percolation time = start of the window that tripped the check
        assert_eq!(state.percolation_time, Some(20.0));
    }

    #[test]
    fn increase_needs_full_window() {
        let cfg = config();
        let mut detector = IncreaseDetector::new(&cfg);
        let mut state = DetectionState::new();
        let mut cond = TimeSeries::new();

        push_ramp(&mut cond, 0.0, 1.0, 0.5, 5); // 5 < slope_window
        assert!(!detector.detect_increase(&mut state, &cond));
        assert!(!state.increase_detected);
    }

    #[test]
    fn stabilization_not_before_duration() {
        let cfg = config();
        let mut detector = IncreaseDetector::new(&cfg);
        let mut state = DetectionState::new();
        let mut cond = TimeSeries::new();

        push_ramp(&mut cond, 0.0, 1.0, 0.5, 10);
        assert!(detector.detect_increase(&mut state, &cond));

        // Hold flat, ticking the detector each second; must not declare
        // stabilization before stability_duration (120 s) has elapsed
        let mut declared_at = None;
        for i in 0..200 {
            let t = 10.0 + i as f64;
            cond.push(Sample::new(t, 6.0));
            if detector.detect_stabilization(&mut state, &cond) {
                declared_at = Some(t);
                break;
            }
        }
        let t = declared_at.expect("stabilization never declared");
        // Flat from t=10 on; slope needs a few samples to settle inside the
        // band, then 120 s must pass
        assert!(t >= 10.0 + cfg.stability_duration);
        assert_eq!(state.stabilization_time, Some(t));
    }

    #[test]
    fn slope_excursion_restarts_flat_stretch() {
        let cfg = config();
        let mut detector = IncreaseDetector::new(&cfg);
        let mut state = DetectionState::new();
        let mut cond = TimeSeries::new();

        push_ramp(&mut cond, 0.0, 1.0, 0.5, 10);
        detector.detect_increase(&mut state, &cond);

        // 60 s flat, then a fresh ramp, then flat again
        for i in 0..60 {
            cond.push(Sample::new(10.0 + i as f64, 6.0));
            assert!(!detector.detect_stabilization(&mut state, &cond));
        }
        push_ramp(&mut cond, 70.0, 6.0, 0.5, 10);
        assert!(!detector.detect_stabilization(&mut state, &cond));

        for i in 0..80 {
            cond.push(Sample::new(80.0 + i as f64, 11.0));
            detector.detect_stabilization(&mut state, &cond);
        }
        // Only ~80 s of renewed flatness (and the sliding window still sees
        // the ramp for a while): not stabilized yet
        assert!(!state.stabilized);
    }

    #[test]
    fn reset_preserves_percolation_and_rerise_refreshes() {
        let cfg = config();
        let mut detector = IncreaseDetector::new(&cfg);
        let mut state = DetectionState::new();
        let mut cond = TimeSeries::new();

        push_ramp(&mut cond, 0.0, 1.0, 0.5, 10);
        detector.detect_increase(&mut state, &cond);
        let first_percolation = state.percolation_time.unwrap();
        state.stabilized = true; // shortcut: stabilization exercised elsewhere

        // Conductance collapses to 4 uS (threshold is 5)
        cond.push(Sample::new(300.0, 4.0));
        assert!(detector.check_reset_detection_indicators(&mut state, &cond));
        assert!(!state.increase_detected);
        assert!(!state.stabilized);
        assert_eq!(state.percolation_time, Some(first_percolation));

        // Plain detect_increase stays quiet while the reset memory is set
        push_ramp(&mut cond, 301.0, 4.0, 0.5, 10);
        assert!(!detector.detect_increase(&mut state, &cond));

        // The rise-after-decrease check refreshes the percolation time
        assert!(detector.check_conductance_increase_after_decrease(&mut state, &cond));
        assert!(state.increase_detected);
        assert_eq!(state.percolation_time, Some(301.0));
    }

    #[test]
    fn reset_requires_stabilized() {
        let cfg = config();
        let mut detector = IncreaseDetector::new(&cfg);
        let mut state = DetectionState::new();
        let mut cond = TimeSeries::new();
        cond.push(Sample::new(0.0, 2.0));

        assert!(!detector.check_reset_detection_indicators(&mut state, &cond));
    }

    #[test]
    fn co2_watcher_dormant_until_armed() {
        let cfg = config();
        let mut watcher = Co2PeakWatcher::new(&cfg);
        let mut state = DetectionState::new();
        let mut co2 = TimeSeries::new();
        push_ramp(&mut co2, 0.0, 400.0, 3.0, 20);

        assert!(watcher.observe(&mut state, &co2).is_none());
        assert!(!state.co2_peak_detected);
    }

    #[test]
    fn co2_rise_then_peak() {
        let cfg = config();
        let mut watcher = Co2PeakWatcher::new(&cfg);
        let mut state = DetectionState::new();
        let mut co2 = TimeSeries::new();

        push_ramp(&mut co2, 0.0, 400.0, 0.0, 5);
        watcher.arm(400.0);

        // Rise: 400 -> 430 over 15 s
        push_ramp(&mut co2, 5.0, 402.0, 2.0, 15);
        let event = watcher.observe(&mut state, &co2);
        assert!(matches!(event, Some(Co2Event::RiseDetected { .. })));

        // Plateau then descent
        co2.push(Sample::new(20.0, 430.5));
        assert!(watcher.observe(&mut state, &co2).is_none());
        for i in 0..5 {
            co2.push(Sample::new(21.0 + i as f64, 429.0 - i as f64 * 1.5));
        }
        let event = watcher.observe(&mut state, &co2);
        match event {
            Some(Co2Event::PeakDetected { peak_at, .. }) => {
                assert_eq!(peak_at, 20.0);
                assert!(state.co2_peak_detected);
                assert_eq!(state.co2_peak_value, Some(430.5));
                assert!(state.restabilization_reference_time.is_some());
            }
            other => panic!("expected peak, got {other:?}"),
        }

        // Further observations are no-ops
        co2.push(Sample::new(30.0, 410.0));
        assert!(watcher.observe(&mut state, &co2).is_none());
    }
}
