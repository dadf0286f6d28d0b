//! Named session timestamps for external annotation
//!
//! The plotting and export layers want to draw markers: "increase detected
//! here", "heater went to 700 degC there". The engine records those moments
//! in an [`EventLog`] as it goes; nothing inside the engine reads them back
//! except the restabilization logic, which anchors on the CO2 peak time
//! held in the detection state, not here.
//!
//! Each field is `None` until its event happens, and cleared on session
//! reset or protocol cancellation where the run's markers stop being
//! meaningful.

use heapless::Vec;

use crate::time::Timestamp;

/// Upper bound on the entries listing; one slot per field.
const MAX_EVENTS: usize = 10;

/// Timestamps of the qualitative events of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventLog {
    /// Onset of the sustained conductance increase (T perco).
    pub percolation: Option<Timestamp>,
    /// Conductance stabilization after the increase.
    pub stabilization: Option<Timestamp>,
    /// Start of the pre-regeneration CO2 stability search.
    pub co2_stability_search_started: Option<Timestamp>,
    /// CO2 stability confirmed; heating is about to start.
    pub co2_stability_achieved: Option<Timestamp>,
    /// Heater commanded to the regeneration setpoint.
    pub regeneration_started: Option<Timestamp>,
    /// Heater commanded back to the low setpoint.
    pub regeneration_ended: Option<Timestamp>,
    /// CO2 risen clear of the pre-heating baseline.
    pub co2_increase_detected: Option<Timestamp>,
    /// CO2 local maximum passed.
    pub co2_peak: Option<Timestamp>,
    /// Restabilization watch opened (at the peak, or when re-anchored).
    pub restabilization_watch_started: Option<Timestamp>,
    /// CO2 back inside the stability band for the full duration.
    pub restabilized: Option<Timestamp>,
}

impl EventLog {
    /// Log with no events recorded.
    pub const fn new() -> Self {
        Self {
            percolation: None,
            stabilization: None,
            co2_stability_search_started: None,
            co2_stability_achieved: None,
            regeneration_started: None,
            regeneration_ended: None,
            co2_increase_detected: None,
            co2_peak: None,
            restabilization_watch_started: None,
            restabilized: None,
        }
    }

    /// The recorded events as `(name, timestamp)` pairs, in protocol order,
    /// skipping events that have not happened.
    pub fn entries(&self) -> Vec<(&'static str, Timestamp), MAX_EVENTS> {
        let mut out = Vec::new();
        let fields = [
            ("percolation", self.percolation),
            ("stabilization", self.stabilization),
            (
                "co2_stability_search_started",
                self.co2_stability_search_started,
            ),
            ("co2_stability_achieved", self.co2_stability_achieved),
            ("regeneration_started", self.regeneration_started),
            ("regeneration_ended", self.regeneration_ended),
            ("co2_increase_detected", self.co2_increase_detected),
            ("co2_peak", self.co2_peak),
            (
                "restabilization_watch_started",
                self.restabilization_watch_started,
            ),
            ("restabilized", self.restabilized),
        ];
        for (name, ts) in fields {
            if let Some(ts) = ts {
                // Capacity matches the field count, cannot overflow
                let _ = out.push((name, ts));
            }
        }
        out
    }

    /// Forget the regeneration-run markers, keeping the detector ones.
    /// Used when a protocol is cancelled mid-run.
    pub fn clear_regeneration_markers(&mut self) {
        self.co2_stability_search_started = None;
        self.co2_stability_achieved = None;
        self.regeneration_started = None;
        self.regeneration_ended = None;
        self.co2_increase_detected = None;
        self.co2_peak = None;
        self.restabilization_watch_started = None;
        self.restabilized = None;
    }

    /// Forget everything; new session.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_skip_unset() {
        let mut log = EventLog::new();
        assert!(log.entries().is_empty());

        log.percolation = Some(42.0);
        log.co2_peak = Some(300.5);
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("percolation", 42.0));
        assert_eq!(entries[1], ("co2_peak", 300.5));
    }

    #[test]
    fn cancellation_keeps_detector_markers() {
        let mut log = EventLog::new();
        log.percolation = Some(10.0);
        log.stabilization = Some(200.0);
        log.regeneration_started = Some(250.0);
        log.co2_peak = Some(260.0);

        log.clear_regeneration_markers();
        assert_eq!(log.percolation, Some(10.0));
        assert_eq!(log.stabilization, Some(200.0));
        assert!(log.regeneration_started.is_none());
        assert!(log.co2_peak.is_none());
    }
}
