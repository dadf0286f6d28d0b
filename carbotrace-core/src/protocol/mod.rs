//! Regeneration Protocol State Machines
//!
//! ## Overview
//!
//! Three protocols share this module, each an explicit finite-state machine
//! with a single non-blocking `manage()` entry point:
//!
//! - [`regeneration`]: CO2-stability-gated thermal cycle with carbon-mass
//!   accounting,
//! - [`resistance`]: heat until the element resistance clears a threshold,
//! - [`full`]: the seven-step sequence composing sensor retraction, both
//!   stability waits, and the conductance-reset wait.
//!
//! ## Execution model
//!
//! A protocol never sleeps and never spawns work. "Waiting" is a state that
//! persists between `manage()` calls; the host ticks `manage()` once per
//! polling cycle and gets a [`ProtocolStatus`] back. Cancellation is a
//! state transition plus exactly one heater command, valid from any
//! non-terminal state. Elapsed time is measured on sample timestamps, so a
//! tick that delivered no samples advances no timer.
//!
//! The three protocols are mutually exclusive; the session engine refuses
//! to start one while another is active. The waits have no timeout: a
//! protocol waits until its predicate holds or it is cancelled.
//!
//! ## Status shape
//!
//! All three report through the same tagged [`ProtocolStatus`], so the host
//! renders one progress surface regardless of which protocol runs.

pub mod full;
pub mod regeneration;
pub mod resistance;

use thiserror_no_std::Error;

use crate::{
    config::EngineConfig,
    control::DeviceControl,
    detect::{Co2PeakWatcher, DetectionState},
    events::EventLog,
    series::TimeSeries,
    stability::GasStabilityChecker,
};

pub use full::FullProtocol;
pub use regeneration::RegenerationProtocol;
pub use resistance::ResistanceProtocol;

/// Result type for protocol control operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Invalid protocol transitions. Never fatal; state is left unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// `start()` while some protocol is active.
    #[error("another protocol is already active")]
    AlreadyActive,
    /// `cancel()` with no protocol running.
    #[error("no protocol in progress")]
    NotActive,
}

/// Which protocol a status talks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ProtocolKind {
    /// No protocol has run this session.
    None = 0,
    /// CO2-stability-gated regeneration cycle.
    Regeneration = 1,
    /// Resistance-threshold regeneration.
    ConductanceRegen = 2,
    /// Seven-step full protocol.
    Full = 3,
}

/// How a protocol run stands or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ProtocolOutcome {
    /// Not started.
    Idle = 0,
    /// In progress.
    Running = 1,
    /// Ran to completion.
    Complete = 2,
    /// Cancelled before completion; `step` is frozen where it stood.
    Cancelled = 3,
}

/// Snapshot of one protocol, returned by every `manage()` call.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtocolStatus {
    /// Which protocol this describes.
    pub kind: ProtocolKind,
    /// Terminal/non-terminal run state.
    pub outcome: ProtocolOutcome,
    /// True while the protocol still wants `manage()` calls.
    pub active: bool,
    /// Current step, protocol-specific numbering; frozen on cancellation.
    pub step: u8,
    /// Operator-facing description of the current step.
    pub message: &'static str,
    /// Coarse completion estimate, 0-100.
    pub progress: f32,
}

impl ProtocolStatus {
    /// Status for a protocol that has never started.
    pub const fn idle(kind: ProtocolKind) -> Self {
        Self {
            kind,
            outcome: ProtocolOutcome::Idle,
            active: false,
            step: 0,
            message: "not active",
            progress: 0.0,
        }
    }
}

/// Outcome figures of a completed regeneration, retained until the next run
/// overwrites them.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegenerationResult {
    /// CO2 released by the cycle: peak minus pre-rise baseline, ppm.
    pub delta_co2: f64,
    /// Carbon mass corresponding to the delta, micrograms.
    pub carbon_mass_ug: f64,
}

/// Everything a protocol needs for one `start`/`manage`/`cancel` call,
/// borrowed from the session engine. Keeps the FSMs free of references so
/// the engine stays a plain struct.
pub struct ProtocolCx<'a, C: DeviceControl> {
    /// Engine thresholds and durations.
    pub config: &'a EngineConfig,
    /// CO2 stability predicates.
    pub checker: &'a GasStabilityChecker,
    /// Session detection flags (CO2 peak anchors restabilization).
    pub detection: &'a mut DetectionState,
    /// CO2 rise/peak watcher, armed by the protocols at heating start.
    pub watcher: &'a mut Co2PeakWatcher,
    /// Session event markers.
    pub events: &'a mut EventLog,
    /// Device command seam.
    pub control: &'a mut C,
    /// CO2 series.
    pub co2: &'a TimeSeries,
    /// Conductance series.
    pub conductance: &'a TimeSeries,
    /// Resistance series.
    pub resistance: &'a TimeSeries,
}

impl<C: DeviceControl> ProtocolCx<'_, C> {
    /// Reset the CO2 peak bookkeeping.
    ///
    /// Called when a run starts (a peak recorded before the run must not
    /// satisfy this run's restabilization wait) and when it ends.
    pub(crate) fn clear_co2_detection(&mut self) {
        self.detection.co2_peak_detected = false;
        self.detection.co2_peak_time = None;
        self.detection.co2_peak_value = None;
        self.detection.restabilization_reference_time = None;
    }
}
