//! Detection and protocol engine for conductance gas sensors
//!
//! Turns noisy, low-rate time series (conductance, CO2, resistance
//! temperature) into qualitative events and drives multi-step thermal
//! regeneration protocols on the sensor.
//!
//! Key constraints:
//! - Single logical thread of control: one `tick()` per polling cycle
//! - Nothing blocks or sleeps; all waiting is state between `manage()` calls
//! - Missing samples skip a channel for the tick, never an error
//!
//! ```no_run
//! use carbotrace_core::{SessionEngine, EngineConfig, LoggingControl, TickReadings};
//!
//! let mut engine = SessionEngine::new(EngineConfig::default(), LoggingControl::new());
//! engine.set_auto_mode(true);
//!
//! // Host polling loop: read devices, hand the samples to the engine
//! let report = engine.tick(TickReadings {
//!     conductance: Some((12.0, 3.4, 294_000.0)),
//!     gas: Some((12.0, 412.5, 21.3, 44.0)),
//!     resistance_temp: None,
//! });
//! if report.detection.stabilized {
//!     // annotate plot, export, ...
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(not(feature = "std"))]
extern crate alloc;

// Macros for optional logging
#[cfg(feature = "log")]
macro_rules! log_info {
    ($($arg:tt)*) => { log::info!($($arg)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! log_info {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "log")]
macro_rules! log_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

pub(crate) use {log_debug, log_info};

pub mod config;
pub mod control;
pub mod detect;
pub mod engine;
pub mod events;
pub mod protocol;
pub mod series;
pub mod stability;
pub mod time;
pub mod trend;

// Public API
pub use config::EngineConfig;
pub use control::{ActuatorCommand, DeviceControl, LoggingControl, SensorPosition};
pub use detect::DetectionState;
pub use engine::{ResetScope, SessionEngine, TickReadings, TickReport};
pub use events::EventLog;
pub use protocol::{
    ProtocolError, ProtocolKind, ProtocolOutcome, ProtocolStatus, RegenerationResult,
};
pub use series::{Channel, Sample, TimeSeries};
pub use time::Timestamp;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
