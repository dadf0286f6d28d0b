//! Session Engine
//!
//! ## Overview
//!
//! [`SessionEngine`] is the single entry point a host polls. Each call to
//! [`tick`][SessionEngine::tick] takes whatever samples the polling cycle
//! produced, appends them to the per-channel series, advances detection and
//! whichever protocol is active, and returns a [`TickReport`] snapshot.
//!
//! ## Execution model
//!
//! One logical thread of control. The engine never blocks, never spawns,
//! and holds no clock of its own: all elapsed-time judgments run on sample
//! timestamps, so a tick that delivered no samples advances nothing.
//!
//! Automatic detection and the protocols share the detection state and the
//! CO2 peak watcher. In automatic mode the detector pipeline runs on every
//! tick, protocol or no protocol; only the automatic regeneration launch is
//! gated on no protocol being active. With automatic mode off, the host
//! drives the individual detector operations itself
//! ([`detect_increase`][SessionEngine::detect_increase] and friends). The
//! CO2 watcher observes in both modes, because the auto pipeline and the
//! protocols both arm it.
//!
//! ## Protocol exclusivity
//!
//! At most one protocol runs at a time. `start_*` answers
//! [`ProtocolError::AlreadyActive`] while any of the three is active;
//! [`cancel_protocol`][SessionEngine::cancel_protocol] answers
//! [`ProtocolError::NotActive`] when none is.

use crate::{
    config::EngineConfig,
    control::DeviceControl,
    detect::{Co2Event, Co2PeakWatcher, DetectionState, IncreaseDetector},
    events::EventLog,
    protocol::{
        FullProtocol, ProtocolCx, ProtocolError, ProtocolKind, ProtocolResult, ProtocolStatus,
        RegenerationProtocol, RegenerationResult, ResistanceProtocol,
    },
    series::{Channel, Sample, TimeSeries},
    stability::GasStabilityChecker,
    time::Timestamp,
};

/// Samples gathered by the host during one polling cycle.
///
/// `None` skips a channel for the tick; that is routine (instruments answer
/// at different rates), never an error.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReadings {
    /// Conductance head: `(timestamp, conductance uS, resistance ohm)`.
    pub conductance: Option<(Timestamp, f64, f64)>,
    /// Gas analyzer: `(timestamp, CO2 ppm, ambient temp degC, humidity %)`.
    pub gas: Option<(Timestamp, f64, f64, f64)>,
    /// Heated element temperature: `(timestamp, degC)`.
    pub resistance_temp: Option<(Timestamp, f64)>,
}

/// Snapshot returned by every [`SessionEngine::tick`] call.
#[derive(Debug, Clone, Copy)]
pub struct TickReport {
    /// Detection flags and reference timestamps after this tick.
    pub detection: DetectionState,
    /// Status of the active (or most recent) protocol.
    pub protocol: ProtocolStatus,
    /// Session event markers after this tick.
    pub events: EventLog,
}

/// What [`SessionEngine::reset`] clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    /// Detection flags, detector bookkeeping, watcher and event markers.
    /// Series data is kept.
    Detection,
    /// Detection state plus one channel's series.
    Channel(Channel),
    /// Everything: detection, events, all series, and the protocol FSMs
    /// back to idle. No device command is issued.
    Session,
}

/// Builds a [`ProtocolCx`] from disjoint engine fields, so a protocol FSM
/// field can be borrowed mutably alongside it.
macro_rules! protocol_cx {
    ($engine:expr) => {
        ProtocolCx {
            config: &$engine.config,
            checker: &$engine.checker,
            detection: &mut $engine.detection,
            watcher: &mut $engine.watcher,
            events: &mut $engine.events,
            control: &mut $engine.control,
            co2: &$engine.co2,
            conductance: &$engine.conductance,
            resistance: &$engine.resistance,
        }
    };
}

/// Detection-and-protocol orchestrator for one measurement session.
#[derive(Debug)]
pub struct SessionEngine<C: DeviceControl> {
    config: EngineConfig,
    control: C,

    conductance: TimeSeries,
    resistance: TimeSeries,
    co2: TimeSeries,
    ambient_temp: TimeSeries,
    humidity: TimeSeries,
    resistance_temp: TimeSeries,
    setpoint: TimeSeries,

    detector: IncreaseDetector,
    watcher: Co2PeakWatcher,
    checker: GasStabilityChecker,
    detection: DetectionState,
    events: EventLog,
    auto_mode: bool,
    /// Latched once automatic mode has launched a regeneration for the
    /// current rise; re-armed by the rise-after-reset path.
    auto_cycle_done: bool,

    regeneration: RegenerationProtocol,
    resistance_regen: ResistanceProtocol,
    full: FullProtocol,
    /// Which protocol `tick()` manages; also which one holds the result
    /// a caller reads afterwards.
    active_kind: ProtocolKind,
}

impl<C: DeviceControl> SessionEngine<C> {
    /// Engine with empty series, detection off, no protocol started.
    pub fn new(config: EngineConfig, control: C) -> Self {
        Self {
            detector: IncreaseDetector::new(&config),
            watcher: Co2PeakWatcher::new(&config),
            checker: GasStabilityChecker::new(&config),
            detection: DetectionState::new(),
            events: EventLog::new(),
            auto_mode: false,
            auto_cycle_done: false,
            conductance: TimeSeries::new(),
            resistance: TimeSeries::new(),
            co2: TimeSeries::new(),
            ambient_temp: TimeSeries::new(),
            humidity: TimeSeries::new(),
            resistance_temp: TimeSeries::new(),
            setpoint: TimeSeries::new(),
            regeneration: RegenerationProtocol::new(),
            resistance_regen: ResistanceProtocol::new(),
            full: FullProtocol::new(),
            active_kind: ProtocolKind::None,
            config,
            control,
        }
    }

    /// Enable or disable the automatic detection pipeline.
    pub fn set_auto_mode(&mut self, enabled: bool) {
        self.auto_mode = enabled;
        crate::log_debug!("auto mode {}", if enabled { "on" } else { "off" });
    }

    /// Whether the automatic detection pipeline runs on `tick()`.
    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    /// Engine thresholds.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current detection flags.
    pub fn detection(&self) -> &DetectionState {
        &self.detection
    }

    /// Session event markers.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// One channel's accumulated series.
    pub fn series(&self, channel: Channel) -> &TimeSeries {
        match channel {
            Channel::Conductance => &self.conductance,
            Channel::Resistance => &self.resistance,
            Channel::Co2 => &self.co2,
            Channel::AmbientTemp => &self.ambient_temp,
            Channel::Humidity => &self.humidity,
            Channel::ResistanceTemp => &self.resistance_temp,
            Channel::Setpoint => &self.setpoint,
        }
    }

    /// The device command seam, for hosts that talk to it directly.
    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    /// Record the commanded heater setpoint the host read back this cycle.
    pub fn record_setpoint(&mut self, timestamp: Timestamp, celsius: f64) {
        self.setpoint.push(Sample::new(timestamp, celsius));
    }

    /// Append one sample to one channel directly, outside the
    /// [`tick`][Self::tick] bundling. Detection only advances on the next
    /// tick.
    pub fn append_sample(&mut self, channel: Channel, timestamp: Timestamp, value: f64) {
        self.series_mut(channel).push(Sample::new(timestamp, value));
    }

    /// Ingest one polling cycle and advance detection and the active
    /// protocol.
    pub fn tick(&mut self, readings: TickReadings) -> TickReport {
        if let Some((t, conductance, resistance)) = readings.conductance {
            self.conductance.push(Sample::new(t, conductance));
            self.resistance.push(Sample::new(t, resistance));
        }
        if let Some((t, co2, temp, humidity)) = readings.gas {
            self.co2.push(Sample::new(t, co2));
            self.ambient_temp.push(Sample::new(t, temp));
            self.humidity.push(Sample::new(t, humidity));
        }
        if let Some((t, temp)) = readings.resistance_temp {
            self.resistance_temp.push(Sample::new(t, temp));
        }

        if self.auto_mode {
            self.run_detection();
            if !self.protocol_active() {
                self.auto_start_regeneration();
            }
        }
        self.observe_co2();
        let protocol = self.manage_protocol();

        TickReport {
            detection: self.detection,
            protocol,
            events: self.events,
        }
    }

    /// One increase check against the conductance series. Hosts running
    /// without automatic mode call this per conductance read; automatic
    /// mode calls it every tick.
    pub fn detect_increase(&mut self) -> bool {
        if !self.detector.detect_increase(&mut self.detection, &self.conductance) {
            return false;
        }
        self.events.percolation = self.detection.percolation_time;
        // A percolation event means CO2 is about to move; baseline the
        // watcher at the current concentration
        if !self.watcher.is_armed() {
            if let Some(baseline) = self.co2.last_value() {
                self.watcher.arm(baseline);
            }
        }
        true
    }

    /// One stabilization check against the conductance series.
    pub fn detect_stabilization(&mut self) -> bool {
        if !self.detector.detect_stabilization(&mut self.detection, &self.conductance) {
            return false;
        }
        self.events.stabilization = self.detection.stabilization_time;
        true
    }

    /// Clear the detection flags if the conductance fell below the reset
    /// threshold.
    pub fn check_reset_detection_indicators(&mut self) -> bool {
        self.detector
            .check_reset_detection_indicators(&mut self.detection, &self.conductance)
    }

    /// Check for a fresh rise after a reset-below-threshold event.
    pub fn check_conductance_increase_after_decrease(&mut self) -> bool {
        if !self
            .detector
            .check_conductance_increase_after_decrease(&mut self.detection, &self.conductance)
        {
            return false;
        }
        self.events.percolation = self.detection.percolation_time;
        // A fresh rise re-arms the automatic regeneration cycle
        self.auto_cycle_done = false;
        true
    }

    /// One CO2 watcher observation, outside the tick. No-op while disarmed.
    pub fn detect_co2_peak(&mut self) {
        self.observe_co2();
    }

    /// The automatic pipeline: increase, stabilization, reset,
    /// rise-after-reset, in that order on each tick.
    fn run_detection(&mut self) {
        self.detect_increase();
        self.detect_stabilization();
        self.check_reset_detection_indicators();
        self.check_conductance_increase_after_decrease();

        // After the peak, note restabilization once
        if self.detection.co2_peak_detected
            && self.events.restabilized.is_none()
            && self.checker.is_restabilized_after_peak(&self.co2, &self.detection)
        {
            self.events.restabilized = self.co2.last_timestamp();
        }
    }

    /// Once per rise: launch the regeneration cycle when the conductance
    /// has stabilized and nothing else is running.
    fn auto_start_regeneration(&mut self) {
        if !self.detection.stabilized || self.auto_cycle_done {
            return;
        }
        let mut cx = protocol_cx!(self);
        if self.regeneration.start(&mut cx).is_ok() {
            self.active_kind = ProtocolKind::Regeneration;
            self.auto_cycle_done = true;
            crate::log_info!("automatic mode launching regeneration");
        }
    }

    /// The CO2 watcher runs whether the baseline came from auto detection
    /// or from a protocol.
    fn observe_co2(&mut self) {
        match self.watcher.observe(&mut self.detection, &self.co2) {
            Some(Co2Event::RiseDetected { at }) => {
                self.events.co2_increase_detected = Some(at);
            }
            Some(Co2Event::PeakDetected { peak_at, watch_from }) => {
                self.events.co2_peak = Some(peak_at);
                self.events.restabilization_watch_started = Some(watch_from);
            }
            None => {}
        }
    }

    fn manage_protocol(&mut self) -> ProtocolStatus {
        match self.active_kind {
            ProtocolKind::None => ProtocolStatus::idle(ProtocolKind::None),
            ProtocolKind::Regeneration => {
                let mut cx = protocol_cx!(self);
                self.regeneration.manage(&mut cx)
            }
            ProtocolKind::ConductanceRegen => {
                let mut cx = protocol_cx!(self);
                self.resistance_regen.manage(&mut cx)
            }
            ProtocolKind::Full => {
                let mut cx = protocol_cx!(self);
                self.full.manage(&mut cx)
            }
        }
    }

    fn protocol_active(&self) -> bool {
        self.regeneration.is_active()
            || self.resistance_regen.is_active()
            || self.full.is_active()
    }

    fn guard_exclusive(&self) -> ProtocolResult<()> {
        if self.protocol_active() {
            Err(ProtocolError::AlreadyActive)
        } else {
            Ok(())
        }
    }

    /// Start the CO2-stability-gated regeneration cycle.
    pub fn start_regeneration(&mut self) -> ProtocolResult<()> {
        self.guard_exclusive()?;
        let mut cx = protocol_cx!(self);
        self.regeneration.start(&mut cx)?;
        self.active_kind = ProtocolKind::Regeneration;
        Ok(())
    }

    /// Start the resistance-threshold regeneration.
    pub fn start_resistance_regeneration(&mut self) -> ProtocolResult<()> {
        self.guard_exclusive()?;
        let mut cx = protocol_cx!(self);
        self.resistance_regen.start(&mut cx)?;
        self.active_kind = ProtocolKind::ConductanceRegen;
        Ok(())
    }

    /// Start the seven-step full protocol.
    pub fn start_full_protocol(&mut self) -> ProtocolResult<()> {
        self.guard_exclusive()?;
        let mut cx = protocol_cx!(self);
        self.full.start(&mut cx)?;
        self.active_kind = ProtocolKind::Full;
        Ok(())
    }

    /// Cancel whichever protocol is active.
    pub fn cancel_protocol(&mut self) -> ProtocolResult<()> {
        if self.regeneration.is_active() {
            let mut cx = protocol_cx!(self);
            return self.regeneration.cancel(&mut cx);
        }
        if self.resistance_regen.is_active() {
            let mut cx = protocol_cx!(self);
            return self.resistance_regen.cancel(&mut cx);
        }
        if self.full.is_active() {
            let mut cx = protocol_cx!(self);
            return self.full.cancel(&mut cx);
        }
        Err(ProtocolError::NotActive)
    }

    /// Re-evaluate and report the active (or most recent) protocol's status
    /// without ingesting new samples.
    pub fn protocol_status(&mut self) -> ProtocolStatus {
        self.manage_protocol()
    }

    /// Result figures of the most recent completed regeneration run.
    pub fn last_regeneration_result(&self) -> Option<RegenerationResult> {
        match self.active_kind {
            ProtocolKind::Regeneration => self.regeneration.last_result(),
            ProtocolKind::Full => self.full.last_result(),
            _ => None,
        }
    }

    /// Clear state per `scope`. Never issues a device command.
    pub fn reset(&mut self, scope: ResetScope) {
        self.detection = DetectionState::new();
        self.detector.reset();
        self.watcher.disarm();
        self.events.clear();
        self.auto_cycle_done = false;
        match scope {
            ResetScope::Detection => {}
            ResetScope::Channel(channel) => {
                self.series_mut(channel).clear();
            }
            ResetScope::Session => {
                for channel in Channel::ALL {
                    self.series_mut(channel).clear();
                }
                self.regeneration = RegenerationProtocol::new();
                self.resistance_regen = ResistanceProtocol::new();
                self.full = FullProtocol::new();
                self.active_kind = ProtocolKind::None;
            }
        }
        crate::log_info!("engine reset ({:?})", scope);
    }

    fn series_mut(&mut self, channel: Channel) -> &mut TimeSeries {
        match channel {
            Channel::Conductance => &mut self.conductance,
            Channel::Resistance => &mut self.resistance,
            Channel::Co2 => &mut self.co2,
            Channel::AmbientTemp => &mut self.ambient_temp,
            Channel::Humidity => &mut self.humidity,
            Channel::ResistanceTemp => &mut self.resistance_temp,
            Channel::Setpoint => &mut self.setpoint,
        }
    }
}
