//! Resistance-threshold regeneration protocol
//!
//! The short cycle used when only the element itself needs clearing: heat
//! immediately, and stop once the element resistance climbs past the
//! configured threshold (a clean element reads high). No CO2 gating and no
//! carbon accounting.

use crate::control::DeviceControl;

use super::{
    ProtocolCx, ProtocolError, ProtocolKind, ProtocolOutcome, ProtocolResult, ProtocolStatus,
};

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Heating,
    Complete,
    Cancelled,
}

/// The resistance-threshold regeneration FSM.
#[derive(Debug, Default)]
pub struct ResistanceProtocol {
    state: State,
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

impl ResistanceProtocol {
    /// A protocol in `Idle`.
    pub const fn new() -> Self {
        Self { state: State::Idle }
    }

    /// True while heating.
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Heating)
    }

    fn step(&self) -> u8 {
        match self.state {
            State::Idle => 0,
            State::Heating | State::Cancelled => 1,
            State::Complete => 2,
        }
    }

    /// `Idle -> Heating`: commands the regeneration setpoint immediately.
    pub fn start<C: DeviceControl>(&mut self, cx: &mut ProtocolCx<'_, C>) -> ProtocolResult<()> {
        if self.is_active() {
            return Err(ProtocolError::AlreadyActive);
        }
        cx.control.set_setpoint(cx.config.regeneration_temperature);
        self.state = State::Heating;
        crate::log_info!(
            "resistance regeneration started, heating to {} degC",
            cx.config.regeneration_temperature
        );
        Ok(())
    }

    /// Cancel heating: one heater-off command.
    pub fn cancel<C: DeviceControl>(&mut self, cx: &mut ProtocolCx<'_, C>) -> ProtocolResult<()> {
        if !self.is_active() {
            return Err(ProtocolError::NotActive);
        }
        cx.control.set_setpoint(cx.config.low_setpoint);
        self.state = State::Cancelled;
        crate::log_info!("resistance regeneration cancelled");
        Ok(())
    }

    /// Poll the resistance; stop heating once it clears the threshold.
    pub fn manage<C: DeviceControl>(&mut self, cx: &mut ProtocolCx<'_, C>) -> ProtocolStatus {
        match self.state {
            State::Idle => ProtocolStatus::idle(ProtocolKind::ConductanceRegen),
            State::Heating => {
                // Absent reading this tick: keep heating, nothing to decide
                if let Some(resistance) = cx.resistance.last_value() {
                    if resistance > cx.config.resistance_threshold {
                        cx.control.set_setpoint(cx.config.low_setpoint);
                        self.state = State::Complete;
                        crate::log_info!(
                            "resistance {} ohm past threshold, regeneration complete",
                            resistance
                        );
                        return self.status(
                            ProtocolOutcome::Complete,
                            "resistance regeneration complete",
                            100.0,
                        );
                    }
                }
                self.status(ProtocolOutcome::Running, "heating until resistance clears", 50.0)
            }
            State::Complete => self.status(
                ProtocolOutcome::Complete,
                "resistance regeneration complete",
                100.0,
            ),
            State::Cancelled => self.status(
                ProtocolOutcome::Cancelled,
                "resistance regeneration cancelled",
                0.0,
            ),
        }
    }

    fn status(&self, outcome: ProtocolOutcome, message: &'static str, progress: f32) -> ProtocolStatus {
        ProtocolStatus {
            kind: ProtocolKind::ConductanceRegen,
            outcome,
            active: self.is_active(),
            step: self.step(),
            message,
            progress,
        }
    }
}
