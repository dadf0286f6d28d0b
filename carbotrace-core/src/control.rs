//! Device-command seam between the engine and the physical rig
//!
//! The engine never touches serial ports or GPIB. Everything it does to the
//! outside world goes through [`DeviceControl`]: commanding the heater
//! setpoint and moving the sensor in or out of the gas stream. The host
//! wires this trait to its transport layer; tests and dry runs use
//! [`LoggingControl`], which records commands instead of sending them.
//!
//! Position feedback flows the other way. The actuator's limit switches are
//! read by the host, which mirrors them into its `DeviceControl`
//! implementation so [`DeviceControl::position`] can answer; an answer of
//! `None` means the feedback has not arrived yet (distinguishable from
//! either real position, never defaulted).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Command to the sensor positioning actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActuatorCommand {
    /// Push the sensor into the gas stream.
    Push,
    /// Retract the sensor out of the gas stream.
    Retract,
}

/// Reported sensor position, from the actuator's limit switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorPosition {
    /// Sensor is fully pushed into the stream.
    Deployed,
    /// Sensor is fully retracted.
    Retracted,
}

/// Commands the engine issues to the rig.
///
/// Implementations must not block: a command is fire-and-forget, and any
/// acknowledgment comes back later as feedback (`position`) or as samples
/// on the setpoint channel.
pub trait DeviceControl {
    /// Command the heater temperature setpoint, in degC.
    fn set_setpoint(&mut self, celsius: f64);

    /// Command the positioning actuator.
    fn actuate(&mut self, command: ActuatorCommand);

    /// Last known sensor position, `None` until feedback arrives.
    fn position(&self) -> Option<SensorPosition>;
}

/// A command as recorded by [`LoggingControl`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IssuedCommand {
    /// Heater setpoint command, degC.
    Setpoint(f64),
    /// Actuator command.
    Actuate(ActuatorCommand),
}

/// Control implementation that records commands instead of sending them.
///
/// Used by tests to assert exactly which commands a protocol issued, and by
/// hosts for dry runs. Position feedback is injected with
/// [`LoggingControl::set_position`].
#[derive(Debug, Default)]
pub struct LoggingControl {
    issued: Vec<IssuedCommand>,
    position: Option<SensorPosition>,
}

impl LoggingControl {
    /// Empty log, no position feedback yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands issued so far, oldest first.
    pub fn issued(&self) -> &[IssuedCommand] {
        &self.issued
    }

    /// Number of setpoint commands equal to `celsius`.
    pub fn setpoint_count(&self, celsius: f64) -> usize {
        self.issued
            .iter()
            .filter(|c| matches!(c, IssuedCommand::Setpoint(v) if *v == celsius))
            .count()
    }

    /// Inject position feedback, as the host would after reading the
    /// limit switches.
    pub fn set_position(&mut self, position: SensorPosition) {
        self.position = Some(position);
    }
}

impl DeviceControl for LoggingControl {
    fn set_setpoint(&mut self, celsius: f64) {
        crate::log_info!("setpoint -> {} degC", celsius);
        self.issued.push(IssuedCommand::Setpoint(celsius));
    }

    fn actuate(&mut self, command: ActuatorCommand) {
        crate::log_info!("actuator -> {:?}", command);
        self.issued.push(IssuedCommand::Actuate(command));
    }

    fn position(&self) -> Option<SensorPosition> {
        self.position
    }
}
