//! Seven-step full regeneration protocol
//!
//! The complete bench sequence, composing the sensor actuator, both CO2
//! stability waits, and the conductance-reset wait:
//!
//! ```text
//! 1. retract sensor (await position feedback)
//! 2. await CO2 stability
//! 3. heater to regeneration setpoint
//! 4. await conductance below the reset threshold
//! 5. heater to low setpoint
//! 6. await CO2 restabilization after the peak
//! 7. compute the regeneration result -> Complete
//! ```
//!
//! Steps are ordered and non-skippable. Command steps (3 and 5) execute
//! and advance within the same tick; waiting steps hold until their
//! predicate answers. Cancellation is valid from steps 1-6, issues exactly
//! one heater-off command, freezes the step where it stood, and leaves all
//! series data untouched.

use crate::{
    control::{ActuatorCommand, DeviceControl, SensorPosition},
};

use super::{
    ProtocolCx, ProtocolError, ProtocolKind, ProtocolOutcome, ProtocolResult, ProtocolStatus,
    RegenerationResult,
};

/// Step count; progress is `step / STEPS * 100`.
const STEPS: f32 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Retracting,
    AwaitStability,
    HeaterOn,
    AwaitConductanceDrop,
    HeaterOff,
    AwaitRestabilization,
    Finalize,
}

impl Step {
    const fn number(self) -> u8 {
        match self {
            Step::Retracting => 1,
            Step::AwaitStability => 2,
            Step::HeaterOn => 3,
            Step::AwaitConductanceDrop => 4,
            Step::HeaterOff => 5,
            Step::AwaitRestabilization => 6,
            Step::Finalize => 7,
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Step::Retracting => "retracting sensor",
            Step::AwaitStability => "awaiting CO2 stability",
            Step::HeaterOn => "heater to regeneration setpoint",
            Step::AwaitConductanceDrop => "awaiting conductance reset",
            Step::HeaterOff => "heater to low setpoint",
            Step::AwaitRestabilization => "awaiting CO2 restabilization",
            Step::Finalize => "computing regeneration result",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Running { step: Step, baseline: Option<f64> },
    Complete,
    Cancelled { step: u8 },
}

/// The seven-step full protocol FSM.
#[derive(Debug)]
pub struct FullProtocol {
    state: State,
    last_result: Option<RegenerationResult>,
}

impl Default for FullProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl FullProtocol {
    /// A protocol in `Idle`.
    pub const fn new() -> Self {
        Self {
            state: State::Idle,
            last_result: None,
        }
    }

    /// True while the sequence wants `manage()` calls.
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// Result of the last completed run, until the next run overwrites it.
    pub fn last_result(&self) -> Option<RegenerationResult> {
        self.last_result
    }

    /// `Idle -> step 1`: commands the actuator to retract the sensor.
    pub fn start<C: DeviceControl>(&mut self, cx: &mut ProtocolCx<'_, C>) -> ProtocolResult<()> {
        if self.is_active() {
            return Err(ProtocolError::AlreadyActive);
        }
        // A peak left over from before this run must not satisfy step 6
        cx.clear_co2_detection();
        cx.control.actuate(ActuatorCommand::Retract);
        self.state = State::Running {
            step: Step::Retracting,
            baseline: None,
        };
        crate::log_info!("full protocol started: retracting sensor");
        Ok(())
    }

    /// Cancel from steps 1-6: one heater-off command, step frozen, series
    /// data untouched.
    pub fn cancel<C: DeviceControl>(&mut self, cx: &mut ProtocolCx<'_, C>) -> ProtocolResult<()> {
        let State::Running { step, .. } = self.state else {
            return Err(ProtocolError::NotActive);
        };
        cx.control.set_setpoint(cx.config.low_setpoint);
        cx.watcher.disarm();
        cx.events.clear_regeneration_markers();
        self.state = State::Cancelled {
            step: step.number(),
        };
        crate::log_info!("full protocol cancelled at step {}", step.number());
        Ok(())
    }

    /// Advance the sequence one tick and report.
    pub fn manage<C: DeviceControl>(&mut self, cx: &mut ProtocolCx<'_, C>) -> ProtocolStatus {
        let State::Running { mut step, mut baseline } = self.state else {
            return match self.state {
                State::Idle => ProtocolStatus::idle(ProtocolKind::Full),
                State::Complete => self.terminal(ProtocolOutcome::Complete, 7, "full protocol complete"),
                State::Cancelled { step } => {
                    self.terminal(ProtocolOutcome::Cancelled, step, "full protocol cancelled")
                }
                State::Running { .. } => unreachable!(),
            };
        };

        // Settled CO2 level, alive only across the 6 -> 7 hop within a tick
        let mut settled = None;

        // Command steps advance within the tick; wait steps break out
        loop {
            match step {
                Step::Retracting => {
                    if cx.control.position() != Some(SensorPosition::Retracted) {
                        break;
                    }
                    step = Step::AwaitStability;
                }
                Step::AwaitStability => {
                    let Some(mean) = cx.checker.stable_mean(cx.co2) else {
                        break;
                    };
                    baseline = Some(mean);
                    cx.events.co2_stability_achieved = cx.co2.last_timestamp();
                    step = Step::HeaterOn;
                }
                Step::HeaterOn => {
                    cx.control.set_setpoint(cx.config.regeneration_temperature);
                    cx.events.regeneration_started = cx.co2.last_timestamp();
                    if let Some(mean) = baseline {
                        cx.watcher.arm(mean);
                    }
                    step = Step::AwaitConductanceDrop;
                }
                Step::AwaitConductanceDrop => {
                    let below = cx
                        .conductance
                        .last_value()
                        .map(|g| g < cx.config.conductance_reset_threshold)
                        .unwrap_or(false);
                    if !below {
                        break;
                    }
                    step = Step::HeaterOff;
                }
                Step::HeaterOff => {
                    cx.control.set_setpoint(cx.config.low_setpoint);
                    cx.events.regeneration_ended = cx.co2.last_timestamp();
                    step = Step::AwaitRestabilization;
                }
                Step::AwaitRestabilization => {
                    let Some(mean) = cx.checker.restabilized_mean(cx.co2, cx.detection) else {
                        break;
                    };
                    cx.events.restabilized = cx.co2.last_timestamp();
                    settled = Some(mean);
                    step = Step::Finalize;
                }
                Step::Finalize => {
                    let baseline_ppm = baseline.unwrap_or(0.0);
                    let peak = cx
                        .detection
                        .co2_peak_value
                        .or(settled)
                        .unwrap_or(baseline_ppm);
                    let delta_co2 = peak - baseline_ppm;
                    self.last_result = Some(RegenerationResult {
                        delta_co2,
                        carbon_mass_ug: cx.config.carbon_mass_ug(delta_co2),
                    });
                    cx.watcher.disarm();
                    cx.clear_co2_detection();
                    self.state = State::Complete;
                    crate::log_info!("full protocol complete: delta CO2 {} ppm", delta_co2);
                    return self.terminal(ProtocolOutcome::Complete, 7, "full protocol complete");
                }
            }
        }

        self.state = State::Running { step, baseline };
        ProtocolStatus {
            kind: ProtocolKind::Full,
            outcome: ProtocolOutcome::Running,
            active: true,
            step: step.number(),
            message: step.message(),
            progress: step.number() as f32 / STEPS * 100.0,
        }
    }

    fn terminal(&self, outcome: ProtocolOutcome, step: u8, message: &'static str) -> ProtocolStatus {
        ProtocolStatus {
            kind: ProtocolKind::Full,
            outcome,
            active: false,
            step,
            message,
            progress: if outcome == ProtocolOutcome::Complete {
                100.0
            } else {
                step as f32 / STEPS * 100.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::Rig;
    use super::*;
    use crate::control::IssuedCommand;

    #[test]
    fn waits_for_position_feedback() {
        let mut rig = Rig::new();
        let mut protocol = FullProtocol::new();
        protocol.start(&mut rig.cx()).unwrap();
        assert_eq!(
            rig.control.issued(),
            &[IssuedCommand::Actuate(ActuatorCommand::Retract)]
        );

        // No feedback yet: stuck at step 1
        let status = protocol.manage(&mut rig.cx());
        assert_eq!(status.step, 1);

        rig.control.set_position(SensorPosition::Retracted);
        let status = protocol.manage(&mut rig.cx());
        assert_eq!(status.step, 2);
        assert!((status.progress - 2.0 / 7.0 * 100.0).abs() < 0.01);
    }

    #[test]
    fn command_steps_advance_same_tick() {
        let mut rig = Rig::new();
        let mut protocol = FullProtocol::new();
        protocol.start(&mut rig.cx()).unwrap();
        rig.control.set_position(SensorPosition::Retracted);

        // Stable CO2 and conductance still high: step 3 fires and the
        // sequence lands on step 4 in the same manage() call
        rig.co2_flat(0.0, 400.0, 150);
        rig.conductance_at(149.0, 20.0);
        let status = protocol.manage(&mut rig.cx());
        assert_eq!(status.step, 4);
        assert_eq!(rig.control.setpoint_count(700.0), 1);
        assert!(rig.watcher.is_armed());
    }

    #[test]
    fn cancel_at_step_4_issues_one_heater_off() {
        let mut rig = Rig::new();
        let mut protocol = FullProtocol::new();
        protocol.start(&mut rig.cx()).unwrap();
        rig.control.set_position(SensorPosition::Retracted);
        rig.co2_flat(0.0, 400.0, 150);
        rig.conductance_at(149.0, 20.0);
        protocol.manage(&mut rig.cx()); // parked at step 4

        protocol.cancel(&mut rig.cx()).unwrap();
        assert_eq!(rig.control.setpoint_count(0.0), 1);

        let status = protocol.manage(&mut rig.cx());
        assert_eq!(status.outcome, ProtocolOutcome::Cancelled);
        assert!(!status.active);
        assert_eq!(status.step, 4); // frozen
        // Series data untouched by cancellation
        assert_eq!(rig.co2.len(), 150);
        assert_eq!(rig.conductance.len(), 1);
    }

    #[test]
    fn full_sequence_to_completion() {
        let mut rig = Rig::new();
        let mut protocol = FullProtocol::new();
        protocol.start(&mut rig.cx()).unwrap();
        rig.control.set_position(SensorPosition::Retracted);

        // Steps 2-4: stability, heater on, conductance drops
        rig.co2_flat(0.0, 400.0, 150);
        rig.conductance_at(149.0, 20.0);
        protocol.manage(&mut rig.cx());
        rig.conductance_at(200.0, 3.0); // below the 5 uS reset threshold
        let status = protocol.manage(&mut rig.cx());
        // Heater off fired, now awaiting restabilization
        assert_eq!(status.step, 6);
        assert_eq!(rig.control.setpoint_count(0.0), 1);

        // Thermal CO2 peak, recorded by the watcher in the engine tick
        rig.detection.co2_peak_detected = true;
        rig.detection.co2_peak_time = Some(210.0);
        rig.detection.co2_peak_value = Some(430.0);

        rig.co2_flat(211.0, 405.0, 140);
        let status = protocol.manage(&mut rig.cx());
        assert_eq!(status.outcome, ProtocolOutcome::Complete);
        assert_eq!(status.step, 7);
        assert_eq!(status.progress, 100.0);

        let result = protocol.last_result().unwrap();
        assert!((result.delta_co2 - 30.0).abs() < 1e-9);
    }

    #[test]
    fn stale_peak_from_before_the_run_is_ignored() {
        let mut rig = Rig::new();
        let mut protocol = FullProtocol::new();
        rig.detection.co2_peak_detected = true;
        rig.detection.co2_peak_time = Some(10.0);
        rig.detection.co2_peak_value = Some(406.0);

        protocol.start(&mut rig.cx()).unwrap();
        assert!(!rig.detection.co2_peak_detected);
        rig.control.set_position(SensorPosition::Retracted);

        // Flat CO2 and an immediate conductance reset carry the sequence to
        // step 6; without a peak in the run it must park there
        rig.co2_flat(0.0, 400.0, 300);
        rig.conductance_at(299.0, 3.0);
        let status = protocol.manage(&mut rig.cx());
        assert_eq!(status.step, 6);
        assert!(status.active);
        assert!(protocol.last_result().is_none());
    }

    #[test]
    fn steps_are_not_skippable() {
        let mut rig = Rig::new();
        let mut protocol = FullProtocol::new();
        protocol.start(&mut rig.cx()).unwrap();

        // Everything downstream is already satisfied, but position feedback
        // has not arrived: the sequence must hold at step 1
        rig.co2_flat(0.0, 400.0, 150);
        rig.conductance_at(149.0, 3.0);
        let status = protocol.manage(&mut rig.cx());
        assert_eq!(status.step, 1);
        assert_eq!(rig.control.setpoint_count(700.0), 0);
    }
}
