//! Seven-step full protocol on a simulated bench
//!
//! Drives the full regeneration sequence against a crude cell model:
//! conductance collapses while the heater is hot, CO2 rises to a thermal
//! peak and settles back. Prints each step transition and the final carbon
//! figure.
//!
//! Run with: cargo run --example 02_full_protocol

use carbotrace_core::{
    EngineConfig, LoggingControl, ProtocolOutcome, SensorPosition, SessionEngine, TickReadings,
};

/// CO2 in ppm: flat 400, thermal peak to 430 after the heater goes on at
/// t=130, settled at 405 afterwards.
fn co2(t: f64) -> f64 {
    if t < 135.0 {
        400.0
    } else if t < 150.0 {
        400.0 + 2.0 * (t - 135.0)
    } else if t < 162.0 {
        (430.0 - 2.5 * (t - 150.0)).max(405.0)
    } else {
        405.0
    }
}

/// Conductance in uS: 20 before regeneration, collapsing once hot.
fn conductance(t: f64) -> f64 {
    if t < 140.0 {
        20.0
    } else {
        (20.0 - 2.0 * (t - 140.0)).max(0.5)
    }
}

fn main() {
    let mut engine = SessionEngine::new(EngineConfig::default(), LoggingControl::new());

    engine.start_full_protocol().expect("nothing else running");
    // The bench acknowledges the retract command right away
    engine.control_mut().set_position(SensorPosition::Retracted);

    let mut last_step = 0;
    for i in 0..600 {
        let t = i as f64;
        let report = engine.tick(TickReadings {
            conductance: Some((t, conductance(t), 1.0e4)),
            gas: Some((t, co2(t), 21.0, 45.0)),
            resistance_temp: None,
        });

        if report.protocol.step != last_step {
            last_step = report.protocol.step;
            println!(
                "t={t:>5.0}s  step {}  {:<36} {:>5.1}%",
                report.protocol.step, report.protocol.message, report.protocol.progress
            );
        }
        if report.protocol.outcome == ProtocolOutcome::Complete {
            break;
        }
    }

    match engine.last_regeneration_result() {
        Some(result) => println!(
            "\ndelta CO2 {:.1} ppm, carbon mass {:.2} ug",
            result.delta_co2, result.carbon_mass_ug
        ),
        None => println!("\nprotocol did not complete"),
    }
}
