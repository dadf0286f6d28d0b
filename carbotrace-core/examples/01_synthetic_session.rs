//! Automatic detection over a synthetic percolation run
//!
//! Feeds the engine a 1 Hz conductance trace shaped like a deposition
//! experiment: quiet baseline, percolation ramp, long plateau. Prints the
//! detection milestones as they fire.
//!
//! Run with: cargo run --example 01_synthetic_session

use carbotrace_core::{EngineConfig, LoggingControl, SessionEngine, TickReadings};

/// Conductance in uS at time `t`: quiet, then a 0.5 uS/s ramp, then flat.
fn conductance(t: f64) -> f64 {
    if t < 60.0 {
        1.0
    } else if t < 70.0 {
        1.0 + 0.5 * (t - 60.0)
    } else {
        6.0
    }
}

fn main() {
    let mut engine = SessionEngine::new(EngineConfig::default(), LoggingControl::new());
    engine.set_auto_mode(true);

    let mut announced_increase = false;
    let mut announced_stabilization = false;

    for i in 0..400 {
        let t = i as f64;
        let report = engine.tick(TickReadings {
            conductance: Some((t, conductance(t), 1.0e4)),
            gas: Some((t, 412.0, 21.0, 45.0)),
            resistance_temp: None,
        });

        if report.detection.increase_detected && !announced_increase {
            announced_increase = true;
            println!(
                "t={t:>5.0}s  increase detected, percolation at t={:?}",
                report.detection.percolation_time
            );
        }
        if report.detection.stabilized && !announced_stabilization {
            announced_stabilization = true;
            println!(
                "t={t:>5.0}s  conductance stabilized at t={:?}",
                report.detection.stabilization_time
            );
        }
    }

    println!("\nsession events:");
    for (name, at) in engine.events().entries() {
        println!("  {name:<32} t={at:.0}s");
    }
}
