//! Engine configuration: thresholds, durations, conversion constants
//!
//! All values are immutable inputs to the engine, supplied once at session
//! start by the host's configuration layer. Defaults match the reference
//! laboratory setup (CO2 cell of 0.965 L, percolation sensor regenerated at
//! 700 degC). Range-checking configuration is the host's job; the engine
//! takes these at face value.

use crate::time::{minutes, Span};

/// Thresholds and durations driving detection and the protocols.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Conductance slope above which a sustained increase is declared, in uS/s.
    pub increase_threshold: f64,

    /// Slope magnitude below which the conductance counts as flat, in uS/s.
    pub stability_threshold: f64,

    /// How long the conductance slope must stay flat before the detector
    /// declares stabilization, in seconds.
    pub stability_duration: Span,

    /// Number of trailing samples fed to the trend estimator.
    pub slope_window: usize,

    /// Half-width of the centered window used when re-checking the slope
    /// around a time point, in seconds.
    pub sliding_half_window: Span,

    /// Allowed CO2 deviation from the window mean for stability, in ppm.
    pub co2_stable_band: f64,

    /// How long CO2 must hold inside the band to count as stable, in seconds.
    pub co2_stable_duration: Span,

    /// CO2 rise over the pre-heating baseline that arms peak detection, in ppm.
    pub co2_rise_threshold: f64,

    /// Drop from the recent CO2 maximum that marks the peak as passed, in ppm.
    pub co2_peak_drop: f64,

    /// CO2 slope below which the post-peak descent counts as real, in ppm/s.
    pub co2_peak_descent_slope: f64,

    /// Conductance below this clears the detection flags, in uS.
    pub conductance_reset_threshold: f64,

    /// Heater setpoint during regeneration, in degC.
    pub regeneration_temperature: f64,

    /// Heater setpoint outside regeneration, in degC.
    pub low_setpoint: f64,

    /// How long the heater holds the regeneration setpoint, in seconds.
    pub regeneration_duration: Span,

    /// Resistance above which the resistance-threshold protocol stops
    /// heating, in ohms.
    pub resistance_threshold: f64,

    /// Volume of the measurement cell, in litres.
    pub cell_volume_litres: f64,
}

/// Molar volume of an ideal gas at lab conditions, L/mol.
pub const MOLAR_VOLUME_L_PER_MOL: f64 = 24.5;

/// Molar mass of carbon, g/mol.
pub const CARBON_MOLAR_MASS_G_PER_MOL: f64 = 12.0;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            increase_threshold: 0.1,
            stability_threshold: 0.05,
            stability_duration: minutes(2),
            slope_window: 10,
            sliding_half_window: 75.0, // half of the 2.5 min sliding window
            co2_stable_band: 2.0,
            co2_stable_duration: minutes(2),
            co2_rise_threshold: 5.0,
            co2_peak_drop: 1.0,
            co2_peak_descent_slope: -0.05,
            conductance_reset_threshold: 5.0,
            regeneration_temperature: 700.0,
            low_setpoint: 0.0,
            regeneration_duration: minutes(3),
            resistance_threshold: 1.0e6,
            cell_volume_litres: 0.965,
        }
    }
}

impl EngineConfig {
    /// Carbon mass released for a CO2 delta across a regeneration cycle.
    ///
    /// `mass = delta_ppm * V_cell / V_molar * M_carbon`, in micrograms
    /// (ppm of a litre-scale cell works out to micrograms directly).
    pub fn carbon_mass_ug(&self, delta_co2_ppm: f64) -> f64 {
        delta_co2_ppm * self.cell_volume_litres / MOLAR_VOLUME_L_PER_MOL
            * CARBON_MOLAR_MASS_G_PER_MOL
    }
}
