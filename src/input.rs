use crate::core::parameters::ControlParameters;
use crate::core::runtime::LoopSettings;
use crate::core::units::cubic_metres_per_hour_to_per_second;
use crate::errors::InvalidParameterError;
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

/// Read and parse the JSON configuration surface. Structural problems
/// (malformed JSON, unknown fields) surface here; value validation happens
/// when the mirror structs are converted into core types.
pub fn ingest(json: impl Read) -> anyhow::Result<Input> {
    Ok(serde_json::from_reader(json)?)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Input {
    pub control: ControlInput,
    #[serde(default)]
    pub runtime: RuntimeInput,
    #[serde(default)]
    pub scenario: ScenarioInput,
}

/// Mirror of `ControlParameters` as it appears on disk. Defaults follow the
/// original demo configuration for the 100 m3 zone.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlInput {
    /// Zone volume in m3.
    pub volume: f64,
    /// Design ventilation flow in m3/h (converted to m3/s internally).
    pub max_flow_m3_per_hour: f64,
    /// CO2 generation per occupant in m3/s.
    pub generation_rate_per_person: f64,
    /// Comfort setpoint in ppm.
    pub setpoint: f64,
    #[serde(default = "default_tracking_weight")]
    pub tracking_weight: f64,
    pub effort_weight: f64,
    /// Control interval in seconds.
    pub time_step_seconds: f64,
    pub horizon_length: usize,
}

fn default_tracking_weight() -> f64 {
    1.
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeInput {
    /// Defaults to half the control interval.
    pub solve_timeout_seconds: Option<f64>,
    pub safe_default_fraction: Option<f64>,
    /// Defaults to three control intervals.
    pub max_action_age_seconds: Option<f64>,
    pub escalation_threshold: Option<usize>,
    #[serde(default)]
    pub paced: bool,
}

/// Simulated-zone scenario for demo sessions, defaulting to the original
/// demo: 1100 ppm initial indoor CO2, two occupants, 420 ppm outdoors.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioInput {
    #[serde(default = "default_initial_concentration")]
    pub initial_concentration: f64,
    #[serde(default = "default_occupancy")]
    pub occupancy: f64,
    /// Optional per-interval occupancy overriding the constant, applied
    /// cyclically over the session.
    pub occupancy_schedule: Option<Vec<f64>>,
    #[serde(default = "default_outdoor_co2")]
    pub outdoor_co2: f64,
}

impl Default for ScenarioInput {
    fn default() -> Self {
        Self {
            initial_concentration: default_initial_concentration(),
            occupancy: default_occupancy(),
            occupancy_schedule: None,
            outdoor_co2: default_outdoor_co2(),
        }
    }
}

fn default_initial_concentration() -> f64 {
    1100.
}

fn default_occupancy() -> f64 {
    2.
}

fn default_outdoor_co2() -> f64 {
    420.
}

impl Input {
    pub fn control_parameters(&self) -> Result<ControlParameters, InvalidParameterError> {
        ControlParameters::new(
            self.control.volume,
            cubic_metres_per_hour_to_per_second(self.control.max_flow_m3_per_hour),
            self.control.generation_rate_per_person,
            self.control.setpoint,
            self.control.tracking_weight,
            self.control.effort_weight,
            self.control.time_step_seconds,
            self.control.horizon_length,
        )
    }

    pub fn loop_settings(&self) -> Result<LoopSettings, InvalidParameterError> {
        let time_step = self.control.time_step_seconds;
        if !(time_step.is_finite() && time_step > 0.) {
            return Err(InvalidParameterError::new(
                "time_step",
                time_step,
                "control interval must be positive",
            ));
        }
        let solve_timeout = self
            .runtime
            .solve_timeout_seconds
            .unwrap_or(time_step / 2.);
        if !(solve_timeout.is_finite() && solve_timeout > 0.) {
            return Err(InvalidParameterError::new(
                "solve_timeout",
                solve_timeout,
                "solve timeout must be positive and no larger than the control interval",
            ));
        }
        let max_action_age = self
            .runtime
            .max_action_age_seconds
            .unwrap_or(3. * time_step);
        if !(max_action_age.is_finite() && max_action_age > 0.) {
            return Err(InvalidParameterError::new(
                "max_action_age",
                max_action_age,
                "fallback action age limit must be positive",
            ));
        }
        LoopSettings::new(
            Duration::from_secs_f64(time_step),
            Duration::from_secs_f64(solve_timeout),
            self.runtime.safe_default_fraction.unwrap_or(0.5),
            chrono::Duration::milliseconds((max_action_age * 1000.) as i64),
            self.runtime.escalation_threshold.unwrap_or(3),
            self.runtime.paced,
        )
    }
}
