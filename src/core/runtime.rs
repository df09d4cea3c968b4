use crate::core::controller::{ControlAction, MpcController};
use crate::core::horizon::{ControlState, DisturbanceForecast};
use crate::errors::{ControlError, InvalidParameterError};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Supplies the latest zone measurement. Latest-value semantics only; the
/// loop never asks for history.
pub trait Co2Sensor {
    fn latest(&self) -> anyhow::Result<ControlState>;
}

/// Supplies a fresh disturbance forecast of `samples` entries per axis,
/// aligned to the control grid starting at the current cycle.
pub trait DisturbanceForecaster {
    fn forecast(&self, samples: usize) -> anyhow::Result<DisturbanceForecast>;
}

/// Accepts one ventilation command per cycle. Fire-and-forget: a write
/// failure is logged, not retried, and does not change the control state.
pub trait VentilationActuator {
    fn apply(&mut self, action: &ControlAction) -> anyhow::Result<()>;
}

/// Runtime policy for the receding-horizon loop. Validated once at startup.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Budget handed to the solver each cycle. Must not exceed the control
    /// interval, so a slow solve can never push output past the boundary.
    pub solve_timeout: Duration,
    /// Ventilation fraction applied when no usable last action exists.
    /// Biased high: under-ventilation risks air quality, over-ventilation
    /// only wastes energy.
    pub safe_default_fraction: f64,
    /// Oldest a last-known-good action may be and still be re-applied.
    pub max_action_age: chrono::Duration,
    /// Consecutive failures after which a higher-severity alert is raised.
    pub escalation_threshold: usize,
    /// Whether to sleep out the remainder of each control interval. Off for
    /// simulated sessions and tests.
    pub paced: bool,
}

impl LoopSettings {
    pub fn new(
        control_interval: Duration,
        solve_timeout: Duration,
        safe_default_fraction: f64,
        max_action_age: chrono::Duration,
        escalation_threshold: usize,
        paced: bool,
    ) -> Result<Self, InvalidParameterError> {
        if solve_timeout.is_zero() || solve_timeout > control_interval {
            return Err(InvalidParameterError::new(
                "solve_timeout",
                solve_timeout.as_secs_f64(),
                "solve timeout must be positive and no larger than the control interval",
            ));
        }
        if !(0. ..=1.).contains(&safe_default_fraction) {
            return Err(InvalidParameterError::new(
                "safe_default_fraction",
                safe_default_fraction,
                "safe default must be a fraction in [0, 1]",
            ));
        }
        if max_action_age < chrono::Duration::zero() {
            return Err(InvalidParameterError::new(
                "max_action_age",
                max_action_age.num_seconds() as f64,
                "staleness window cannot be negative",
            ));
        }
        Ok(Self {
            solve_timeout,
            safe_default_fraction,
            max_action_age,
            escalation_threshold,
            paced,
        })
    }
}

/// What one cycle of the loop did, for reporting.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleRecord {
    pub cycle: usize,
    pub measured_co2: Option<f64>,
    pub applied_fraction: f64,
    pub fell_back: bool,
    pub predicted_terminal_co2: Option<f64>,
}

/// Periodic driver of the controller: every control interval it fetches the
/// latest measurement and forecast, runs one optimisation step and forwards
/// the first planned action to the actuator. Owns the fallback and
/// consecutive-failure bookkeeping; the optimisation formulation lives
/// entirely in the controller.
pub struct RecedingHorizonLoop {
    controller: MpcController,
    sensor: Box<dyn Co2Sensor>,
    forecaster: Box<dyn DisturbanceForecaster>,
    actuator: Box<dyn VentilationActuator>,
    settings: LoopSettings,
    last_good: Option<ControlAction>,
    consecutive_failures: usize,
}

impl RecedingHorizonLoop {
    pub fn new(
        controller: MpcController,
        sensor: Box<dyn Co2Sensor>,
        forecaster: Box<dyn DisturbanceForecaster>,
        actuator: Box<dyn VentilationActuator>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            controller,
            sensor,
            forecaster,
            actuator,
            settings,
            last_good: None,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures
    }

    /// Run a bounded number of control cycles, returning one record per
    /// cycle. Unbounded deployments call this repeatedly.
    pub fn run(&mut self, cycles: usize) -> Vec<CycleRecord> {
        let interval = Duration::from_secs_f64(self.controller.parameters().time_step);
        let mut records = Vec::with_capacity(cycles);
        for cycle in 0..cycles {
            let started = Instant::now();
            records.push(self.run_cycle(cycle));
            if self.settings.paced {
                if let Some(remaining) = interval.checked_sub(started.elapsed()) {
                    std::thread::sleep(remaining);
                }
            }
        }
        records
    }

    /// One control cycle. Per-cycle failures (bad input, solve failure,
    /// collaborator error) never propagate: they are logged and the fallback
    /// action is applied instead.
    pub fn run_cycle(&mut self, cycle: usize) -> CycleRecord {
        let now = Utc::now();

        let measured = match self.sensor.latest() {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(cycle, error = %e, "sensor read failed");
                None
            }
        };

        let action = match &measured {
            Some(state) => self.plan(cycle, state),
            None => None,
        };

        let (applied, fell_back) = match action {
            Some(action) => {
                self.consecutive_failures = 0;
                self.last_good = Some(action);
                (action, false)
            }
            None => {
                self.register_failure(cycle);
                (self.fallback_action(now), true)
            }
        };

        if let Err(e) = self.actuator.apply(&applied) {
            // Fire-and-forget write path: the command is considered issued.
            warn!(cycle, error = %e, "actuator write failed");
        }

        info!(
            cycle,
            fraction = applied.ventilation_fraction,
            fell_back,
            "applied ventilation command"
        );

        CycleRecord {
            cycle,
            measured_co2: measured.map(|state| state.concentration),
            applied_fraction: applied.ventilation_fraction,
            fell_back,
            predicted_terminal_co2: (!fell_back)
                .then(|| {
                    self.controller
                        .last_solution()
                        .and_then(|solution| solution.states.last().copied())
                })
                .flatten(),
        }
    }

    fn plan(&mut self, cycle: usize, state: &ControlState) -> Option<ControlAction> {
        let forecast = match self
            .forecaster
            .forecast(self.controller.parameters().forecast_len())
        {
            Ok(forecast) => forecast,
            Err(e) => {
                warn!(cycle, error = %e, "forecast fetch failed");
                return None;
            }
        };

        match self.controller.step(state, &forecast) {
            Ok(action) => Some(action),
            Err(ControlError::Validation(e)) => {
                warn!(cycle, error = %e, "cycle input rejected");
                None
            }
            Err(ControlError::Solve(e)) => {
                warn!(cycle, error = %e, "solve failed");
                None
            }
            Err(ControlError::InvalidParameter(e)) => {
                // Parameters are validated at startup; reaching this mid-run
                // still must not crash the loop.
                error!(cycle, error = %e, "configuration error during cycle");
                None
            }
        }
    }

    fn register_failure(&mut self, cycle: usize) {
        self.consecutive_failures += 1;
        if self.consecutive_failures == self.settings.escalation_threshold {
            error!(
                cycle,
                consecutive = self.consecutive_failures,
                "consecutive control failures reached escalation threshold"
            );
        }
    }

    /// Last known-good action if it is fresh enough, otherwise the safe
    /// default fraction.
    fn fallback_action(&self, now: DateTime<Utc>) -> ControlAction {
        match &self.last_good {
            Some(last) if now.signed_duration_since(last.issued_at) <= self.settings.max_action_age => {
                ControlAction {
                    ventilation_fraction: last.ventilation_fraction,
                    issued_at: now,
                }
            }
            _ => ControlAction {
                ventilation_fraction: self.settings.safe_default_fraction,
                issued_at: now,
            },
        }
    }
}
