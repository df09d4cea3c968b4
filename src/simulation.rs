// In-memory stand-ins for the sensing, forecasting and actuation
// collaborators, driven by the same zone dynamics the controller plans with.
// Used by the demo binary and the end-to-end tests; a real deployment wires
// BMS-backed implementations of the runtime traits instead.

use crate::core::controller::ControlAction;
use crate::core::dynamics::DynamicsModel;
use crate::core::horizon::{ControlState, DisturbanceForecast};
use crate::core::runtime::{Co2Sensor, DisturbanceForecaster, VentilationActuator};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;

/// Occupancy over the session: a constant count, optionally overridden by a
/// per-interval schedule applied cyclically.
#[derive(Clone, Debug)]
pub struct OccupancyProfile {
    constant: f64,
    schedule: Option<Vec<f64>>,
}

impl OccupancyProfile {
    pub fn constant(count: f64) -> Self {
        Self {
            constant: count,
            schedule: None,
        }
    }

    pub fn scheduled(schedule: Vec<f64>) -> Self {
        Self {
            constant: 0.,
            schedule: (!schedule.is_empty()).then_some(schedule),
        }
    }

    fn at(&self, interval: usize) -> f64 {
        match &self.schedule {
            Some(schedule) => schedule[interval % schedule.len()],
            None => self.constant,
        }
    }
}

#[derive(Debug)]
struct ZoneInner {
    dynamics: DynamicsModel,
    concentration: f64,
    time_step: f64,
    interval: usize,
    occupancy: OccupancyProfile,
    outdoor_co2: f64,
}

/// A simulated single zone. Cloned handles share state: the sensor reads the
/// current concentration, the actuator integrates the zone forward one
/// control interval under the commanded fraction, and the forecaster reports
/// the (perfectly known) upcoming disturbances.
#[derive(Clone, Debug)]
pub struct SimulatedZone {
    inner: Arc<RwLock<ZoneInner>>,
}

impl SimulatedZone {
    pub fn new(
        dynamics: DynamicsModel,
        initial_concentration: f64,
        time_step: f64,
        occupancy: OccupancyProfile,
        outdoor_co2: f64,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ZoneInner {
                dynamics,
                concentration: initial_concentration,
                time_step,
                interval: 0,
                occupancy,
                outdoor_co2,
            })),
        }
    }

    pub fn concentration(&self) -> f64 {
        self.inner.read().concentration
    }
}

impl Co2Sensor for SimulatedZone {
    fn latest(&self) -> anyhow::Result<ControlState> {
        Ok(ControlState::new(self.inner.read().concentration, Utc::now()))
    }
}

impl DisturbanceForecaster for SimulatedZone {
    fn forecast(&self, samples: usize) -> anyhow::Result<DisturbanceForecast> {
        let inner = self.inner.read();
        let occupancy = (0..samples)
            .map(|step| inner.occupancy.at(inner.interval + step))
            .collect();
        Ok(DisturbanceForecast::new(
            occupancy,
            vec![inner.outdoor_co2; samples],
        ))
    }
}

impl VentilationActuator for SimulatedZone {
    fn apply(&mut self, action: &ControlAction) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        let occupancy = inner.occupancy.at(inner.interval);
        inner.concentration = inner.dynamics.step(
            inner.concentration,
            action.ventilation_fraction,
            occupancy,
            inner.outdoor_co2,
            inner.time_step,
        );
        inner.interval += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::*;

    fn zone(occupancy: OccupancyProfile) -> SimulatedZone {
        let dynamics = DynamicsModel::new(100., 300. / 3600., 5e-6).unwrap();
        SimulatedZone::new(dynamics, 1100., 60., occupancy, 420.)
    }

    fn command(fraction: f64) -> ControlAction {
        ControlAction {
            ventilation_fraction: fraction,
            issued_at: Utc::now(),
        }
    }

    #[rstest]
    fn actuation_advances_the_zone_one_interval() {
        let mut zone = zone(OccupancyProfile::constant(2.));
        zone.apply(&command(0.)).unwrap();
        // Sealed zone with 2 occupants gains 6 ppm per 60 s interval.
        assert_relative_eq!(zone.concentration(), 1106., max_relative = 1e-12);

        zone.apply(&command(1.)).unwrap();
        let expected = 1106. + 60. * ((300. / 3600. / 100.) * (420. - 1106.) + 0.1);
        assert_relative_eq!(zone.concentration(), expected, max_relative = 1e-12);
    }

    #[rstest]
    fn forecast_follows_the_occupancy_schedule() {
        let mut zone = zone(OccupancyProfile::scheduled(vec![2., 3., 0.]));
        let forecast = zone.forecast(4).unwrap();
        assert_eq!(forecast.occupancy, vec![2., 3., 0., 2.]);
        assert_eq!(forecast.outdoor_co2, vec![420.; 4]);

        // After one actuation the forecast window slides one interval.
        zone.apply(&command(0.5)).unwrap();
        let forecast = zone.forecast(4).unwrap();
        assert_eq!(forecast.occupancy, vec![3., 0., 2., 3.]);
    }

    #[rstest]
    fn sensor_reads_latest_value() {
        let zone = zone(OccupancyProfile::constant(0.));
        let state = zone.latest().unwrap();
        assert_eq!(state.concentration, 1100.);
    }
}
