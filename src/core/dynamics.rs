// This module provides the single-zone CO2 mass balance used both inside the
// optimisation and for plant simulation. The zone is treated as well mixed:
//
//     dc/dt = (Q_max * v / V) * (c_out - c) + G * occ / V * 1e6
//
// with c in ppm, flows in m3/s and V in m3. The first term is bilinear in the
// ventilation fraction v and the state c, which is what makes the per-step
// dynamics constraint nonlinear.

use crate::core::parameters::ControlParameters;
use crate::core::units::PARTS_PER_MILLION;
use crate::errors::InvalidParameterError;

#[derive(Clone, Copy, Debug)]
pub struct DynamicsModel {
    volume: f64,
    max_flow: f64,
    generation_rate: f64,
}

impl DynamicsModel {
    /// Construct a dynamics model for a zone.
    ///
    /// Arguments:
    /// * `volume` - zone volume, in m3
    /// * `max_flow` - design ventilation flow, in m3/s
    /// * `generation_rate` - CO2 generation per occupant, in m3/s
    pub fn new(
        volume: f64,
        max_flow: f64,
        generation_rate: f64,
    ) -> Result<Self, InvalidParameterError> {
        if !(volume.is_finite() && volume > 0.) {
            return Err(InvalidParameterError::new(
                "volume",
                volume,
                "zone volume must be positive",
            ));
        }
        if !(max_flow.is_finite() && max_flow > 0.) {
            return Err(InvalidParameterError::new(
                "max_flow",
                max_flow,
                "design ventilation flow must be positive",
            ));
        }
        if !(generation_rate.is_finite() && generation_rate >= 0.) {
            return Err(InvalidParameterError::new(
                "generation_rate",
                generation_rate,
                "per-occupant generation rate cannot be negative",
            ));
        }
        Ok(Self {
            volume,
            max_flow,
            generation_rate,
        })
    }

    pub fn from_parameters(parameters: &ControlParameters) -> Result<Self, InvalidParameterError> {
        Self::new(
            parameters.volume,
            parameters.max_flow,
            parameters.generation_rate,
        )
    }

    /// Rate of change of indoor concentration, in ppm/s.
    ///
    /// Arguments:
    /// * `concentration` - current indoor CO2, in ppm
    /// * `ventilation` - ventilation fraction, 0..=1
    /// * `occupancy` - number of occupants
    /// * `outdoor_concentration` - outdoor CO2, in ppm
    pub fn derivative(
        &self,
        concentration: f64,
        ventilation: f64,
        occupancy: f64,
        outdoor_concentration: f64,
    ) -> f64 {
        (self.max_flow * ventilation / self.volume) * (outdoor_concentration - concentration)
            + self.generation_rate * occupancy / self.volume * PARTS_PER_MILLION
    }

    /// One explicit-Euler step of the mass balance over `dt` seconds. The
    /// same step is used for the optimisation rollout and for any forward
    /// simulation validated against it.
    pub fn step(
        &self,
        concentration: f64,
        ventilation: f64,
        occupancy: f64,
        outdoor_concentration: f64,
        dt: f64,
    ) -> f64 {
        concentration
            + dt * self.derivative(concentration, ventilation, occupancy, outdoor_concentration)
    }

    /// Partial derivative of `step` with respect to the current state.
    pub(crate) fn step_state_jacobian(&self, ventilation: f64, dt: f64) -> f64 {
        1. - dt * self.max_flow * ventilation / self.volume
    }

    /// Partial derivative of `step` with respect to the ventilation fraction.
    pub(crate) fn step_control_jacobian(
        &self,
        concentration: f64,
        outdoor_concentration: f64,
        dt: f64,
    ) -> f64 {
        dt * self.max_flow / self.volume * (outdoor_concentration - concentration)
    }
}
