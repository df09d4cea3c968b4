use crate::core::parameters::ControlParameters;
use crate::errors::{ForecastAxis, ValidationError};
use chrono::{DateTime, Utc};

/// Latest measured state of the zone, supplied fresh each cycle by the
/// sensing collaborator.
#[derive(Clone, Copy, Debug)]
pub struct ControlState {
    /// Indoor CO2 in ppm.
    pub concentration: f64,
    pub timestamp: DateTime<Utc>,
}

impl ControlState {
    pub fn new(concentration: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            concentration,
            timestamp,
        }
    }
}

/// Predicted disturbances over the coming horizon, one sample per horizon
/// state (so `horizon_length + 1` per axis), aligned to multiples of the
/// control interval starting at the current cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct DisturbanceForecast {
    pub occupancy: Vec<f64>,
    pub outdoor_co2: Vec<f64>,
}

impl DisturbanceForecast {
    pub fn new(occupancy: Vec<f64>, outdoor_co2: Vec<f64>) -> Self {
        Self {
            occupancy,
            outdoor_co2,
        }
    }

    /// A forecast holding one constant value per axis, as the original demo
    /// predictions did.
    pub fn constant(occupancy: f64, outdoor_co2: f64, len: usize) -> Self {
        Self {
            occupancy: vec![occupancy; len],
            outdoor_co2: vec![outdoor_co2; len],
        }
    }
}

/// A validated, time-aligned prediction horizon: everything one solve needs
/// besides the decision variables themselves.
#[derive(Clone, Debug)]
pub struct Horizon {
    /// Time offsets from the current cycle in seconds, `0, dt, .., N*dt`.
    pub time: Vec<f64>,
    pub initial_concentration: f64,
    pub occupancy: Vec<f64>,
    pub outdoor_co2: Vec<f64>,
}

impl Horizon {
    /// Assemble a horizon from the current measurement and forecast,
    /// rejecting malformed input before any solver is involved.
    ///
    /// Arguments:
    /// * `current_concentration` - latest measured indoor CO2, in ppm
    /// * `forecast` - disturbance predictions of length `horizon_length + 1` per axis
    /// * `parameters` - static control configuration
    pub fn build(
        current_concentration: f64,
        forecast: &DisturbanceForecast,
        parameters: &ControlParameters,
    ) -> Result<Self, ValidationError> {
        if !current_concentration.is_finite() || current_concentration < 0. {
            return Err(ValidationError::Measurement {
                value: current_concentration,
            });
        }

        let expected = parameters.forecast_len();
        validate_axis(ForecastAxis::Occupancy, &forecast.occupancy, expected)?;
        validate_axis(ForecastAxis::OutdoorCo2, &forecast.outdoor_co2, expected)?;

        let time = (0..expected)
            .map(|step| step as f64 * parameters.time_step)
            .collect();

        Ok(Self {
            time,
            initial_concentration: current_concentration,
            occupancy: forecast.occupancy.clone(),
            outdoor_co2: forecast.outdoor_co2.clone(),
        })
    }

    /// Number of decision variables implied by this horizon.
    pub fn n_controls(&self) -> usize {
        self.time.len() - 1
    }
}

fn validate_axis(
    axis: ForecastAxis,
    values: &[f64],
    expected: usize,
) -> Result<(), ValidationError> {
    if values.len() != expected {
        return Err(ValidationError::ForecastLength {
            axis,
            expected,
            actual: values.len(),
        });
    }
    for (index, value) in values.iter().enumerate() {
        if !value.is_finite() || *value < 0. {
            return Err(ValidationError::ForecastValue {
                axis,
                index,
                value: *value,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    pub fn parameters() -> ControlParameters {
        ControlParameters::new(100., 300. / 3600., 5e-6, 900., 1., 1e-3, 60., 4).unwrap()
    }

    #[rstest]
    fn builds_aligned_time_grid(parameters: ControlParameters) {
        let forecast = DisturbanceForecast::constant(2., 420., 5);
        let horizon = Horizon::build(1100., &forecast, &parameters).unwrap();
        assert_eq!(horizon.time, vec![0., 60., 120., 180., 240.]);
        assert_eq!(horizon.initial_concentration, 1100.);
        assert_eq!(horizon.n_controls(), 4);
        assert_eq!(horizon.occupancy, vec![2.; 5]);
        assert_eq!(horizon.outdoor_co2, vec![420.; 5]);
    }

    #[rstest]
    #[case(4)]
    #[case(6)]
    fn rejects_wrong_length_forecast(parameters: ControlParameters, #[case] len: usize) {
        let forecast = DisturbanceForecast::new(vec![2.; len], vec![420.; 5]);
        let err = Horizon::build(1100., &forecast, &parameters).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ForecastLength {
                axis: ForecastAxis::Occupancy,
                expected: 5,
                actual: len,
            }
        );
    }

    #[rstest]
    fn rejects_wrong_length_outdoor_axis(parameters: ControlParameters) {
        let forecast = DisturbanceForecast::new(vec![2.; 5], vec![420.; 4]);
        let err = Horizon::build(1100., &forecast, &parameters).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ForecastLength {
                axis: ForecastAxis::OutdoorCo2,
                ..
            }
        ));
    }

    #[rstest]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(-1.)]
    fn rejects_invalid_forecast_values(parameters: ControlParameters, #[case] bad: f64) {
        let mut forecast = DisturbanceForecast::constant(2., 420., 5);
        forecast.occupancy[3] = bad;
        let err = Horizon::build(1100., &forecast, &parameters).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ForecastValue {
                axis: ForecastAxis::Occupancy,
                index: 3,
                ..
            }
        ));
    }

    #[rstest]
    #[case(f64::NAN)]
    #[case(-5.)]
    fn rejects_unusable_measurement(parameters: ControlParameters, #[case] reading: f64) {
        let forecast = DisturbanceForecast::constant(2., 420., 5);
        let err = Horizon::build(reading, &forecast, &parameters).unwrap_err();
        assert!(matches!(err, ValidationError::Measurement { .. }));
    }

    #[rstest]
    fn does_not_mutate_forecast_input(parameters: ControlParameters) {
        let forecast = DisturbanceForecast::constant(2., 420., 5);
        let before = forecast.clone();
        let _ = Horizon::build(1100., &forecast, &parameters).unwrap();
        assert_eq!(forecast, before);
    }
}
