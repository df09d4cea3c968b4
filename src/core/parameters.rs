use crate::errors::InvalidParameterError;

/// Static configuration for the controller, validated once at startup and
/// read-only for the lifetime of the process.
#[derive(Clone, Debug)]
pub struct ControlParameters {
    /// Zone volume in m3.
    pub volume: f64,
    /// Design (maximum) fresh-air flow in m3/s.
    pub max_flow: f64,
    /// CO2 generation per occupant in m3/s.
    pub generation_rate: f64,
    /// Comfort setpoint in ppm.
    pub setpoint: f64,
    /// Weight on squared setpoint deviation in the objective.
    pub tracking_weight: f64,
    /// Weight on squared ventilation effort in the objective.
    pub effort_weight: f64,
    /// Control interval in seconds.
    pub time_step: f64,
    /// Number of control intervals in each optimisation horizon.
    pub horizon_length: usize,
}

impl ControlParameters {
    pub fn new(
        volume: f64,
        max_flow: f64,
        generation_rate: f64,
        setpoint: f64,
        tracking_weight: f64,
        effort_weight: f64,
        time_step: f64,
        horizon_length: usize,
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
        if !setpoint.is_finite() || setpoint < 0. {
            return Err(InvalidParameterError::new(
                "setpoint",
                setpoint,
                "setpoint must be a non-negative concentration",
            ));
        }
        if !(tracking_weight.is_finite() && tracking_weight > 0.) {
            return Err(InvalidParameterError::new(
                "tracking_weight",
                tracking_weight,
                "tracking weight must be positive",
            ));
        }
        if !(effort_weight.is_finite() && effort_weight >= 0.) {
            return Err(InvalidParameterError::new(
                "effort_weight",
                effort_weight,
                "effort weight cannot be negative",
            ));
        }
        if !(time_step.is_finite() && time_step > 0.) {
            return Err(InvalidParameterError::new(
                "time_step",
                time_step,
                "control interval must be positive",
            ));
        }
        if horizon_length < 1 {
            return Err(InvalidParameterError::new(
                "horizon_length",
                horizon_length as f64,
                "horizon must contain at least one control interval",
            ));
        }
        Ok(Self {
            volume,
            max_flow,
            generation_rate,
            setpoint,
            tracking_weight,
            effort_weight,
            time_step,
            horizon_length,
        })
    }

    /// Number of samples each forecast axis must carry (one per horizon
    /// state, including the current one).
    pub fn forecast_len(&self) -> usize {
        self.horizon_length + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[fixture]
    pub fn parameters() -> ControlParameters {
        ControlParameters::new(100., 300. / 3600., 5e-6, 900., 1., 1e-3, 60., 30).unwrap()
    }

    #[rstest]
    fn accepts_demo_configuration(parameters: ControlParameters) {
        assert_eq!(parameters.horizon_length, 30);
        assert_eq!(parameters.forecast_len(), 31);
    }

    #[rstest]
    #[case(0., 300. / 3600., "volume")]
    #[case(-10., 300. / 3600., "volume")]
    #[case(f64::INFINITY, 300. / 3600., "volume")]
    #[case(100., 0., "max_flow")]
    #[case(100., -0.5, "max_flow")]
    #[case(100., f64::INFINITY, "max_flow")]
    fn rejects_unusable_volume_and_flow(
        #[case] volume: f64,
        #[case] max_flow: f64,
        #[case] name: &str,
    ) {
        let err = ControlParameters::new(volume, max_flow, 5e-6, 900., 1., 1e-3, 60., 30)
            .expect_err("expected invalid parameter");
        assert_eq!(err.name, name);
    }

    #[rstest]
    fn rejects_negative_generation_rate() {
        assert!(ControlParameters::new(100., 0.08, -1e-6, 900., 1., 1e-3, 60., 30).is_err());
    }

    #[rstest]
    fn rejects_zero_length_horizon() {
        assert!(ControlParameters::new(100., 0.08, 5e-6, 900., 1., 1e-3, 60., 0).is_err());
    }

    #[rstest]
    fn rejects_non_finite_setpoint() {
        assert!(ControlParameters::new(100., 0.08, 5e-6, f64::NAN, 1., 1e-3, 60., 30).is_err());
    }

    #[rstest]
    #[case(0.)]
    #[case(f64::INFINITY)]
    #[case(f64::NAN)]
    fn rejects_unusable_time_step(#[case] time_step: f64) {
        assert!(ControlParameters::new(100., 0.08, 5e-6, 900., 1., 1e-3, time_step, 30).is_err());
    }
}
