use crate::core::dynamics::DynamicsModel;
use crate::core::horizon::Horizon;
use crate::core::parameters::ControlParameters;
use itertools::izip;

/// Bounds on each ventilation fraction decision variable.
pub const VENTILATION_LOWER_BOUND: f64 = 0.;
pub const VENTILATION_UPPER_BOUND: f64 = 1.;

/// One finite-horizon optimisation instance, constructed fresh per cycle and
/// discarded after the first action is extracted.
///
/// The formulation is condensed (single shooting): the state trajectory is
/// eliminated by rolling the dynamics forward from the fixed initial
/// concentration, leaving the `N` ventilation fractions as the only decision
/// variables. The dynamics constraint is therefore satisfied by construction
/// and the bilinear term shows up as nonlinearity of the objective instead.
#[derive(Clone, Debug)]
pub struct OptimizationProblem {
    dynamics: DynamicsModel,
    horizon: Horizon,
    setpoint: f64,
    tracking_weight: f64,
    effort_weight: f64,
    time_step: f64,
}

impl OptimizationProblem {
    pub fn new(dynamics: DynamicsModel, horizon: Horizon, parameters: &ControlParameters) -> Self {
        Self {
            dynamics,
            horizon,
            setpoint: parameters.setpoint,
            tracking_weight: parameters.tracking_weight,
            effort_weight: parameters.effort_weight,
            time_step: parameters.time_step,
        }
    }

    /// Number of decision variables (ventilation fractions).
    pub fn n_controls(&self) -> usize {
        self.horizon.n_controls()
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    /// Implied state trajectory for a candidate control sequence: explicit
    /// Euler from the measured initial concentration, `n_controls() + 1`
    /// entries with the first fixed to the measurement.
    pub fn rollout(&self, controls: &[f64]) -> Vec<f64> {
        debug_assert_eq!(controls.len(), self.n_controls());
        let mut states = Vec::with_capacity(controls.len() + 1);
        states.push(self.horizon.initial_concentration);
        let mut concentration = self.horizon.initial_concentration;
        for (ventilation, occupancy, outdoor) in izip!(
            controls,
            &self.horizon.occupancy,
            &self.horizon.outdoor_co2
        ) {
            concentration = self.dynamics.step(
                concentration,
                *ventilation,
                *occupancy,
                *outdoor,
                self.time_step,
            );
            states.push(concentration);
        }
        states
    }

    /// Objective value: summed squared setpoint deviation over every horizon
    /// state plus weighted squared ventilation effort over every step.
    pub fn objective(&self, controls: &[f64]) -> f64 {
        let states = self.rollout(controls);
        let tracking: f64 = states
            .iter()
            .map(|c| self.tracking_weight * (c - self.setpoint).powi(2))
            .sum();
        let effort: f64 = controls
            .iter()
            .map(|v| self.effort_weight * v.powi(2))
            .sum();
        tracking + effort
    }

    /// Analytic gradient of `objective` with respect to the control sequence,
    /// computed by a backward (adjoint) sweep over the rollout.
    pub fn objective_gradient(&self, controls: &[f64]) -> Vec<f64> {
        let states = self.rollout(controls);
        let n = controls.len();
        let mut gradient = vec![0.; n];

        // adjoint = dJ/dc_{k+1} accumulated from the tail of the horizon
        let mut adjoint = 2. * self.tracking_weight * (states[n] - self.setpoint);
        for k in (0..n).rev() {
            let control_jacobian = self.dynamics.step_control_jacobian(
                states[k],
                self.horizon.outdoor_co2[k],
                self.time_step,
            );
            gradient[k] = 2. * self.effort_weight * controls[k] + adjoint * control_jacobian;

            let state_jacobian = self
                .dynamics
                .step_state_jacobian(controls[k], self.time_step);
            adjoint = 2. * self.tracking_weight * (states[k] - self.setpoint)
                + adjoint * state_jacobian;
        }
        gradient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::horizon::DisturbanceForecast;
    use approx::assert_relative_eq;
    use rstest::*;

    fn problem_with_horizon(horizon_length: usize, initial: f64) -> OptimizationProblem {
        let parameters =
            ControlParameters::new(100., 300. / 3600., 5e-6, 900., 1., 1e-3, 60., horizon_length)
                .unwrap();
        let dynamics = DynamicsModel::from_parameters(&parameters).unwrap();
        let forecast = DisturbanceForecast::constant(2., 420., parameters.forecast_len());
        let horizon = Horizon::build(initial, &forecast, &parameters).unwrap();
        OptimizationProblem::new(dynamics, horizon, &parameters)
    }

    #[fixture]
    pub fn problem() -> OptimizationProblem {
        problem_with_horizon(4, 1100.)
    }

    #[rstest]
    fn rollout_starts_at_measurement_and_matches_hand_steps(problem: OptimizationProblem) {
        let states = problem.rollout(&[0.5; 4]);
        assert_eq!(states.len(), 5);
        assert_eq!(states[0], 1100.);
        // One hand-computed Euler step:
        // c1 = 1100 + 60 * ((300/3600 * 0.5 / 100) * (420 - 1100) + 0.1)
        let expected_c1 = 1100. + 60. * ((300. / 3600. * 0.5 / 100.) * (420. - 1100.) + 0.1);
        assert_relative_eq!(states[1], expected_c1, max_relative = 1e-12);
    }

    #[rstest]
    fn sealed_unventilated_zone_accumulates_occupant_co2(problem: OptimizationProblem) {
        let states = problem.rollout(&[0.; 4]);
        // 2 occupants at 5e-6 m3/s in 100 m3 is 6 ppm per 60 s step
        for (k, state) in states.iter().enumerate() {
            assert_relative_eq!(*state, 1100. + 6. * k as f64, max_relative = 1e-12);
        }
    }

    #[rstest]
    fn objective_penalises_deviation_and_effort() {
        let problem = problem_with_horizon(1, 900.);
        // Start on setpoint with no occupancy contribution removed; a single
        // full-vent step drags concentration below setpoint and costs effort.
        let idle = problem.objective(&[0.]);
        let venting = problem.objective(&[1.]);
        assert!(venting > idle);
    }

    #[rstest]
    fn gradient_matches_finite_differences(problem: OptimizationProblem) {
        let controls = [0.3, 0.7, 0.1, 0.9];
        let analytic = problem.objective_gradient(&controls);
        let eps = 1e-6;
        for k in 0..controls.len() {
            let mut up = controls;
            let mut down = controls;
            up[k] += eps;
            down[k] -= eps;
            let numeric = (problem.objective(&up) - problem.objective(&down)) / (2. * eps);
            assert_relative_eq!(analytic[k], numeric, max_relative = 1e-5, epsilon = 1e-6);
        }
    }
}
