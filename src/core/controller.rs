use crate::core::dynamics::DynamicsModel;
use crate::core::horizon::{ControlState, DisturbanceForecast, Horizon};
use crate::core::parameters::ControlParameters;
use crate::core::problem::OptimizationProblem;
use crate::core::solver::{SolvedTrajectory, TrajectorySolver};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// The single command emitted per control cycle: the ventilation fraction to
/// hold until the next cycle re-plans.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlAction {
    pub ventilation_fraction: f64,
    pub issued_at: DateTime<Utc>,
}

/// Receding-horizon controller: each call plans a full horizon but only the
/// first step of the plan is ever applied. Later steps are deliberately
/// discarded, as re-optimising next cycle with a fresh measurement corrects
/// for model and forecast error that open-loop application would accumulate.
pub struct MpcController {
    dynamics: DynamicsModel,
    parameters: ControlParameters,
    solver: Box<dyn TrajectorySolver>,
    solve_timeout: Duration,
    // Previous plan shifted one step left, kept only as a convergence hint.
    warm_start: Option<Vec<f64>>,
    last_solution: Option<SolvedTrajectory>,
}

impl MpcController {
    pub fn new(
        parameters: ControlParameters,
        solver: Box<dyn TrajectorySolver>,
        solve_timeout: Duration,
    ) -> Result<Self, crate::errors::InvalidParameterError> {
        let dynamics = DynamicsModel::from_parameters(&parameters)?;
        Ok(Self {
            dynamics,
            parameters,
            solver,
            solve_timeout,
            warm_start: None,
            last_solution: None,
        })
    }

    pub fn parameters(&self) -> &ControlParameters {
        &self.parameters
    }

    /// The full plan from the most recent successful solve. Informational
    /// only (reporting, tests); the loop never applies anything beyond the
    /// first step.
    pub fn last_solution(&self) -> Option<&SolvedTrajectory> {
        self.last_solution.as_ref()
    }

    /// Run one optimisation cycle: validate the inputs, solve the horizon
    /// and return the first planned ventilation fraction.
    ///
    /// Validation failures are returned before any solver is invoked; solve
    /// failures are passed through for the caller's fallback policy. Nothing
    /// besides the warm-start hint survives between calls.
    pub fn step(
        &mut self,
        state: &ControlState,
        forecast: &DisturbanceForecast,
    ) -> Result<ControlAction, crate::errors::ControlError> {
        let horizon = Horizon::build(state.concentration, forecast, &self.parameters)?;
        let problem = OptimizationProblem::new(self.dynamics, horizon, &self.parameters);

        let trajectory =
            self.solver
                .solve(&problem, self.warm_start.as_deref(), self.solve_timeout)?;

        debug!(
            objective = trajectory.objective,
            first_action = trajectory.controls[0],
            predicted_terminal = trajectory.states[trajectory.states.len() - 1],
            "solved horizon"
        );

        let fraction = trajectory.controls[0].clamp(0., 1.);

        // Shift the plan one interval for next cycle's warm start, repeating
        // the final step to keep the length at N.
        let mut shifted = trajectory.controls[1..].to_vec();
        if let Some(last) = trajectory.controls.last() {
            shifted.push(*last);
        }
        self.warm_start = Some(shifted);
        self.last_solution = Some(trajectory);

        Ok(ControlAction {
            ventilation_fraction: fraction,
            issued_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::solver::SolvedTrajectory;
    use crate::errors::{ControlError, SolveFailure, ValidationError};
    use rstest::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Deterministic stand-in for the nonlinear solver: replays a canned
    /// result and counts invocations.
    struct FakeSolver {
        result: Result<Vec<f64>, SolveFailure>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeSolver {
        fn succeeding(controls: Vec<f64>) -> Self {
            Self {
                result: Ok(controls),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(failure: SolveFailure) -> Self {
            Self {
                result: Err(failure),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl TrajectorySolver for FakeSolver {
        fn solve(
            &self,
            problem: &OptimizationProblem,
            _warm_start: Option<&[f64]>,
            _timeout: Duration,
        ) -> Result<SolvedTrajectory, SolveFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let controls = self.result.clone()?;
            let states = problem.rollout(&controls);
            let objective = problem.objective(&controls);
            Ok(SolvedTrajectory {
                controls,
                states,
                objective,
            })
        }
    }

    #[fixture]
    pub fn parameters() -> ControlParameters {
        ControlParameters::new(100., 300. / 3600., 5e-6, 900., 1., 1e-3, 60., 4).unwrap()
    }

    fn measured(concentration: f64) -> ControlState {
        ControlState::new(concentration, Utc::now())
    }

    #[rstest]
    fn returns_first_action_of_the_plan(parameters: ControlParameters) {
        let solver = FakeSolver::succeeding(vec![0.8, 0.6, 0.4, 0.2]);
        let mut controller =
            MpcController::new(parameters, Box::new(solver), Duration::from_secs(1)).unwrap();
        let forecast = DisturbanceForecast::constant(2., 420., 5);

        let action = controller.step(&measured(1100.), &forecast).unwrap();
        assert_eq!(action.ventilation_fraction, 0.8);

        let solution = controller.last_solution().unwrap();
        assert_eq!(solution.controls, vec![0.8, 0.6, 0.4, 0.2]);
        assert_eq!(solution.states.len(), 5);
    }

    #[rstest]
    fn shifts_the_plan_into_the_next_warm_start(parameters: ControlParameters) {
        struct CapturingSolver {
            seen: Arc<parking_lot::Mutex<Vec<Option<Vec<f64>>>>>,
        }
        impl TrajectorySolver for CapturingSolver {
            fn solve(
                &self,
                problem: &OptimizationProblem,
                warm_start: Option<&[f64]>,
                _timeout: Duration,
            ) -> Result<SolvedTrajectory, SolveFailure> {
                self.seen.lock().push(warm_start.map(|w| w.to_vec()));
                let controls = vec![0.8, 0.6, 0.4, 0.2];
                let states = problem.rollout(&controls);
                let objective = problem.objective(&controls);
                Ok(SolvedTrajectory {
                    controls,
                    states,
                    objective,
                })
            }
        }

        let seen = Arc::new(parking_lot::Mutex::new(vec![]));
        let solver = CapturingSolver { seen: seen.clone() };
        let mut controller =
            MpcController::new(parameters, Box::new(solver), Duration::from_secs(1)).unwrap();
        let forecast = DisturbanceForecast::constant(2., 420., 5);

        controller.step(&measured(1100.), &forecast).unwrap();
        controller.step(&measured(1080.), &forecast).unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0], None);
        assert_eq!(seen[1], Some(vec![0.6, 0.4, 0.2, 0.2]));
    }

    #[rstest]
    fn validation_failure_never_reaches_the_solver(parameters: ControlParameters) {
        let solver = FakeSolver::succeeding(vec![0.5; 4]);
        let calls = solver.calls.clone();
        let mut controller =
            MpcController::new(parameters, Box::new(solver), Duration::from_secs(1)).unwrap();

        let short_forecast = DisturbanceForecast::constant(2., 420., 3);
        let err = controller
            .step(&measured(1100.), &short_forecast)
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Validation(ValidationError::ForecastLength { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let err = controller
            .step(&measured(f64::NAN), &DisturbanceForecast::constant(2., 420., 5))
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Validation(ValidationError::Measurement { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    fn solve_failures_propagate(parameters: ControlParameters) {
        let solver = FakeSolver::failing(SolveFailure::DidNotConverge);
        let mut controller =
            MpcController::new(parameters, Box::new(solver), Duration::from_secs(1)).unwrap();
        let forecast = DisturbanceForecast::constant(2., 420., 5);

        let err = controller.step(&measured(1100.), &forecast).unwrap_err();
        assert!(matches!(
            err,
            ControlError::Solve(SolveFailure::DidNotConverge)
        ));
        assert!(controller.last_solution().is_none());
    }
}
