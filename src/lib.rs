#![allow(clippy::too_many_arguments)]

pub mod core;
pub mod errors;
pub mod input;
pub mod output;
pub mod simulation;

use crate::core::controller::MpcController;
use crate::core::dynamics::DynamicsModel;
use crate::core::runtime::{CycleRecord, RecedingHorizonLoop};
use crate::core::solver::LbfgsSolver;
use crate::output::{write_cycle_report, Output};
use crate::simulation::{OccupancyProfile, SimulatedZone};
use std::io::Read;
use tracing::info;

/// Run a bounded control session against a simulated zone described by the
/// configuration, writing a per-cycle CSV report through the given output.
///
/// The session wires the receding-horizon loop to in-memory collaborators;
/// deployments against a real BMS substitute their own implementations of
/// the runtime traits and drive the loop directly.
pub fn run_control_session(
    config: impl Read,
    output: impl Output,
    cycles: usize,
) -> anyhow::Result<Vec<CycleRecord>> {
    let input = input::ingest(config)?;
    let parameters = input.control_parameters()?;
    let settings = input.loop_settings()?;
    let dynamics = DynamicsModel::from_parameters(&parameters)?;

    let occupancy = match &input.scenario.occupancy_schedule {
        Some(schedule) => OccupancyProfile::scheduled(schedule.clone()),
        None => OccupancyProfile::constant(input.scenario.occupancy),
    };
    let zone = SimulatedZone::new(
        dynamics,
        input.scenario.initial_concentration,
        parameters.time_step,
        occupancy,
        input.scenario.outdoor_co2,
    );

    info!(
        volume = parameters.volume,
        setpoint = parameters.setpoint,
        horizon_length = parameters.horizon_length,
        initial_concentration = input.scenario.initial_concentration,
        cycles,
        "starting control session"
    );

    let controller = MpcController::new(
        parameters,
        Box::new(LbfgsSolver::default()),
        settings.solve_timeout,
    )?;
    let mut control_loop = RecedingHorizonLoop::new(
        controller,
        Box::new(zone.clone()),
        Box::new(zone.clone()),
        Box::new(zone.clone()),
        settings,
    );

    let records = control_loop.run(cycles);

    info!(
        final_concentration = zone.concentration(),
        "control session finished"
    );

    write_cycle_report(output, &records)?;

    Ok(records)
}
