pub mod controller;
pub mod dynamics;
pub mod horizon;
pub mod parameters;
pub mod problem;
pub mod runtime;
pub mod solver;
pub mod units;
