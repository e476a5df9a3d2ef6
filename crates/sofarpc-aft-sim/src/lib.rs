#![warn(missing_docs)]

//! Synthetic traffic driver for the adaptive fault tolerance engine.
//!
//! Spreads invocations over a pool of providers in proportion to their
//! effective weights, lets a few "grey" providers fail, and runs one
//! regulation cycle per simulated window.

pub mod cli;
pub mod simulation;

pub use cli::Cli;
pub use simulation::{CycleOutcome, Simulation, SimulationConfig};
