//! `epi-curves` library crate.
//!
//! Compartmental epidemic models (SIR, SEIR, SIRD and a notified-case
//! variant) with simulation, parameter fitting by differential evolution,
//! epidemic-window detection and refit sweeps.
//!
//! The binary (`epi`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - fitting can be embedded by other orchestrators

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod signal;
pub mod sim;
pub mod sweep;
