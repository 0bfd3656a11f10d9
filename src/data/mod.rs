//! Synthetic data for demos and closed-loop checks.

pub mod synthetic;

pub use synthetic::*;
