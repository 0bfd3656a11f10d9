//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - configuration enums (`ModelKind`, `SimulationMode`, `CostAggregation`, `WeightMode`, `ParamSpace`)
//! - observed data (`Dataset`) and state (`CompartmentSet`)
//! - fit outputs (`FitResult`, `FitDiagnostics`, `Advisory`)

pub mod types;

pub use types::*;
