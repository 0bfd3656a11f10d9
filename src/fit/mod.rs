//! Model fitting.
//!
//! Responsibilities:
//!
//! - build search bounds from a rough estimate (`bounds`)
//! - score candidate parameter vectors against data (`cost`)
//! - run the bounded global search through argmin (`search`, `evolution`)
//! - orchestrate single fits and per-window fits (`fitter`, `multi`)

pub mod bounds;
pub mod cost;
pub mod evolution;
pub mod fitter;
pub mod multi;
pub mod search;

pub use bounds::*;
pub use cost::*;
pub use evolution::*;
pub use fitter::*;
pub use multi::*;
pub use search::*;
