//! Case-series signal processing: smoothing, epidemic windows, peaks.

pub mod peak;
pub mod smoothing;
pub mod windows;

pub use peak::*;
pub use smoothing::*;
pub use windows::*;
