//! Mathematical utilities: compensated summation and weighted least squares.

pub mod compensated;
pub mod ols;

pub use compensated::*;
pub use ols::*;
