//! Repeated refits over parts of a series.
//!
//! - `timeshift`: every growing prefix, with a peak estimate per fit
//! - `monte_carlo`: stepped prefixes inside each epidemic window
//! - `bootstrap`: random contiguous sub-windows with percentile bands

pub mod bootstrap;
pub mod monte_carlo;
pub mod timeshift;

pub use bootstrap::*;
pub use monte_carlo::*;
pub use timeshift::*;
