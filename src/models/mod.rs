//! Compartmental model implementations.
//!
//! Dynamics are implemented as small, pure functions so that simulation and
//! search code can stay generic. `epidemic` wraps a model configuration and the
//! immutable fitted result.

pub mod epidemic;
pub mod model;

pub use epidemic::*;
pub use model::*;
