//! Input/output helpers.
//!
//! - CSV ingest of case series (`ingest`)
//! - trajectory CSV export (`export`)
//! - fit / sweep JSON read/write (`fit_file`)

pub mod export;
pub mod fit_file;
pub mod ingest;

pub use export::*;
pub use fit_file::*;
pub use ingest::*;
