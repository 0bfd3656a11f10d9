//! Crate-wide error type.
//!
//! Exit codes double as the error taxonomy:
//!
//! - `2` invalid configuration, bad CLI input, or I/O failure
//! - `3` data shape problems (mismatched lengths, missing compartments, bad time index)
//! - `4` numeric failures that cannot be absorbed by the search
//!
//! Numeric trouble *during* an optimizer run never becomes an `AppError`; the
//! cost evaluator absorbs it (see `fit::cost`).

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(2, message)
    }

    pub fn data_shape(message: impl Into<String>) -> Self {
        Self::new(3, message)
    }

    pub fn numeric(message: impl Into<String>) -> Self {
        Self::new(4, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// True for input-shape errors that are rejected before any simulation.
    pub fn is_data_shape(&self) -> bool {
        self.exit_code == 3
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
