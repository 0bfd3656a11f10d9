//! Read/write fitted-model JSON files.
//!
//! A fit file is the portable form of a finished fit: the model configuration,
//! the fitted parameters with diagnostics, and the initial state the fit
//! started from, so a later `forecast` can continue without the original data.

use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::FittedModel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitFile {
    pub tool: String,
    pub reference_date: Option<NaiveDate>,
    /// Time of the initial state.
    pub t0: f64,
    pub initial: Vec<f64>,
    pub fitted: FittedModel,
}

impl FitFile {
    pub fn new(fitted: FittedModel, t0: f64, initial: Vec<f64>, reference_date: Option<NaiveDate>) -> Self {
        Self {
            tool: "epi".to_string(),
            reference_date,
            t0,
            initial,
            fitted,
        }
    }
}

pub fn write_fit_json(path: &Path, fit: &FitFile) -> Result<(), AppError> {
    write_json(path, fit)
}

pub fn read_fit_json(path: &Path) -> Result<FitFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open fit JSON '{}': {e}", path.display())))?;
    let fit: FitFile =
        serde_json::from_reader(file).map_err(|e| AppError::config(format!("Invalid fit JSON: {e}")))?;
    if fit.fitted.result().parameters.len() != fit.fitted.model().param_names(fit.fitted.result().search_population).len() {
        return Err(AppError::config("Fit JSON parameters do not match its model."));
    }
    Ok(fit)
}

/// Pretty-print any serializable result (fits, window fits, sweeps) to `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::config(format!("Failed to create JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, value)
        .map_err(|e| AppError::config(format!("Failed to write JSON '{}': {e}", path.display())))?;
    Ok(())
}
