//! Per-window prefix sweep.
//!
//! Inside each epidemic window the model is refitted on prefixes of
//! `minimum_days`, `minimum_days + step`, ... samples, showing how the
//! estimate settles as a wave unfolds.

use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, EpidemicWindow, ParameterVector};
use crate::error::AppError;
use crate::fit::{FitOptions, fit_model, prepare_window};
use crate::models::EpidemicModel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    pub minimum_days: usize,
    pub step: usize,
    /// Resample each window to this step before slicing prefixes.
    pub resample_step: Option<f64>,
    pub smoothing: Option<usize>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            minimum_days: 60,
            step: 10,
            resample_step: Some(1.0),
            smoothing: None,
        }
    }
}

impl MonteCarloConfig {
    pub fn with_minimum_days(mut self, minimum_days: usize) -> Self {
        self.minimum_days = minimum_days;
        self
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_resample_step(mut self, step: Option<f64>) -> Self {
        self.resample_step = step;
        self
    }

    pub fn with_smoothing(mut self, width: Option<usize>) -> Self {
        self.smoothing = width;
        self
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.minimum_days < 2 {
            return Err(AppError::config("Monte Carlo prefixes need at least 2 samples."));
        }
        if self.step == 0 {
            return Err(AppError::config("Monte Carlo step must be > 0."));
        }
        Ok(())
    }

    /// Prefix lengths for a window of `len` samples.
    fn prefix_lengths(&self, len: usize) -> impl Iterator<Item = usize> {
        (self.minimum_days..=len).step_by(self.step)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixFit {
    pub samples: usize,
    /// Time of the last sample in the prefix.
    pub time: f64,
    pub date: Option<NaiveDate>,
    pub parameters: ParameterVector,
    pub cost: f64,
    pub converged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSweep {
    pub window: EpidemicWindow,
    pub fits: Vec<PrefixFit>,
}

/// Prefix sweep inside every window. Windows shorter than `minimum_days`
/// produce an empty sweep.
pub fn monte_carlo_windows(
    model: &EpidemicModel,
    dataset: &Dataset,
    windows: &[EpidemicWindow],
    opts: &FitOptions,
    config: &MonteCarloConfig,
) -> Result<Vec<WindowSweep>, AppError> {
    config.validate()?;
    let mut out = Vec::with_capacity(windows.len());
    for window in windows {
        let original = dataset.slice(window.start, window.end)?;
        let prepared = prepare_window(&original, config.resample_step, config.smoothing)?;
        let lengths: Vec<usize> = config.prefix_lengths(prepared.len()).collect();
        info!(
            "window {}..{}: {} prefix fits",
            window.start,
            window.end,
            lengths.len()
        );

        let mut fits = Vec::with_capacity(lengths.len());
        for samples in lengths {
            let prefix = prepared.prefix(samples)?;
            let result = fit_model(model, &prefix, opts)?.into_result();
            let time = prefix.time()[samples - 1];
            debug!("{samples} samples: cost {:.6e}", result.diagnostics.final_cost);
            fits.push(PrefixFit {
                samples,
                time,
                date: prefix.date_at(time),
                cost: result.diagnostics.final_cost,
                converged: result.converged(),
                parameters: result.parameters,
            });
        }
        out.push(WindowSweep {
            window: *window,
            fits,
        });
    }
    Ok(out)
}
