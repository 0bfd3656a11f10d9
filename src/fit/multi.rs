//! Multi-epidemic fitting: one independent fit per detected epidemic window.

use std::collections::BTreeMap;

use log::info;
use serde::{Deserialize, Serialize};

use crate::domain::{Advisory, Compartment, Dataset, EpidemicWindow, FitResult};
use crate::error::AppError;
use crate::fit::fitter::{FitOptions, fit_model};
use crate::models::EpidemicModel;
use crate::signal::{WindowConfig, find_epidemic_windows, resample_linear, smooth};
use crate::sim::Trajectory;

/// Per-window preprocessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiFitConfig {
    pub windows: WindowConfig,
    /// Series used to detect windows (default: I).
    pub detect_on: Compartment,
    /// Linearly resample each window to this step before fitting.
    pub resample_step: Option<f64>,
    /// Hamming-smooth each window's series before fitting.
    pub smoothing: Option<usize>,
}

impl Default for MultiFitConfig {
    fn default() -> Self {
        Self {
            windows: WindowConfig::default(),
            detect_on: Compartment::I,
            resample_step: Some(1.0),
            smoothing: None,
        }
    }
}

impl MultiFitConfig {
    pub fn with_windows(mut self, windows: WindowConfig) -> Self {
        self.windows = windows;
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
}

/// One fitted window with the series it was fitted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowFit {
    pub window: EpidemicWindow,
    pub original: Dataset,
    /// The series after resampling/smoothing (what the optimizer saw).
    pub prepared: Dataset,
    pub simulated: Trajectory,
    pub fit: FitResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiFit {
    pub windows: Vec<WindowFit>,
    pub advisories: Vec<Advisory>,
}

/// Detect epidemic windows and fit each one independently.
pub fn fit_multiple(
    model: &EpidemicModel,
    dataset: &Dataset,
    config: &MultiFitConfig,
    opts: &FitOptions,
) -> Result<MultiFit, AppError> {
    let cases = dataset.require(config.detect_on)?;
    let (windows, advisories) = find_epidemic_windows(cases, &config.windows)?;

    let mut out = Vec::with_capacity(windows.len());
    for (idx, window) in windows.iter().enumerate() {
        if window.len() < 2 {
            continue;
        }
        let original = dataset.slice(window.start, window.end)?;
        let prepared = prepare_window(&original, config.resample_step, config.smoothing)?;
        info!(
            "window {}/{}: samples {}..{}",
            idx + 1,
            windows.len(),
            window.start,
            window.end
        );
        let fitted = fit_model(model, &prepared, opts)?;
        let initial = model.initial_state(&prepared)?;
        let simulated = fitted.predict(&initial, prepared.time())?;
        out.push(WindowFit {
            window: *window,
            original,
            prepared,
            simulated,
            fit: fitted.into_result(),
        });
    }

    Ok(MultiFit {
        windows: out,
        advisories,
    })
}

/// Resample and/or smooth every series of a window.
pub fn prepare_window(
    window: &Dataset,
    resample_step: Option<f64>,
    smoothing: Option<usize>,
) -> Result<Dataset, AppError> {
    let mut time = window.time().to_vec();
    let mut series = BTreeMap::new();
    for c in window.compartments() {
        let mut values = window.require(c)?.to_vec();
        if let Some(step) = resample_step {
            let (t, v) = resample_linear(window.time(), &values, step)?;
            time = t;
            values = v;
        }
        if let Some(width) = smoothing {
            values = smooth(&values, width);
        }
        series.insert(c, values);
    }
    let prepared = Dataset::new(time, series)?;
    Ok(match window.reference_date() {
        Some(date) => prepared.with_reference_date(date),
        None => prepared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preparation_resamples_every_series() {
        let mut series = BTreeMap::new();
        series.insert(Compartment::I, vec![0.0, 4.0, 8.0]);
        series.insert(Compartment::R, vec![1.0, 1.0, 3.0]);
        let window = Dataset::new(vec![0.0, 2.0, 4.0], series).unwrap();
        let prepared = prepare_window(&window, Some(1.0), None).unwrap();
        assert_eq!(prepared.len(), 5);
        assert_eq!(prepared.get(Compartment::I).unwrap()[1], 2.0);
        assert_eq!(prepared.get(Compartment::R).unwrap()[3], 2.0);
    }
}
