//! Time-shift sweep: refit on every growing prefix of a series.

use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::domain::{Compartment, Dataset, ModelKind, ParameterVector};
use crate::error::AppError;
use crate::fit::{FitOptions, fit_model};
use crate::models::{EpidemicModel, FittedModel};
use crate::signal::{find_peak, find_smoothed_peak};

/// Where the peak of each sweep entry is looked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PeakMode {
    /// Smoothed observed infected series of the prefix (has it peaked yet?).
    #[default]
    Observed,
    /// Forecast infected series out to the horizon.
    Forecast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// First prefix ends at this sample index (inclusive).
    pub start_day: usize,
    /// Forecast length past the last sample of each prefix.
    pub horizon_days: f64,
    pub peak_mode: PeakMode,
    /// Hamming width used on observed series in [`PeakMode::Observed`].
    pub peak_smoothing: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start_day: 10,
            horizon_days: 200.0,
            peak_mode: PeakMode::Observed,
            peak_smoothing: 13,
        }
    }
}

impl SweepConfig {
    pub fn with_start_day(mut self, start_day: usize) -> Self {
        self.start_day = start_day;
        self
    }

    pub fn with_horizon(mut self, horizon_days: f64) -> Self {
        self.horizon_days = horizon_days;
        self
    }

    pub fn with_peak_mode(mut self, peak_mode: PeakMode) -> Self {
        self.peak_mode = peak_mode;
        self
    }

    pub fn with_peak_smoothing(mut self, width: usize) -> Self {
        self.peak_smoothing = width;
        self
    }

    fn validate(&self) -> Result<(), AppError> {
        if !(self.horizon_days.is_finite() && self.horizon_days >= 0.0) {
            return Err(AppError::config(format!(
                "Forecast horizon must be finite and >= 0 (got {}).",
                self.horizon_days
            )));
        }
        Ok(())
    }
}

/// Peak location on some time axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakEstimate {
    pub index: usize,
    pub time: f64,
    pub date: Option<NaiveDate>,
    pub value: f64,
}

/// One refit of the sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepEntry {
    /// Index of the last sample used by this fit.
    pub last_index: usize,
    pub time: f64,
    pub date: Option<NaiveDate>,
    pub parameters: ParameterVector,
    pub cost: f64,
    pub converged: bool,
    pub peak: Option<PeakEstimate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeShiftSweep {
    pub model: ModelKind,
    pub peak_mode: PeakMode,
    pub entries: Vec<SweepEntry>,
}

/// Refit `model` on prefixes `[0, i]` for every `i` in `start_day..len`.
///
/// Every fit uses the same options (and therefore the same seed), so entries
/// differ only by the data they saw.
pub fn time_shift_sweep(
    model: &EpidemicModel,
    dataset: &Dataset,
    opts: &FitOptions,
    config: &SweepConfig,
) -> Result<TimeShiftSweep, AppError> {
    config.validate()?;
    let first = config.start_day.max(1);
    if first >= dataset.len() {
        return Err(AppError::data_shape(format!(
            "Sweep start day {} leaves no prefix to fit (len={}).",
            config.start_day,
            dataset.len()
        )));
    }
    // Shape errors surface once, before the first expensive fit.
    let initial = model.initial_state(dataset)?;
    if config.peak_mode == PeakMode::Observed {
        dataset.require(Compartment::I)?;
    }

    info!(
        "time-shift sweep: {} prefixes ({:?} peaks)",
        dataset.len() - first,
        config.peak_mode
    );
    let mut entries = Vec::with_capacity(dataset.len() - first);
    for last in first..dataset.len() {
        let prefix = dataset.prefix(last + 1)?;
        let fitted = fit_model(model, &prefix, opts)?;
        let peak = match config.peak_mode {
            PeakMode::Observed => observed_peak(&prefix, config.peak_smoothing)?,
            PeakMode::Forecast => forecast_peak(&fitted, dataset, &initial, last, config.horizon_days)?,
        };
        let time = dataset.time()[last];
        let result = fitted.into_result();
        debug!(
            "prefix ending at {time}: cost {:.6e}, peak {:?}",
            result.diagnostics.final_cost,
            peak.map(|p| p.time)
        );
        entries.push(SweepEntry {
            last_index: last,
            time,
            date: dataset.date_at(time),
            cost: result.diagnostics.final_cost,
            converged: result.converged(),
            parameters: result.parameters,
            peak,
        });
    }

    Ok(TimeShiftSweep {
        model: model.kind,
        peak_mode: config.peak_mode,
        entries,
    })
}

fn observed_peak(prefix: &Dataset, width: usize) -> Result<Option<PeakEstimate>, AppError> {
    let cases = prefix.require(Compartment::I)?;
    Ok(find_smoothed_peak(cases, width).map(|index| {
        let time = prefix.time()[index];
        PeakEstimate {
            index,
            time,
            date: prefix.date_at(time),
            value: cases[index],
        }
    }))
}

/// Peak of the fitted infected curve (notified `Q` for NSIR) from the first
/// sample out to `time[last] + horizon` on a unit grid.
fn forecast_peak(
    fitted: &FittedModel,
    dataset: &Dataset,
    initial: &[f64],
    last: usize,
    horizon: f64,
) -> Result<Option<PeakEstimate>, AppError> {
    let t0 = dataset.time()[0];
    let t_end = dataset.time()[last] + horizon;
    let steps = (t_end - t0).floor() as usize;
    let grid: Vec<f64> = (0..=steps).map(|k| t0 + k as f64).collect();

    // Non-finite fitted parameters mean no forecast, not a failed sweep.
    let trajectory = match fitted.predict(initial, &grid) {
        Ok(t) => t,
        Err(err) => {
            debug!("no forecast for prefix ending at {last}: {err}");
            return Ok(None);
        }
    };
    let tracked = match fitted.model().kind {
        ModelKind::Nsir => Compartment::Q,
        _ => Compartment::I,
    };
    let Some(series) = trajectory.get(tracked) else {
        return Ok(None);
    };
    Ok(find_peak(series).map(|index| PeakEstimate {
        index,
        time: grid[index],
        date: dataset.date_at(grid[index]),
        value: series[index],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SyntheticConfig, synthetic_dataset};
    use crate::fit::OptimizerConfig;

    fn quick_opts() -> FitOptions {
        FitOptions::default().with_optimizer(
            OptimizerConfig::default()
                .with_popsize(6)
                .with_max_iterations(40)
                .with_seed(Some(5)),
        )
    }

    fn sir_data(days: usize) -> (EpidemicModel, Dataset) {
        let model = EpidemicModel::new(ModelKind::Sir, 1e4).unwrap();
        let cfg = SyntheticConfig::new(vec![0.4, 0.1], vec![9_990.0, 10.0, 0.0], days);
        let data = synthetic_dataset(&model, &cfg).unwrap();
        (model, data)
    }

    #[test]
    fn one_entry_per_inclusive_prefix() {
        let (model, data) = sir_data(16);
        let cfg = SweepConfig::default().with_start_day(12);
        let sweep = time_shift_sweep(&model, &data, &quick_opts(), &cfg).unwrap();
        let ends: Vec<usize> = sweep.entries.iter().map(|e| e.last_index).collect();
        assert_eq!(ends, vec![12, 13, 14, 15]);
        assert!(sweep.entries.iter().all(|e| e.parameters.len() == 2));
        assert!(sweep.entries.iter().all(|e| e.date.is_none()));
    }

    #[test]
    fn observed_peak_of_a_rising_prefix_is_its_end() {
        let (model, data) = sir_data(14);
        let cfg = SweepConfig::default().with_start_day(12);
        let sweep = time_shift_sweep(&model, &data, &quick_opts(), &cfg).unwrap();
        for entry in &sweep.entries {
            let peak = entry.peak.unwrap();
            assert_eq!(peak.index, entry.last_index);
        }
    }

    #[test]
    fn forecast_peak_lies_past_the_prefix() {
        let (model, data) = sir_data(15);
        let cfg = SweepConfig::default()
            .with_start_day(14)
            .with_horizon(150.0)
            .with_peak_mode(PeakMode::Forecast);
        let opts = FitOptions::default().with_optimizer(
            OptimizerConfig::default()
                .with_max_iterations(300)
                .with_seed(Some(5)),
        );
        let sweep = time_shift_sweep(&model, &data, &opts, &cfg).unwrap();
        let peak = sweep.entries[0].peak.unwrap();
        assert!(peak.time > 14.0, "peak={peak:?}");
        assert!(peak.time < 164.0, "peak={peak:?}");
    }

    #[test]
    fn start_past_the_end_is_rejected() {
        let (model, data) = sir_data(10);
        let cfg = SweepConfig::default().with_start_day(10);
        let err = time_shift_sweep(&model, &data, &quick_opts(), &cfg).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
