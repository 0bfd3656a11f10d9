//! Shared pipeline steps used by every command.
//!
//! Turns parsed arguments into library configuration and runs the common
//! load -> fit -> residuals workflow, so the command handlers in `app` only
//! deal with presentation and exports.

use std::path::Path;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::cli::{FitArgs, ModelArgs};
use crate::domain::{Dataset, ModelKind};
use crate::error::AppError;
use crate::fit::{FitOptions, OptimizerConfig, SensitivityConfig, fit_from};
use crate::io::load_series;
use crate::models::{EpidemicModel, FittedModel};
use crate::report::{SeriesResidual, compute_residuals};
use crate::sim::{SolverOptions, Trajectory};

/// Outputs of a single fit.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub fitted: FittedModel,
    pub initial: Vec<f64>,
    pub trajectory: Trajectory,
    pub residuals: Vec<SeriesResidual>,
}

pub fn build_model(args: &ModelArgs) -> Result<EpidemicModel, AppError> {
    Ok(EpidemicModel::new(args.model, args.population)?
        .with_mode(args.mode)
        .with_space(args.space)
        .with_solver(SolverOptions::default().with_tolerances(args.rtol, args.atol_solver)))
}

/// Library fit options from CLI flags. `EPI_SEED` seeds the optimizer when
/// `--seed` is absent.
pub fn fit_options(args: &FitArgs) -> Result<FitOptions, AppError> {
    let (m_lo, m_hi) = pair("mutation", &args.mutation)?;
    let seed = match args.seed {
        Some(seed) => Some(seed),
        None => env_seed()?,
    };
    let mut optimizer = OptimizerConfig::default()
        .with_algorithm(args.algorithm)
        .with_popsize(args.popsize)
        .with_mutation(m_lo, m_hi)
        .with_recombination(args.recombination)
        .with_strategy(args.strategy)
        .with_tolerance(args.tol, args.atol)
        .with_max_iterations(args.maxiter)
        .with_annealing(args.temperature, args.stall)
        .with_seed(seed);
    if let Some(secs) = args.timeout_secs {
        let timeout = Duration::try_from_secs_f64(secs)
            .map_err(|e| AppError::config(format!("Invalid --timeout-secs {secs}: {e}")))?;
        optimizer = optimizer.with_deadline(Instant::now() + timeout);
    }
    optimizer.validate()?;

    let (p_lo, p_hi) = pair("primary-sens", &args.primary_sens)?;
    let (r_lo, r_hi) = pair("removal-sens", &args.removal_sens)?;
    let (e_lo, e_hi) = pair("extra-sens", &args.extra_sens)?;
    let sensitivity = SensitivityConfig::default()
        .with_primary(p_lo, p_hi)
        .with_removal(r_lo, r_hi)
        .with_extra(e_lo, e_hi)
        .with_population(args.pop_min, args.pop_max);
    sensitivity.validate()?;

    let mut opts = FitOptions::default()
        .with_aggregation(args.aggregation)
        .with_weight_mode(args.weight_mode)
        .with_ponder(args.ponder)
        .with_search_population(args.search_population)
        .with_sensitivity(sensitivity)
        .with_estimate(args.estimate)
        .with_optimizer(optimizer);
    if !args.focus.is_empty() {
        opts = opts.with_focus(args.focus.clone());
    }
    match (args.r0_min, args.r0_max) {
        (None, None) => {}
        (lo, hi) => {
            opts = opts.with_reproduction_bounds(lo.unwrap_or(0.0), hi.unwrap_or(f64::INFINITY));
        }
    }
    Ok(opts)
}

pub fn load_dataset(path: &Path) -> Result<Dataset, AppError> {
    let ingested = load_series(path)?;
    info!(
        "loaded {} rows ({} used) from '{}'",
        ingested.rows_read,
        ingested.rows_used,
        path.display()
    );
    if !ingested.row_errors.is_empty() {
        warn!("{} rows skipped", ingested.row_errors.len());
    }
    Ok(ingested.dataset)
}

/// Fit, then re-simulate on the data grid and compare with the observations.
pub fn run_fit(model: &EpidemicModel, dataset: &Dataset, opts: &FitOptions) -> Result<FitRun, AppError> {
    let initial = model.initial_state(dataset)?;
    let fitted = fit_from(model, dataset, initial.clone(), opts)?;
    let trajectory = fitted.predict(&initial, dataset.time())?;
    let residuals = compute_residuals(model.kind, dataset, &trajectory)?;
    Ok(FitRun {
        fitted,
        initial,
        trajectory,
        residuals,
    })
}

/// The data grid followed by `days` unit steps past its last point.
pub fn extended_grid(time: &[f64], days: usize) -> Vec<f64> {
    let mut grid = time.to_vec();
    if let Some(&t_last) = time.last() {
        grid.extend((1..=days).map(|k| t_last + k as f64));
    }
    grid
}

/// Compartment order of `kind`'s state vector, e.g. `S,I,R`.
pub fn describe_layout(kind: ModelKind) -> String {
    kind.layout()
        .iter()
        .map(|c| c.label())
        .collect::<Vec<_>>()
        .join(",")
}

fn pair(flag: &str, values: &[f64]) -> Result<(f64, f64), AppError> {
    match values {
        [lo, hi] => Ok((*lo, *hi)),
        _ => Err(AppError::config(format!(
            "--{flag} takes exactly two values (low,high); got {}.",
            values.len()
        ))),
    }
}

fn env_seed() -> Result<Option<u64>, AppError> {
    match std::env::var("EPI_SEED") {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| AppError::config(format!("Invalid EPI_SEED '{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}
