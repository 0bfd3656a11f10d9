//! Fitting engine for a single dataset.
//!
//! Given:
//! - an [`EpidemicModel`] (variant, simulation mode, parameter space, `N`)
//! - a [`Dataset`] of observed series on its own time grid
//! - [`FitOptions`]
//!
//! we:
//! - fail fast on shape problems (missing focus series, bad initial state)
//! - build bounds around a rough estimate
//! - optionally constrain the reproduction number
//! - run the configured global search on the cost evaluator
//!
//! and return an immutable [`FittedModel`]. Numeric trouble inside the search
//! is absorbed and reported through diagnostics and advisories.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::domain::{
    Advisory, Compartment, CostAggregation, Dataset, FitDiagnostics, FitResult, ParameterVector,
    WeightMode,
};
use crate::error::AppError;
use crate::fit::bounds::{
    EstimateMethod, SensitivityConfig, build_bounds, constant_estimate, regression_estimate,
};
use crate::fit::cost::{CostEvaluator, CostSpec, FALLBACK_COST, Weights};
use crate::fit::search::{Algorithm, NonlinearConstraint, OptimizerConfig, StopReason, minimize};
use crate::models::{EpidemicModel, FittedModel, decode, degenerate_input, reproduction_number};

/// Options for one fitting call.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Compartments that contribute to the cost (default: the model's
    /// observable set restricted to what the dataset provides).
    pub focus: Option<Vec<Compartment>>,
    pub aggregation: CostAggregation,
    pub weights: Weights,
    /// Ignore `R`/`D` samples with zero day-over-day change.
    pub ponder: bool,
    /// Search a population fraction as the last parameter.
    pub search_population: bool,
    /// Keep the model reproduction number inside `[lower, upper]`.
    pub reproduction_bounds: Option<(f64, f64)>,
    pub sensitivity: SensitivityConfig,
    pub estimate: EstimateMethod,
    pub optimizer: OptimizerConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            focus: None,
            aggregation: CostAggregation::Sum,
            weights: Weights::Mode(WeightMode::InverseMean),
            ponder: false,
            search_population: false,
            reproduction_bounds: None,
            sensitivity: SensitivityConfig::default(),
            estimate: EstimateMethod::Constant,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl FitOptions {
    pub fn with_focus(mut self, focus: Vec<Compartment>) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn with_aggregation(mut self, aggregation: CostAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_weight_mode(mut self, mode: WeightMode) -> Self {
        self.weights = Weights::Mode(mode);
        self
    }

    pub fn with_weights(mut self, weights: BTreeMap<Compartment, f64>) -> Self {
        self.weights = Weights::Explicit(weights);
        self
    }

    pub fn with_ponder(mut self, ponder: bool) -> Self {
        self.ponder = ponder;
        self
    }

    pub fn with_search_population(mut self, search_population: bool) -> Self {
        self.search_population = search_population;
        self
    }

    pub fn with_reproduction_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.reproduction_bounds = Some((lower, upper));
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: SensitivityConfig) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    pub fn with_estimate(mut self, estimate: EstimateMethod) -> Self {
        self.estimate = estimate;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Focus set actually used for `model` on `dataset`.
    pub fn resolve_focus(&self, model: &EpidemicModel, dataset: &Dataset) -> Vec<Compartment> {
        match &self.focus {
            Some(focus) => focus.clone(),
            None => model
                .kind
                .observable()
                .iter()
                .copied()
                .filter(|&c| dataset.contains(c))
                .collect(),
        }
    }
}

/// Fit `model` to `dataset`, starting from the dataset's first sample.
pub fn fit_model(
    model: &EpidemicModel,
    dataset: &Dataset,
    opts: &FitOptions,
) -> Result<FittedModel, AppError> {
    let initial = model.initial_state(dataset)?;
    fit_from(model, dataset, initial, opts)
}

/// Fit `model` to `dataset` from an explicit initial state.
pub fn fit_from(
    model: &EpidemicModel,
    dataset: &Dataset,
    initial: Vec<f64>,
    opts: &FitOptions,
) -> Result<FittedModel, AppError> {
    if dataset.len() < 2 {
        return Err(AppError::data_shape(format!(
            "Need at least 2 samples to fit (got {}).",
            dataset.len()
        )));
    }
    opts.optimizer.validate()?;
    if let Some((lo, hi)) = opts.reproduction_bounds {
        if !(lo.is_finite() && lo <= hi) {
            return Err(AppError::config(format!(
                "Invalid reproduction number bounds [{lo}, {hi}]."
            )));
        }
    }

    let kind = model.kind;
    let space = model.space;
    let search_population = opts.search_population;
    let focus = opts.resolve_focus(model, dataset);
    let evaluator = CostEvaluator::new(
        model,
        dataset,
        initial.clone(),
        &CostSpec {
            focus: &focus,
            weights: &opts.weights,
            aggregation: opts.aggregation,
            ponder: opts.ponder,
            search_population,
        },
    )?;

    let mut advisories = degenerate_input(kind, &initial);

    let estimate = match opts.estimate {
        EstimateMethod::Constant => constant_estimate(kind, space),
        EstimateMethod::Regression => regression_estimate(kind, space, dataset, model.population)
            .unwrap_or_else(|| {
                debug!("regression estimate unavailable; using constants");
                constant_estimate(kind, space)
            }),
    };
    let bounds = build_bounds(kind, &estimate, &opts.sensitivity, search_population)?;
    let names = model.param_names(search_population);
    for (name, b) in names.iter().zip(&bounds) {
        debug!("bound {name}: [{:.6e}, {:.6e}]", b.lower, b.upper);
    }
    debug!("focus {:?}, weights {:?}", focus, evaluator.weights());

    let constraint = opts.reproduction_bounds.map(|(lo, hi)| {
        NonlinearConstraint::new(lo, hi, move |x: &[f64]| {
            let decoded = decode(kind, space, x, search_population);
            reproduction_number(kind, &decoded.rates) * decoded.pop_fraction
        })
    });

    info!(
        "fitting {} on {} samples ({} parameters, {:?} mode, {:?})",
        kind.display_name(),
        dataset.len(),
        bounds.len(),
        model.mode,
        opts.optimizer.algorithm
    );
    let outcome = minimize(&evaluator, &bounds, constraint.as_ref(), &opts.optimizer)?;

    // A search where every evaluation failed reports the sentinel cost.
    let cost = if outcome.cost.is_finite() {
        outcome.cost
    } else {
        FALLBACK_COST
    };
    let converged = outcome.converged() && outcome.feasible && cost < FALLBACK_COST;
    match outcome.stop {
        StopReason::Cancelled | StopReason::DeadlineReached => {
            warn!("fit stopped early after {} iterations", outcome.iterations);
            advisories.push(Advisory::Cancelled {
                iterations: outcome.iterations,
            });
        }
        _ if !converged => {
            warn!(
                "fit did not converge after {} iterations (best cost {:.6e})",
                outcome.iterations, cost
            );
            advisories.push(Advisory::NonConvergence {
                iterations: outcome.iterations,
                best_cost: cost,
            });
        }
        _ => {}
    }

    let diagnostics = FitDiagnostics {
        iterations: outcome.iterations,
        evaluations: outcome.evaluations,
        failed_evaluations: evaluator.failed_evaluations(),
        final_cost: cost,
        converged,
        population_size: match opts.optimizer.algorithm {
            Algorithm::DifferentialEvolution => opts.optimizer.members(bounds.len()),
            Algorithm::SimulatedAnnealing => 1,
        },
    };
    info!(
        "fit finished: cost {:.6e}, {} iterations, converged={}",
        diagnostics.final_cost, diagnostics.iterations, diagnostics.converged
    );

    let result = FitResult {
        model: kind,
        space,
        parameters: ParameterVector::new(names, outcome.x),
        bounds,
        population: model.population,
        search_population,
        diagnostics,
        advisories,
    };
    Ok(FittedModel::new(model.clone(), result))
}
