//! Synthetic epidemic series: simulate a model, then optionally perturb it.
//!
//! Noise is multiplicative log-normal, `y = x · exp(σz − σ²/2)` with `z ~ N(0, 1)`,
//! so the perturbed series keeps the clean series as its mean and never turns
//! negative. The generator is deterministic for a given seed.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::domain::{Compartment, Dataset};
use crate::error::AppError;
use crate::models::{EpidemicModel, observation_sources};

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    /// Model parameters in the model's parameter space (no population fraction).
    pub parameters: Vec<f64>,
    /// Initial state in the model's compartment layout.
    pub initial: Vec<f64>,
    pub days: usize,
    /// Observed series (default: every observable compartment except `S`).
    pub observed: Option<Vec<Compartment>>,
    /// Log-scale noise level; `None` or `0` gives the clean simulation.
    pub noise: Option<f64>,
    pub seed: u64,
    pub reference_date: Option<NaiveDate>,
}

impl SyntheticConfig {
    pub fn new(parameters: Vec<f64>, initial: Vec<f64>, days: usize) -> Self {
        Self {
            parameters,
            initial,
            days,
            observed: None,
            noise: None,
            seed: 0,
            reference_date: None,
        }
    }

    pub fn with_observed(mut self, observed: Vec<Compartment>) -> Self {
        self.observed = Some(observed);
        self
    }

    pub fn with_noise(mut self, sigma: f64, seed: u64) -> Self {
        self.noise = Some(sigma);
        self.seed = seed;
        self
    }

    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }
}

/// Simulate `model` on a unit grid `0..days` and collect the observed series.
pub fn synthetic_dataset(model: &EpidemicModel, config: &SyntheticConfig) -> Result<Dataset, AppError> {
    if config.days == 0 {
        return Err(AppError::config("Synthetic data needs at least one day."));
    }
    let sigma = config.noise.unwrap_or(0.0);
    if !(sigma.is_finite() && sigma >= 0.0) {
        return Err(AppError::config(format!("Noise level must be finite and >= 0 (got {sigma}).")));
    }

    let grid: Vec<f64> = (0..config.days).map(|k| k as f64).collect();
    let sim = model.simulate(&config.initial, &grid, &config.parameters, false)?;
    let trajectory = sim.trajectory;
    if !trajectory.is_finite() {
        return Err(AppError::numeric("Synthetic simulation produced non-finite values."));
    }

    let observed: Vec<Compartment> = match &config.observed {
        Some(list) => list.clone(),
        None => model
            .kind
            .observable()
            .iter()
            .copied()
            .filter(|c| *c != Compartment::S)
            .collect(),
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| AppError::numeric(format!("Noise distribution error: {e}")))?;

    let mut series = BTreeMap::new();
    for c in observed {
        let mut values = vec![0.0; grid.len()];
        for source in observation_sources(model.kind, c) {
            let Some(sim_values) = trajectory.get(*source) else {
                return Err(AppError::data_shape(format!(
                    "{} does not simulate {}.",
                    model.kind.display_name(),
                    source.label()
                )));
            };
            for (v, s) in values.iter_mut().zip(sim_values) {
                *v += s;
            }
        }
        if sigma > 0.0 {
            for v in values.iter_mut() {
                let z = normal.sample(&mut rng);
                *v *= (sigma * z - 0.5 * sigma * sigma).exp();
            }
        }
        series.insert(c, values);
    }

    let dataset = Dataset::new(grid, series)?;
    Ok(match config.reference_date {
        Some(date) => dataset.with_reference_date(date),
        None => dataset,
    })
}
