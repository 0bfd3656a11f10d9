//! Cost evaluator: scalar mismatch between simulated and observed series.
//!
//! For a candidate `x` the evaluator simulates the model on the dataset grid,
//! maps simulated compartments onto each observed focus compartment, and merges
//! the weighted squared errors with the configured [`CostAggregation`].
//!
//! Numeric failures (solver blow-up, NaN or overflow in the aggregation) never
//! raise an error. Through [`CostEvaluator::cost`] the evaluation reports the
//! last successful cost of the same [`CostContext`]. Contexts are owned by one
//! optimizer population slot and created fresh for every fit, so concurrent
//! evaluations never share fallback state. Through the argmin
//! [`CostFunction`] impl a failure scores `+inf`, so the search never prefers
//! it over a finite candidate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use argmin::core::{CostFunction, Error};
use serde::{Deserialize, Serialize};

use crate::domain::{Compartment, CostAggregation, Dataset, WeightMode};
use crate::error::AppError;
use crate::models::{EpidemicModel, observation_sources};

/// Cost reported before any evaluation of a context has succeeded.
pub const FALLBACK_COST: f64 = 1e14;

/// Per-slot "previous cost" state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostContext {
    previous: f64,
    failures: usize,
}

impl Default for CostContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CostContext {
    pub fn new() -> Self {
        Self {
            previous: FALLBACK_COST,
            failures: 0,
        }
    }

    pub fn previous(&self) -> f64 {
        self.previous
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Reported cost of one evaluation: the cost itself, or the previous one
    /// when the evaluation failed.
    pub fn absorb(&mut self, cost: Option<f64>) -> f64 {
        match cost {
            Some(cost) => {
                self.previous = cost;
                cost
            }
            None => {
                self.failures += 1;
                self.previous
            }
        }
    }
}

/// Per-compartment weights: derived from the data, or given explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Weights {
    Mode(WeightMode),
    Explicit(BTreeMap<Compartment, f64>),
}

impl Default for Weights {
    fn default() -> Self {
        Weights::Mode(WeightMode::InverseMean)
    }
}

/// One observed focus compartment and the simulated rows it is compared with.
#[derive(Debug, Clone)]
struct Target {
    observed: Compartment,
    /// Row indices into the simulated layout, summed.
    sources: Vec<usize>,
    values: Vec<f64>,
    weight: f64,
    /// Samples that count; `None` means all.
    mask: Option<Vec<bool>>,
    /// `n / count(mask)` so masked series keep their total weight.
    ponder: f64,
}

/// Everything needed to score candidate vectors for one fit.
#[derive(Debug)]
pub struct CostEvaluator<'a> {
    model: &'a EpidemicModel,
    initial: Vec<f64>,
    grid: &'a [f64],
    targets: Vec<Target>,
    /// Observed non-S series used to derive susceptibles when the population
    /// fraction is searched.
    others: Vec<Vec<f64>>,
    aggregation: CostAggregation,
    search_population: bool,
    failed: AtomicUsize,
}

/// Options for [`CostEvaluator::new`].
#[derive(Debug, Clone)]
pub struct CostSpec<'s> {
    pub focus: &'s [Compartment],
    pub weights: &'s Weights,
    pub aggregation: CostAggregation,
    /// Drop samples of `R` (or `D`) whose day-over-day change is zero.
    pub ponder: bool,
    pub search_population: bool,
}

impl<'a> CostEvaluator<'a> {
    /// Validate shapes and precompute weights/masks.
    ///
    /// Every focus compartment must be observable for the model, present in
    /// the dataset, and backed by simulated compartments of the initial state.
    pub fn new(
        model: &'a EpidemicModel,
        dataset: &'a Dataset,
        initial: Vec<f64>,
        spec: &CostSpec<'_>,
    ) -> Result<Self, AppError> {
        let layout = model.kind.layout_for_len(initial.len()).ok_or_else(|| {
            AppError::data_shape(format!(
                "{} cannot use an initial state of {} compartments.",
                model.kind.display_name(),
                initial.len()
            ))
        })?;

        let mut targets = Vec::with_capacity(spec.focus.len());
        for &c in spec.focus {
            if !model.kind.observable().contains(&c) {
                return Err(AppError::data_shape(format!(
                    "{} cannot compare compartment {}.",
                    model.kind.display_name(),
                    c.label()
                )));
            }
            if targets.iter().any(|t: &Target| t.observed == c) {
                continue;
            }
            let values = dataset.require(c)?.to_vec();
            let sources = observation_sources(model.kind, c)
                .iter()
                .map(|s| {
                    layout.iter().position(|l| l == s).ok_or_else(|| {
                        AppError::data_shape(format!(
                            "{} state has no {} compartment to compare with {}.",
                            model.kind.display_name(),
                            s.label(),
                            c.label()
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let weight = resolve_weight(spec.weights, c, &values)?;
            let (mask, ponder) = if spec.ponder && matches!(c, Compartment::R | Compartment::D) {
                ponder_mask(&values)
            } else {
                (None, 1.0)
            };
            targets.push(Target {
                observed: c,
                sources,
                values,
                weight,
                mask,
                ponder,
            });
        }

        let others = dataset
            .compartments()
            .filter(|&c| c != Compartment::S && model.kind.observable().contains(&c))
            .filter_map(|c| dataset.get(c).map(|v| v.to_vec()))
            .collect();

        Ok(Self {
            model,
            initial,
            grid: dataset.time(),
            targets,
            others,
            aggregation: spec.aggregation,
            search_population: spec.search_population,
            failed: AtomicUsize::new(0),
        })
    }

    /// Number of evaluations absorbed by the fallback so far.
    pub fn failed_evaluations(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// Weight applied to each focus compartment.
    pub fn weights(&self) -> Vec<(Compartment, f64)> {
        self.targets.iter().map(|t| (t.observed, t.weight)).collect()
    }

    /// Score `x`, falling back to the context's previous cost on failure.
    pub fn cost(&self, x: &[f64], ctx: &mut CostContext) -> f64 {
        ctx.absorb(self.evaluate(x))
    }

    /// Score `x`; `None` when the simulation or the aggregation failed.
    pub fn evaluate(&self, x: &[f64]) -> Option<f64> {
        if self.targets.is_empty() {
            return Some(0.0);
        }
        let cost = self.try_cost(x);
        if cost.is_none() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        cost
    }

    fn try_cost(&self, x: &[f64]) -> Option<f64> {
        let sim = self
            .model
            .simulate(&self.initial, self.grid, x, self.search_population)
            .ok()?;
        let rows = &sim.trajectory.values;
        let n = self.grid.len();

        let synthetic_s = if self.search_population {
            let frac = *x.last()?;
            let total = frac * self.model.population;
            Some(
                (0..n)
                    .map(|k| total - self.others.iter().map(|o| o[k]).sum::<f64>())
                    .collect::<Vec<f64>>(),
            )
        } else {
            None
        };

        let mut total = 0.0;
        for target in &self.targets {
            let observed = match (&synthetic_s, target.observed) {
                (Some(s), Compartment::S) => s.as_slice(),
                _ => target.values.as_slice(),
            };
            let mut acc = 0.0;
            let mut count = 0usize;
            for k in 0..n {
                if let Some(mask) = &target.mask {
                    if !mask[k] {
                        continue;
                    }
                }
                let simulated: f64 = target.sources.iter().map(|&s| rows[s][k]).sum();
                let e = simulated - observed[k];
                acc += target.ponder * target.weight * e * e;
                count += 1;
            }
            total += match self.aggregation {
                CostAggregation::Sum => acc,
                CostAggregation::Rms if count == 0 => 0.0,
                CostAggregation::Rms => (acc / count as f64).sqrt(),
                CostAggregation::Log10 => (1.0 + acc).log10(),
            };
        }
        total.is_finite().then_some(total)
    }
}

impl CostFunction for CostEvaluator<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Vec<f64>) -> Result<f64, Error> {
        Ok(self.evaluate(x).unwrap_or(f64::INFINITY))
    }
}

fn resolve_weight(weights: &Weights, c: Compartment, values: &[f64]) -> Result<f64, AppError> {
    let w = match weights {
        Weights::Mode(WeightMode::Uniform) => 1.0,
        Weights::Mode(WeightMode::InverseMean) => {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            if mean.abs() > 0.0 { 1.0 / mean.abs() } else { 1.0 }
        }
        Weights::Explicit(map) => map.get(&c).copied().unwrap_or(1.0),
    };
    if !(w.is_finite() && w >= 0.0) {
        return Err(AppError::config(format!(
            "Weight for {} must be finite and >= 0 (got {w}).",
            c.label()
        )));
    }
    Ok(w)
}

/// Keep samples whose value changed since the previous sample; the first
/// sample is always kept.
fn ponder_mask(values: &[f64]) -> (Option<Vec<bool>>, f64) {
    let mask: Vec<bool> = (0..values.len())
        .map(|k| k == 0 || values[k] != values[k - 1])
        .collect();
    let kept = mask.iter().filter(|&&m| m).count();
    let ponder = values.len() as f64 / kept as f64;
    (Some(mask), ponder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelKind, SimulationMode};
    use crate::models::Rates;
    use crate::sim::{SolverOptions, simulate};

    fn synthetic() -> (EpidemicModel, Dataset) {
        let model = EpidemicModel::new(ModelKind::Sir, 1e6)
            .unwrap()
            .with_mode(SimulationMode::Discrete);
        let grid: Vec<f64> = (0..30).map(|k| k as f64).collect();
        let rates = Rates {
            beta: 0.4,
            r: 0.1,
            extra: 0.0,
        };
        let sim = simulate(
            ModelKind::Sir,
            SimulationMode::Discrete,
            &[999_990.0, 10.0, 0.0],
            &grid,
            &rates,
            1e6,
            &SolverOptions::default(),
        )
        .unwrap();
        let series = [Compartment::S, Compartment::I, Compartment::R]
            .into_iter()
            .map(|c| (c, sim.trajectory.get(c).unwrap().to_vec()))
            .collect();
        (model, Dataset::new(grid, series).unwrap())
    }

    fn spec<'s>(focus: &'s [Compartment], weights: &'s Weights, aggregation: CostAggregation) -> CostSpec<'s> {
        CostSpec {
            focus,
            weights,
            aggregation,
            ponder: false,
            search_population: false,
        }
    }

    #[test]
    fn true_parameters_score_zero() {
        let (model, data) = synthetic();
        let weights = Weights::default();
        let focus = [Compartment::S, Compartment::I, Compartment::R];
        for aggregation in [CostAggregation::Sum, CostAggregation::Rms, CostAggregation::Log10] {
            let eval = CostEvaluator::new(&model, &data, vec![999_990.0, 10.0, 0.0], &spec(&focus, &weights, aggregation))
                .unwrap();
            let mut ctx = CostContext::new();
            let at_truth = eval.cost(&[0.4, 0.1], &mut ctx);
            let off = eval.cost(&[0.5, 0.1], &mut ctx);
            assert!(at_truth < 1e-9, "{aggregation:?}: {at_truth}");
            assert!(off > at_truth);
        }
    }

    #[test]
    fn empty_focus_costs_nothing() {
        let (model, data) = synthetic();
        let weights = Weights::default();
        let eval = CostEvaluator::new(&model, &data, vec![999_990.0, 10.0, 0.0], &spec(&[], &weights, CostAggregation::Log10))
            .unwrap();
        let mut ctx = CostContext::new();
        assert_eq!(eval.cost(&[3.0, 0.2], &mut ctx), 0.0);
    }

    #[test]
    fn failure_reuses_previous_cost_of_the_same_context() {
        let (model, data) = synthetic();
        let weights = Weights::Mode(WeightMode::Uniform);
        let focus = [Compartment::I];
        let eval = CostEvaluator::new(&model, &data, vec![999_990.0, 10.0, 0.0], &spec(&focus, &weights, CostAggregation::Sum))
            .unwrap();

        let mut fresh = CostContext::new();
        assert_eq!(eval.cost(&[1e200, 0.1], &mut fresh), FALLBACK_COST);

        let mut ctx = CostContext::new();
        let good = eval.cost(&[0.45, 0.1], &mut ctx);
        assert_eq!(eval.cost(&[1e200, 0.1], &mut ctx), good);
        assert_eq!(ctx.failures(), 1);
        assert_eq!(eval.failed_evaluations(), 2);
    }

    #[test]
    fn search_sees_failures_as_infinite() {
        let (model, data) = synthetic();
        let weights = Weights::Mode(WeightMode::Uniform);
        let focus = [Compartment::I];
        let eval = CostEvaluator::new(&model, &data, vec![999_990.0, 10.0, 0.0], &spec(&focus, &weights, CostAggregation::Sum))
            .unwrap();

        let failed = CostFunction::cost(&eval, &vec![1e200, 0.1]).unwrap();
        assert_eq!(failed, f64::INFINITY);
        let good = CostFunction::cost(&eval, &vec![0.45, 0.1]).unwrap();
        assert!(good.is_finite() && good < FALLBACK_COST);
        assert_eq!(eval.failed_evaluations(), 1);
    }

    #[test]
    fn missing_focus_series_is_a_shape_error() {
        let (model, data) = synthetic();
        let weights = Weights::default();
        let err = CostEvaluator::new(&model, &data, vec![999_990.0, 10.0], &spec(&[Compartment::R], &weights, CostAggregation::Sum))
            .unwrap_err();
        assert!(err.is_data_shape());
    }

    #[test]
    fn pondering_drops_flat_samples() {
        let (mask, ponder) = ponder_mask(&[0.0, 1.0, 1.0, 3.0]);
        assert_eq!(mask.unwrap(), vec![true, true, false, true]);
        assert!((ponder - 4.0 / 3.0).abs() < 1e-12);
    }
}
