//! Bounded global search driven by an argmin [`Executor`].
//!
//! The objective is any argmin [`CostFunction`] over `Vec<f64>`. It is wrapped
//! in a [`SearchProblem`] that adds the box bounds, an optional nonlinear
//! constraint and the annealing move, and then handed to one of two solvers:
//!
//! - [`Algorithm::DifferentialEvolution`]: the population search in
//!   [`crate::fit::evolution`]
//! - [`Algorithm::SimulatedAnnealing`]: argmin's single-walker annealer started
//!   from the geometric centre of the bounds
//!
//! Failed evaluations reach the solvers as `+inf`, so they never replace a
//! finite candidate. Deadline and cancellation are termination checks run
//! between iterations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{
    CostFunction, Error, Executor, IterState, KV, Problem, Solver, State, TerminationReason,
    TerminationStatus,
};
use argmin::solver::simulatedannealing::{Anneal, SATempFunc, SimulatedAnnealing};
use log::debug;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::domain::Bound;
use crate::error::AppError;
use crate::fit::evolution::{DifferentialEvolution, Strategy};

/// State shared by both solvers: parameter vector and scalar cost only.
pub type SearchState = IterState<Vec<f64>, (), (), (), (), f64>;

/// Search algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    #[value(name = "differential-evolution")]
    DifferentialEvolution,
    #[value(name = "simulated-annealing")]
    SimulatedAnnealing,
}

/// Optimizer knobs.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub algorithm: Algorithm,
    /// Population size multiplier: `popsize · dimensions` members (default: 15).
    pub popsize: usize,
    /// Mutation factor range; dithered per generation when `lo < hi`
    /// (default: (0.5, 1.2)).
    pub mutation: (f64, f64),
    /// Crossover probability (default: 0.7).
    pub recombination: f64,
    pub strategy: Strategy,
    /// Relative convergence tolerance (default: 1e-4).
    pub tol: f64,
    /// Absolute convergence tolerance (default: 0.0).
    pub atol: f64,
    /// Iteration cap (default: 4000).
    pub max_iterations: usize,
    /// Starting annealing temperature (default: 1.0).
    pub initial_temperature: f64,
    /// Annealing stops after this many iterations without a new best
    /// (default: 500).
    pub stall_iterations: usize,
    /// Seed for reproducible searches; `None` draws one from the OS.
    pub seed: Option<u64>,
    /// Stop between iterations once this instant has passed.
    pub deadline: Option<Instant>,
    /// Stop between iterations once this flag is set.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::DifferentialEvolution,
            popsize: 15,
            mutation: (0.5, 1.2),
            recombination: 0.7,
            strategy: Strategy::Best1Exp,
            tol: 1e-4,
            atol: 0.0,
            max_iterations: 4000,
            initial_temperature: 1.0,
            stall_iterations: 500,
            seed: None,
            deadline: None,
            cancel: None,
        }
    }
}

impl OptimizerConfig {
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_popsize(mut self, popsize: usize) -> Self {
        self.popsize = popsize;
        self
    }

    pub fn with_mutation(mut self, lo: f64, hi: f64) -> Self {
        self.mutation = (lo, hi);
        self
    }

    pub fn with_recombination(mut self, recombination: f64) -> Self {
        self.recombination = recombination;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_tolerance(mut self, tol: f64, atol: f64) -> Self {
        self.tol = tol;
        self.atol = atol;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_annealing(mut self, initial_temperature: f64, stall_iterations: usize) -> Self {
        self.initial_temperature = initial_temperature;
        self.stall_iterations = stall_iterations;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.popsize == 0 {
            return Err(AppError::config("Population size multiplier must be > 0."));
        }
        let (lo, hi) = self.mutation;
        if !(lo.is_finite() && hi.is_finite() && lo >= 0.0 && lo <= hi && hi <= 2.0) {
            return Err(AppError::config(format!(
                "Mutation range must satisfy 0 <= lo <= hi <= 2 (got {lo}, {hi})."
            )));
        }
        if !(0.0..=1.0).contains(&self.recombination) {
            return Err(AppError::config(format!(
                "Recombination must be in [0, 1] (got {}).",
                self.recombination
            )));
        }
        if !(self.tol.is_finite() && self.tol >= 0.0 && self.atol.is_finite() && self.atol >= 0.0) {
            return Err(AppError::config("Tolerances must be finite and >= 0."));
        }
        if !(self.initial_temperature.is_finite() && self.initial_temperature > 0.0) {
            return Err(AppError::config(format!(
                "Initial temperature must be finite and > 0 (got {}).",
                self.initial_temperature
            )));
        }
        Ok(())
    }

    /// Members in a differential evolution population over `dims` parameters.
    pub fn members(&self, dims: usize) -> usize {
        (self.popsize * dims).max(5)
    }

    fn rng(&self) -> StdRng {
        let seed = self.seed.unwrap_or_else(|| rand::thread_rng().r#gen());
        StdRng::seed_from_u64(seed)
    }
}

/// `lower <= g(x) <= upper`.
pub struct NonlinearConstraint<'a> {
    pub lower: f64,
    pub upper: f64,
    function: Box<dyn Fn(&[f64]) -> f64 + Send + Sync + 'a>,
}

impl<'a> NonlinearConstraint<'a> {
    pub fn new(
        lower: f64,
        upper: f64,
        function: impl Fn(&[f64]) -> f64 + Send + Sync + 'a,
    ) -> Self {
        Self {
            lower,
            upper,
            function: Box::new(function),
        }
    }

    /// Distance outside `[lower, upper]`; non-finite values count as infinitely
    /// far.
    pub fn violation(&self, x: &[f64]) -> f64 {
        let v = (self.function)(x);
        if !v.is_finite() {
            return f64::INFINITY;
        }
        (self.lower - v).max(0.0) + (v - self.upper).max(0.0)
    }
}

impl std::fmt::Debug for NonlinearConstraint<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonlinearConstraint")
            .field("lower", &self.lower)
            .field("upper", &self.upper)
            .finish_non_exhaustive()
    }
}

/// The argmin problem both solvers run on.
pub struct SearchProblem<'a, O> {
    objective: &'a O,
    bounds: &'a [Bound],
    constraint: Option<&'a NonlinearConstraint<'a>>,
    temperature: f64,
    rng: Mutex<StdRng>,
}

impl<'a, O> SearchProblem<'a, O>
where
    O: CostFunction<Param = Vec<f64>, Output = f64>,
{
    pub fn new(
        objective: &'a O,
        bounds: &'a [Bound],
        constraint: Option<&'a NonlinearConstraint<'a>>,
        config: &OptimizerConfig,
    ) -> Self {
        Self {
            objective,
            bounds,
            constraint,
            temperature: config.initial_temperature,
            rng: Mutex::new(config.rng()),
        }
    }

    pub fn bounds(&self) -> &[Bound] {
        self.bounds
    }

    pub fn violation(&self, x: &[f64]) -> f64 {
        self.constraint.map_or(0.0, |c| c.violation(x))
    }

    /// Objective value; `+inf` when the evaluation failed.
    pub fn energy(&self, x: &Vec<f64>) -> Result<f64, Error> {
        let cost = self.objective.cost(x)?;
        Ok(if cost.is_finite() { cost } else { f64::INFINITY })
    }
}

/// Per-coordinate geometric centre of positive bounds, midpoint otherwise.
fn centre(bounds: &[Bound]) -> Vec<f64> {
    bounds
        .iter()
        .map(|b| {
            if b.lower > 0.0 {
                (b.lower * b.upper).sqrt()
            } else {
                b.lower + 0.5 * b.width()
            }
        })
        .collect()
}

impl<O> CostFunction for SearchProblem<'_, O>
where
    O: CostFunction<Param = Vec<f64>, Output = f64>,
{
    type Param = Vec<f64>;
    type Output = f64;

    /// Infeasible points cost `+inf` without touching the objective.
    fn cost(&self, x: &Vec<f64>) -> Result<f64, Error> {
        if self.violation(x) > 0.0 {
            return Ok(f64::INFINITY);
        }
        self.energy(x)
    }
}

impl<O> Anneal for SearchProblem<'_, O>
where
    O: CostFunction<Param = Vec<f64>, Output = f64>,
{
    type Param = Vec<f64>;
    type Output = Vec<f64>;
    type Float = f64;

    /// Gaussian step on every coordinate, scaled by bound width and the
    /// current temperature, reflected back into the box.
    fn anneal(&self, x: &Vec<f64>, temperature: f64) -> Result<Vec<f64>, Error> {
        let scale = 0.5 * (temperature / self.temperature).min(1.0);
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| Error::msg("annealing rng lock poisoned"))?;
        Ok(x
            .iter()
            .zip(self.bounds)
            .map(|(&v, b)| {
                let step: f64 = rng.sample(StandardNormal);
                reflect(v + scale * b.width() * step, b)
            })
            .collect())
    }
}

fn reflect(mut v: f64, b: &Bound) -> f64 {
    if b.width() == 0.0 || !v.is_finite() {
        return b.lower;
    }
    for _ in 0..4 {
        if v < b.lower {
            v = 2.0 * b.lower - v;
        } else if v > b.upper {
            v = 2.0 * b.upper - v;
        } else {
            return v;
        }
    }
    v.clamp(b.lower, b.upper)
}

/// Adds deadline and cancellation checks to a solver's termination hook.
struct Supervised<S> {
    inner: S,
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<S> Supervised<S> {
    fn new(inner: S, config: &OptimizerConfig) -> Self {
        Self {
            inner,
            deadline: config.deadline,
            cancel: config.cancel.clone(),
        }
    }
}

impl<O, S> Solver<O, SearchState> for Supervised<S>
where
    S: Solver<O, SearchState>,
{
    const NAME: &'static str = <S as Solver<O, SearchState>>::NAME;

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: SearchState,
    ) -> Result<(SearchState, Option<KV>), Error> {
        self.inner.init(problem, state)
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        state: SearchState,
    ) -> Result<(SearchState, Option<KV>), Error> {
        self.inner.next_iter(problem, state)
    }

    fn terminate(&mut self, state: &SearchState) -> TerminationStatus {
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            return TerminationStatus::Terminated(TerminationReason::Interrupt);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return TerminationStatus::Terminated(TerminationReason::Timeout);
        }
        self.inner.terminate(state)
    }
}

/// Debug-level progress lines.
struct ProgressLog;

impl Observe<SearchState> for ProgressLog {
    fn observe_init(&mut self, name: &str, state: &SearchState, _kv: &KV) -> Result<(), Error> {
        debug!("{name}: initial best cost {:.6e}", state.get_best_cost());
        Ok(())
    }

    fn observe_iter(&mut self, state: &SearchState, kv: &KV) -> Result<(), Error> {
        let fallbacks = kv
            .get("fallbacks")
            .and_then(|v| v.get_uint())
            .unwrap_or(0);
        debug!(
            "iteration {}: best cost {:.6e} ({} evaluations, {fallbacks} absorbed failures)",
            state.get_iter(),
            state.get_best_cost(),
            state.get_func_counts().get("cost_count").copied().unwrap_or(0)
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    MaxIterations,
    Cancelled,
    DeadlineReached,
}

impl StopReason {
    fn from_status(status: &TerminationStatus) -> Self {
        match status {
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached) => {
                StopReason::Converged
            }
            // Annealing stalls once no better point turns up.
            TerminationStatus::Terminated(TerminationReason::SolverExit(_)) => StopReason::Converged,
            TerminationStatus::Terminated(TerminationReason::Interrupt) => StopReason::Cancelled,
            TerminationStatus::Terminated(TerminationReason::Timeout) => StopReason::DeadlineReached,
            TerminationStatus::Terminated(TerminationReason::MaxItersReached)
            | TerminationStatus::NotTerminated => StopReason::MaxIterations,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    /// Best point found, on the bounds' scale.
    pub x: Vec<f64>,
    pub cost: f64,
    /// Iterations run (0 when the initial population already converged).
    pub iterations: usize,
    pub evaluations: usize,
    pub stop: StopReason,
    /// False when no evaluated point ever satisfied the constraint.
    pub feasible: bool,
}

impl OptimizeOutcome {
    pub fn converged(&self) -> bool {
        self.stop == StopReason::Converged
    }
}

/// Minimise `objective` over `bounds` with the configured algorithm.
pub fn minimize<O>(
    objective: &O,
    bounds: &[Bound],
    constraint: Option<&NonlinearConstraint<'_>>,
    config: &OptimizerConfig,
) -> Result<OptimizeOutcome, AppError>
where
    O: CostFunction<Param = Vec<f64>, Output = f64> + Sync,
{
    config.validate()?;
    if bounds.is_empty() {
        return Err(AppError::config("Optimizer needs at least one bounded parameter."));
    }
    let problem = SearchProblem::new(objective, bounds, constraint, config);
    let max_iters = config.max_iterations as u64;

    let state = match config.algorithm {
        Algorithm::DifferentialEvolution => {
            let solver = Supervised::new(DifferentialEvolution::new(config, bounds.len()), config);
            Executor::new(problem, solver)
                .configure(|state| state.max_iters(max_iters))
                .add_observer(ProgressLog, ObserverMode::Every(100))
                .run()
                .map_err(|e| AppError::numeric(format!("Optimization failed: {e}")))?
                .state
        }
        Algorithm::SimulatedAnnealing => {
            let start = centre(bounds);
            let annealer = SimulatedAnnealing::new_with_rng(config.initial_temperature, config.rng())
                .map_err(|e| AppError::config(format!("Invalid annealing setup: {e}")))?
                .with_temp_func(SATempFunc::Boltzmann)
                .with_stall_best(config.stall_iterations as u64);
            let solver = Supervised::new(annealer, config);
            Executor::new(problem, solver)
                .configure(|state| state.param(start).max_iters(max_iters))
                .add_observer(ProgressLog, ObserverMode::Every(100))
                .run()
                .map_err(|e| AppError::numeric(format!("Optimization failed: {e}")))?
                .state
        }
    };

    let stop = StopReason::from_status(&state.termination_status);
    let evaluations = state
        .get_func_counts()
        .get("cost_count")
        .copied()
        .unwrap_or(0) as usize;
    let iterations = state.get_iter() as usize;
    let cost = state.get_best_cost();
    let x = state.best_param.unwrap_or_else(|| centre(bounds));
    let feasible = constraint.map_or(true, |c| c.violation(&x) == 0.0);
    Ok(OptimizeOutcome {
        x,
        cost,
        iterations,
        evaluations,
        stop,
        feasible,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sphere;

    impl CostFunction for Sphere {
        type Param = Vec<f64>;
        type Output = f64;

        fn cost(&self, x: &Vec<f64>) -> Result<f64, Error> {
            Ok(x.iter().map(|v| (v - 1.0) * (v - 1.0)).sum())
        }
    }

    /// Sphere that fails (NaN) outside a small region around the optimum.
    struct Fragile;

    impl CostFunction for Fragile {
        type Param = Vec<f64>;
        type Output = f64;

        fn cost(&self, x: &Vec<f64>) -> Result<f64, Error> {
            if x.iter().any(|v| (v - 1.0).abs() > 2.0) {
                return Ok(f64::NAN);
            }
            Sphere.cost(x)
        }
    }

    fn bounds(dims: usize) -> Vec<Bound> {
        vec![Bound { lower: -5.0, upper: 5.0 }; dims]
    }

    #[test]
    fn constraint_steers_the_search() {
        // Minimum at (1, 1) but the constraint requires x0 + x1 >= 4.
        let constraint = NonlinearConstraint::new(4.0, f64::INFINITY, |x: &[f64]| x[0] + x[1]);
        let config = OptimizerConfig::default().with_seed(Some(3)).with_tolerance(1e-8, 1e-12);
        let out = minimize(&Sphere, &bounds(2), Some(&constraint), &config).unwrap();
        assert!(out.feasible);
        assert!(out.x[0] + out.x[1] >= 4.0 - 1e-9);
        assert!((out.x[0] - 2.0).abs() < 0.05 && (out.x[1] - 2.0).abs() < 0.05, "{:?}", out.x);
    }

    #[test]
    fn failed_evaluations_never_win() {
        let config = OptimizerConfig::default().with_seed(Some(5)).with_max_iterations(200);
        let out = minimize(&Fragile, &bounds(2), None, &config).unwrap();
        assert!(out.cost.is_finite(), "cost={}", out.cost);
        assert!(out.x.iter().all(|v| (v - 1.0).abs() <= 2.0), "{:?}", out.x);
        assert!(out.cost < 1e-3, "cost={}", out.cost);
    }

    #[test]
    fn cancellation_stops_before_the_first_iteration() {
        let flag = Arc::new(AtomicBool::new(true));
        let config = OptimizerConfig::default().with_seed(Some(1)).with_cancel(flag);
        let out = minimize(&Sphere, &bounds(2), None, &config).unwrap();
        assert_eq!(out.stop, StopReason::Cancelled);
        assert_eq!(out.iterations, 0);
        assert!(!out.converged());
    }

    #[test]
    fn past_deadline_stops_the_search() {
        let config = OptimizerConfig::default()
            .with_seed(Some(1))
            .with_algorithm(Algorithm::SimulatedAnnealing)
            .with_deadline(Instant::now());
        let out = minimize(&Sphere, &bounds(2), None, &config).unwrap();
        assert_eq!(out.stop, StopReason::DeadlineReached);
        assert_eq!(out.iterations, 0);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let config = OptimizerConfig::default()
            .with_seed(Some(2))
            .with_tolerance(0.0, 0.0)
            .with_max_iterations(3);
        let out = minimize(&Sphere, &bounds(2), None, &config).unwrap();
        assert_eq!(out.stop, StopReason::MaxIterations);
        assert_eq!(out.iterations, 3);
        assert_eq!(out.evaluations, config.members(2) * 4);
    }

    #[test]
    fn annealing_approaches_the_minimum() {
        let config = OptimizerConfig::default()
            .with_algorithm(Algorithm::SimulatedAnnealing)
            .with_seed(Some(9))
            .with_annealing(1.0, 2000)
            .with_max_iterations(20_000);
        let out = minimize(&Sphere, &bounds(2), None, &config).unwrap();
        assert!(out.cost < 0.05, "cost={} x={:?}", out.cost, out.x);
        assert!(out.x.iter().zip(bounds(2)).all(|(&v, b)| b.contains(v)));
    }

    #[test]
    fn annealing_moves_stay_inside_the_box() {
        let b = bounds(3);
        let config = OptimizerConfig::default().with_seed(Some(4));
        let problem = SearchProblem::new(&Sphere, &b, None, &config);
        let mut x = vec![4.9, -4.9, 0.0];
        for _ in 0..200 {
            x = problem.anneal(&x, 1.0).unwrap();
            assert!(x.iter().zip(&b).all(|(&v, b)| b.contains(v)), "{x:?}");
        }
    }

    #[test]
    fn invalid_mutation_is_rejected() {
        let config = OptimizerConfig::default().with_mutation(1.5, 0.5);
        assert!(minimize(&Sphere, &bounds(1), None, &config).is_err());
    }
}
