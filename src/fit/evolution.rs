//! Bounded differential evolution as an argmin [`Solver`].
//!
//! Population-based, derivative-free global search over a box:
//!
//! - members live in the unit hypercube and are scaled onto the bounds for
//!   evaluation; the initial population is a Latin hypercube
//! - each generation builds one trial per member (mutation + crossover), scores
//!   all trials in parallel and then replaces a member only when its trial is
//!   strictly better (deferred updating)
//! - trial coordinates outside `[0, 1]` are redrawn uniformly
//! - with a nonlinear constraint, members are compared by feasibility first
//!   (feasible beats infeasible, smaller violation beats larger) and only
//!   feasible members are evaluated
//!
//! The solver reports convergence once `std(E) <= atol + tol·|mean(E)|` over
//! the population energies; the iteration cap belongs to the executor.

use argmin::core::{
    CostFunction, Error, KV, Problem, Solver, TerminationReason, TerminationStatus,
};
use argmin::kv;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::fit::cost::CostContext;
use crate::fit::search::{OptimizerConfig, SearchProblem, SearchState};

/// Mutation/crossover scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    #[value(name = "best1exp")]
    Best1Exp,
    #[value(name = "best2exp")]
    Best2Exp,
    #[value(name = "rand1exp")]
    Rand1Exp,
    #[value(name = "best1bin")]
    Best1Bin,
    #[value(name = "rand1bin")]
    Rand1Bin,
}

impl Strategy {
    fn exponential(self) -> bool {
        matches!(self, Strategy::Best1Exp | Strategy::Best2Exp | Strategy::Rand1Exp)
    }
}

#[derive(Debug, Clone, Copy)]
struct Score {
    /// Objective value; `+inf` for failed or skipped evaluations.
    energy: f64,
    violation: f64,
}

impl Score {
    /// Deb's feasibility rules, strict: ties keep the incumbent.
    fn beats(&self, other: &Score) -> bool {
        match (self.violation > 0.0, other.violation > 0.0) {
            (false, false) => self.energy < other.energy,
            (false, true) => true,
            (true, false) => false,
            (true, true) => self.violation < other.violation,
        }
    }
}

pub struct DifferentialEvolution {
    strategy: Strategy,
    mutation: (f64, f64),
    recombination: f64,
    tol: f64,
    atol: f64,
    members: usize,
    dims: usize,
    rng: StdRng,
    population: Vec<Vec<f64>>,
    scores: Vec<Score>,
    /// One fallback context per population slot.
    contexts: Vec<CostContext>,
    best: usize,
}

impl DifferentialEvolution {
    pub fn new(config: &OptimizerConfig, dims: usize) -> Self {
        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().r#gen());
        let members = config.members(dims);
        Self {
            strategy: config.strategy,
            mutation: config.mutation,
            recombination: config.recombination,
            tol: config.tol,
            atol: config.atol,
            members,
            dims,
            rng: StdRng::seed_from_u64(seed),
            population: Vec::new(),
            scores: Vec::new(),
            contexts: vec![CostContext::new(); members],
            best: 0,
        }
    }

    fn converged(&self) -> bool {
        let n = self.scores.len() as f64;
        let mean = self.scores.iter().map(|s| s.energy).sum::<f64>() / n;
        if !mean.is_finite() {
            return false;
        }
        let var = self
            .scores
            .iter()
            .map(|s| (s.energy - mean) * (s.energy - mean))
            .sum::<f64>()
            / n;
        var.sqrt() <= self.atol + self.tol * mean.abs()
    }

    fn fallbacks(&self) -> u64 {
        self.contexts.iter().map(|c| c.failures() as u64).sum()
    }

    /// Publish the best member as the state's current point.
    fn publish<O>(&self, problem: &SearchProblem<'_, O>, state: SearchState) -> SearchState
    where
        O: CostFunction<Param = Vec<f64>, Output = f64>,
    {
        let best = &self.scores[self.best];
        // Infeasible members carry no objective value.
        let cost = if best.violation > 0.0 {
            f64::INFINITY
        } else {
            best.energy
        };
        state
            .param(scale(problem, &self.population[self.best]))
            .cost(cost)
    }

    fn mutation_factor(&mut self) -> f64 {
        let (lo, hi) = self.mutation;
        if lo < hi { self.rng.gen_range(lo..hi) } else { lo }
    }

    /// `count` distinct member indices other than `exclude`.
    fn pick_distinct(&mut self, exclude: usize, count: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let r = self.rng.gen_range(0..self.members);
            if r != exclude && !out.contains(&r) {
                out.push(r);
            }
        }
        out
    }

    fn make_trial(&mut self, i: usize, f: f64) -> Vec<f64> {
        let dims = self.dims;
        let best = self.best;
        let mutant: Vec<f64> = match self.strategy {
            Strategy::Best1Exp | Strategy::Best1Bin => {
                let r = self.pick_distinct(i, 2);
                let p = &self.population;
                (0..dims)
                    .map(|d| p[best][d] + f * (p[r[0]][d] - p[r[1]][d]))
                    .collect()
            }
            Strategy::Best2Exp => {
                let r = self.pick_distinct(i, 4);
                let p = &self.population;
                (0..dims)
                    .map(|d| p[best][d] + f * (p[r[0]][d] + p[r[1]][d] - p[r[2]][d] - p[r[3]][d]))
                    .collect()
            }
            Strategy::Rand1Exp | Strategy::Rand1Bin => {
                let r = self.pick_distinct(i, 3);
                let p = &self.population;
                (0..dims)
                    .map(|d| p[r[0]][d] + f * (p[r[1]][d] - p[r[2]][d]))
                    .collect()
            }
        };

        let mut trial = self.population[i].clone();
        let mut fill = self.rng.gen_range(0..dims);
        let mut crossovers: Vec<bool> = (0..dims)
            .map(|_| self.rng.r#gen::<f64>() < self.recombination)
            .collect();
        if self.strategy.exponential() {
            crossovers[0] = true;
            let mut k = 0;
            while k < dims && crossovers[k] {
                trial[fill] = mutant[fill];
                fill = (fill + 1) % dims;
                k += 1;
            }
        } else {
            crossovers[fill] = true;
            for d in 0..dims {
                if crossovers[d] {
                    trial[d] = mutant[d];
                }
            }
        }

        for v in &mut trial {
            if !(0.0..=1.0).contains(v) {
                *v = self.rng.r#gen::<f64>();
            }
        }
        trial
    }
}

impl<'a, O> Solver<SearchProblem<'a, O>, SearchState> for DifferentialEvolution
where
    O: CostFunction<Param = Vec<f64>, Output = f64> + Sync,
{
    const NAME: &'static str = "Differential Evolution";

    fn init(
        &mut self,
        problem: &mut Problem<SearchProblem<'a, O>>,
        state: SearchState,
    ) -> Result<(SearchState, Option<KV>), Error> {
        self.population = latin_hypercube(self.members, self.dims, &mut self.rng);
        self.scores = score_all(problem, &self.population, &mut self.contexts)?;
        self.best = best_index(&self.scores);
        let search = problem
            .problem
            .as_ref()
            .ok_or_else(|| Error::msg("search problem missing"))?;
        let state = self.publish(search, state);
        Ok((
            state,
            Some(kv!(
                "members" => self.members as u64;
                "strategy" => format!("{:?}", self.strategy);
            )),
        ))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<SearchProblem<'a, O>>,
        state: SearchState,
    ) -> Result<(SearchState, Option<KV>), Error> {
        let f = self.mutation_factor();
        let trials: Vec<Vec<f64>> = (0..self.members).map(|i| self.make_trial(i, f)).collect();
        let trial_scores = score_all(problem, &trials, &mut self.contexts)?;

        let mut replaced = 0u64;
        for (i, (trial, score)) in trials.into_iter().zip(trial_scores).enumerate() {
            if score.beats(&self.scores[i]) {
                self.population[i] = trial;
                self.scores[i] = score;
                replaced += 1;
            }
        }
        self.best = best_index(&self.scores);

        let search = problem
            .problem
            .as_ref()
            .ok_or_else(|| Error::msg("search problem missing"))?;
        let state = self.publish(search, state);
        Ok((
            state,
            Some(kv!(
                "mutation" => f;
                "replaced" => replaced;
                "fallbacks" => self.fallbacks();
            )),
        ))
    }

    fn terminate(&mut self, _state: &SearchState) -> TerminationStatus {
        if self.converged() {
            return TerminationStatus::Terminated(TerminationReason::SolverConverged);
        }
        TerminationStatus::NotTerminated
    }
}

fn scale<O>(problem: &SearchProblem<'_, O>, unit: &[f64]) -> Vec<f64>
where
    O: CostFunction<Param = Vec<f64>, Output = f64>,
{
    unit.iter()
        .zip(problem.bounds())
        .map(|(&v, b)| b.lower + v * b.width())
        .collect()
}

/// Score every unit-cube point in parallel, one slot context per point.
fn score_all<O>(
    problem: &mut Problem<SearchProblem<'_, O>>,
    units: &[Vec<f64>],
    contexts: &mut [CostContext],
) -> Result<Vec<Score>, Error>
where
    O: CostFunction<Param = Vec<f64>, Output = f64> + Sync,
{
    problem.bulk_problem("cost_count", units.len(), |search| {
        units
            .par_iter()
            .zip(contexts.par_iter_mut())
            .map(|(u, ctx)| {
                let x = scale(search, u);
                let violation = search.violation(&x);
                if violation > 0.0 {
                    return Ok(Score {
                        energy: f64::INFINITY,
                        violation,
                    });
                }
                let energy = search.energy(&x)?;
                ctx.absorb(energy.is_finite().then_some(energy));
                Ok(Score { energy, violation })
            })
            .collect()
    })
}

fn latin_hypercube(members: usize, dims: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut population = vec![vec![0.0; dims]; members];
    let segment = 1.0 / members as f64;
    for d in 0..dims {
        let mut column: Vec<f64> = (0..members)
            .map(|i| (i as f64 + rng.r#gen::<f64>()) * segment)
            .collect();
        column.shuffle(rng);
        for (member, v) in population.iter_mut().zip(column) {
            member[d] = v;
        }
    }
    population
}

fn best_index(scores: &[Score]) -> usize {
    let mut best = 0;
    for (i, s) in scores.iter().enumerate().skip(1) {
        if s.beats(&scores[best]) {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bound;
    use crate::fit::search::{StopReason, minimize};

    struct Sphere;

    impl CostFunction for Sphere {
        type Param = Vec<f64>;
        type Output = f64;

        fn cost(&self, x: &Vec<f64>) -> Result<f64, Error> {
            Ok(x.iter().map(|v| (v - 1.0) * (v - 1.0)).sum())
        }
    }

    fn bounds(dims: usize) -> Vec<Bound> {
        vec![Bound { lower: -5.0, upper: 5.0 }; dims]
    }

    #[test]
    fn finds_sphere_minimum_for_every_strategy() {
        for strategy in [
            Strategy::Best1Exp,
            Strategy::Best2Exp,
            Strategy::Rand1Exp,
            Strategy::Best1Bin,
            Strategy::Rand1Bin,
        ] {
            let config = OptimizerConfig::default()
                .with_strategy(strategy)
                .with_seed(Some(7))
                .with_tolerance(1e-8, 1e-12);
            let out = minimize(&Sphere, &bounds(3), None, &config).unwrap();
            assert!(out.converged(), "{strategy:?} stopped with {:?}", out.stop);
            for v in &out.x {
                assert!((v - 1.0).abs() < 1e-2, "{strategy:?}: {:?}", out.x);
            }
        }
    }

    #[test]
    fn same_seed_same_result() {
        let config = OptimizerConfig::default().with_seed(Some(42)).with_max_iterations(50);
        let a = minimize(&Sphere, &bounds(2), None, &config).unwrap();
        let b = minimize(&Sphere, &bounds(2), None, &config).unwrap();
        assert_eq!(a.x, b.x);
        assert_eq!(a.evaluations, b.evaluations);
        assert_eq!(a.stop, b.stop);
    }

    #[test]
    fn ties_keep_the_incumbent() {
        let member = Score {
            energy: 3.0,
            violation: 0.0,
        };
        let tie = Score {
            energy: 3.0,
            violation: 0.0,
        };
        let failed = Score {
            energy: f64::INFINITY,
            violation: 0.0,
        };
        assert!(!tie.beats(&member));
        assert!(!failed.beats(&member));
        assert!(!failed.beats(&failed));
        assert!(member.beats(&failed));
    }

    #[test]
    fn feasibility_outranks_energy() {
        let feasible = Score {
            energy: 10.0,
            violation: 0.0,
        };
        let infeasible = Score {
            energy: f64::INFINITY,
            violation: 0.5,
        };
        let closer = Score {
            energy: f64::INFINITY,
            violation: 0.1,
        };
        assert!(feasible.beats(&infeasible));
        assert!(!infeasible.beats(&feasible));
        assert!(closer.beats(&infeasible));
        assert_eq!(best_index(&[infeasible, closer, feasible]), 2);
    }

    #[test]
    fn latin_hypercube_fills_every_stratum() {
        let mut rng = StdRng::seed_from_u64(0);
        let population = latin_hypercube(10, 2, &mut rng);
        for d in 0..2 {
            let mut strata: Vec<usize> = population.iter().map(|m| (m[d] * 10.0) as usize).collect();
            strata.sort_unstable();
            assert_eq!(strata, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn converged_initial_population_runs_no_generations() {
        struct Flat;
        impl CostFunction for Flat {
            type Param = Vec<f64>;
            type Output = f64;
            fn cost(&self, _x: &Vec<f64>) -> Result<f64, Error> {
                Ok(2.0)
            }
        }
        let config = OptimizerConfig::default().with_seed(Some(1));
        let out = minimize(&Flat, &bounds(2), None, &config).unwrap();
        assert_eq!(out.stop, StopReason::Converged);
        assert_eq!(out.iterations, 0);
        assert_eq!(out.evaluations, config.members(2));
    }
}
