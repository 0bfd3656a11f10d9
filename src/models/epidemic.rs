//! Model configuration and the immutable fitted model.
//!
//! `EpidemicModel` is the uniform entry point over the variants: the variant is
//! chosen once at construction and every simulation goes through
//! [`crate::sim::simulate`] with the same shape of inputs.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::domain::{Advisory, Compartment, Dataset, FitResult, ModelKind, ParamSpace, SimulationMode};
use crate::error::AppError;
use crate::models::model::{Decoded, decode};
use crate::sim::{Simulation, SolverOptions, Trajectory, simulate, simulate_ivp};

/// A compartmental model bound to a population size and simulation mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpidemicModel {
    pub kind: ModelKind,
    pub mode: SimulationMode,
    pub space: ParamSpace,
    /// Total population `N` (scaled by the fitted fraction when searched).
    pub population: f64,
    pub solver: SolverOptions,
}

impl EpidemicModel {
    pub fn new(kind: ModelKind, population: f64) -> Result<Self, AppError> {
        if !(population.is_finite() && population > 0.0) {
            return Err(AppError::config(format!(
                "Population must be finite and > 0 (got {population})."
            )));
        }
        Ok(Self {
            kind,
            mode: SimulationMode::Discrete,
            space: ParamSpace::Rates,
            population,
            solver: SolverOptions::default(),
        })
    }

    pub fn with_mode(mut self, mode: SimulationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_space(mut self, space: ParamSpace) -> Self {
        self.space = space;
        self
    }

    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    pub fn param_names(&self, search_population: bool) -> Vec<String> {
        self.kind.param_names(self.space, search_population)
    }

    /// Decode optimizer coordinates into rates (+ population fraction).
    pub fn decode(&self, x: &[f64], search_population: bool) -> Result<Decoded, AppError> {
        let expected = self.kind.param_len(search_population);
        if x.len() != expected {
            return Err(AppError::data_shape(format!(
                "{} expects {expected} parameters, got {}.",
                self.kind.display_name(),
                x.len()
            )));
        }
        Ok(decode(self.kind, self.space, x, search_population))
    }

    /// Simulate from `initial` on `grid` with optimizer coordinates `x`.
    ///
    /// When `search_population` is set, the last coordinate scales both the
    /// initial susceptibles and the population used by the force of infection.
    pub fn simulate(
        &self,
        initial: &[f64],
        grid: &[f64],
        x: &[f64],
        search_population: bool,
    ) -> Result<Simulation, AppError> {
        let decoded = self.decode(x, search_population)?;
        let mut start = initial.to_vec();
        if let Some(s0) = start.first_mut() {
            *s0 *= decoded.pop_fraction;
        }
        simulate(
            self.kind,
            self.mode,
            &start,
            grid,
            &decoded.rates,
            self.population * decoded.pop_fraction,
            &self.solver,
        )
    }

    /// Initial state read off the first sample of a dataset.
    ///
    /// Unobserved latent compartments start equal to the observed infected count
    /// (`E₀ = I₀`, `Q₀ = I₀`). Missing `S` is derived so the tracked state sums
    /// to `N`: `N - (E + I + R + D)` over the compartments the variant has. `Q`
    /// is a reporting view of `I` and takes no population of its own. The SIR variant runs in its 2-compartment form
    /// when no `R` series is present.
    pub fn initial_state(&self, dataset: &Dataset) -> Result<Vec<f64>, AppError> {
        self.initial_state_at(dataset, 0)
    }

    /// Like [`EpidemicModel::initial_state`] but at sample `k`.
    pub fn initial_state_at(&self, dataset: &Dataset, k: usize) -> Result<Vec<f64>, AppError> {
        if k >= dataset.len() {
            return Err(AppError::data_shape(format!(
                "Initial sample {k} is outside the dataset (len={}).",
                dataset.len()
            )));
        }
        let at = |c: Compartment| dataset.get(c).map(|v| v[k]);
        let i0 = dataset.require(Compartment::I)?[k];
        let r0 = at(Compartment::R);
        let d0 = at(Compartment::D);
        if self.kind == ModelKind::Sird && d0.is_none() {
            return Err(AppError::data_shape("SIRD requires a D (deaths) series."));
        }
        let e0 = if self.kind == ModelKind::Seir { i0 } else { 0.0 };
        // Only SIRD tracks deaths; elsewhere a D series stays outside the state.
        let tracked_d0 = if self.kind == ModelKind::Sird {
            d0.unwrap_or(0.0)
        } else {
            0.0
        };
        let s0 = at(Compartment::S)
            .unwrap_or_else(|| self.population - e0 - i0 - r0.unwrap_or(0.0) - tracked_d0);
        let r0 = r0.unwrap_or(0.0);

        Ok(match self.kind {
            ModelKind::Sir if dataset.contains(Compartment::R) => vec![s0, i0, r0],
            ModelKind::Sir => vec![s0, i0],
            ModelKind::Seir => vec![s0, e0, i0, r0],
            ModelKind::Sird => vec![s0, i0, r0, d0.unwrap_or(0.0)],
            ModelKind::Nsir => vec![s0, i0, i0, r0],
        })
    }
}

/// Zero initial susceptibles or infected leave the model with nothing to do.
pub fn degenerate_input(kind: ModelKind, initial: &[f64]) -> Vec<Advisory> {
    let mut out = Vec::new();
    let layout = kind.layout_for_len(initial.len()).unwrap_or(kind.layout());
    for (c, &v) in layout.iter().zip(initial) {
        if matches!(c, Compartment::S | Compartment::I) && v == 0.0 {
            warn!(
                "{} initial {} is zero; the model is not exciting enough to fit reliably",
                kind.display_name(),
                c.label()
            );
            out.push(Advisory::DegenerateInput { compartment: *c });
        }
    }
    out
}

/// A model together with its fitted parameters. Parameters never change after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    model: EpidemicModel,
    result: FitResult,
}

impl FittedModel {
    pub(crate) fn new(model: EpidemicModel, result: FitResult) -> Self {
        Self { model, result }
    }

    pub fn model(&self) -> &EpidemicModel {
        &self.model
    }

    pub fn result(&self) -> &FitResult {
        &self.result
    }

    pub fn into_result(self) -> FitResult {
        self.result
    }

    /// Forecast from `initial` over an arbitrary grid with the fitted parameters.
    pub fn predict(&self, initial: &[f64], grid: &[f64]) -> Result<Trajectory, AppError> {
        let x = self.result.parameters.as_slice();
        if x.iter().any(|v| !v.is_finite()) {
            return Err(AppError::numeric("Fitted parameters are not finite; cannot forecast."));
        }
        let sim = self
            .model
            .simulate(initial, grid, x, self.result.search_population)?;
        Ok(sim.trajectory)
    }

    /// Forecast over an explicit span sampled at `t_eval` (irregular grids).
    pub fn predict_ivp(
        &self,
        initial: &[f64],
        t_span: (f64, f64),
        t_eval: &[f64],
    ) -> Result<Trajectory, AppError> {
        let decoded = self
            .model
            .decode(self.result.parameters.as_slice(), self.result.search_population)?;
        let mut start = initial.to_vec();
        if let Some(s0) = start.first_mut() {
            *s0 *= decoded.pop_fraction;
        }
        let sim = simulate_ivp(
            self.model.kind,
            &start,
            t_span,
            t_eval,
            &decoded.rates,
            self.model.population * decoded.pop_fraction,
            &self.model.solver,
        )?;
        Ok(sim.trajectory)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn dataset(with_r: bool) -> Dataset {
        let mut series = BTreeMap::new();
        series.insert(Compartment::I, vec![10.0, 12.0]);
        if with_r {
            series.insert(Compartment::R, vec![1.0, 2.0]);
        }
        Dataset::new(vec![0.0, 1.0], series).unwrap()
    }

    #[test]
    fn initial_state_derives_susceptibles() {
        let model = EpidemicModel::new(ModelKind::Sir, 1000.0).unwrap();
        assert_eq!(model.initial_state(&dataset(true)).unwrap(), vec![989.0, 10.0, 1.0]);
        assert_eq!(model.initial_state(&dataset(false)).unwrap(), vec![990.0, 10.0]);
    }

    #[test]
    fn derived_initial_state_holds_the_whole_population() {
        let mut series = BTreeMap::new();
        series.insert(Compartment::I, vec![10.0, 12.0]);
        series.insert(Compartment::R, vec![4.0, 5.0]);
        series.insert(Compartment::D, vec![1.0, 1.0]);
        let data = Dataset::new(vec![0.0, 1.0], series).unwrap();

        for kind in [ModelKind::Sir, ModelKind::Seir, ModelKind::Sird, ModelKind::Nsir] {
            let model = EpidemicModel::new(kind, 1000.0).unwrap();
            let state = model.initial_state(&data).unwrap();
            let layout = kind.layout_for_len(state.len()).unwrap();
            // Q mirrors I and is not counted.
            let total: f64 = layout
                .iter()
                .zip(&state)
                .filter(|(c, _)| **c != Compartment::Q)
                .map(|(_, v)| v)
                .sum();
            assert_eq!(total, 1000.0, "{kind:?}: {state:?}");
        }
        let seir = EpidemicModel::new(ModelKind::Seir, 1000.0).unwrap();
        assert_eq!(seir.initial_state(&data).unwrap(), vec![976.0, 10.0, 10.0, 4.0]);
    }

    #[test]
    fn sird_without_deaths_is_a_shape_error() {
        let model = EpidemicModel::new(ModelKind::Sird, 1000.0).unwrap();
        assert!(model.initial_state(&dataset(true)).unwrap_err().is_data_shape());
    }

    #[test]
    fn population_fraction_scales_susceptibles() {
        let model = EpidemicModel::new(ModelKind::Sir, 1000.0).unwrap();
        let sim = model
            .simulate(&[990.0, 10.0, 0.0], &[0.0], &[0.3, 0.1, 0.5], true)
            .unwrap();
        assert_eq!(sim.trajectory.state_at(0), vec![495.0, 10.0, 0.0]);
    }

    #[test]
    fn short_parameter_vectors_are_rejected_not_indexed() {
        let model = EpidemicModel::new(ModelKind::Seir, 1000.0).unwrap();
        assert!(model.decode(&[0.3, 0.1], false).unwrap_err().is_data_shape());
        assert!(model.decode(&[0.3, 0.1, 0.2], true).unwrap_err().is_data_shape());
        assert!(
            model
                .simulate(&[980.0, 10.0, 10.0, 0.0], &[0.0, 1.0], &[0.3], false)
                .is_err()
        );
        let decoded = model.decode(&[0.3, 0.1, 0.2, 0.5], true).unwrap();
        assert_eq!(decoded.pop_fraction, 0.5);
    }

    #[test]
    fn zero_infected_is_flagged() {
        let adv = degenerate_input(ModelKind::Sir, &[1000.0, 0.0, 0.0]);
        assert_eq!(adv, vec![Advisory::DegenerateInput { compartment: Compartment::I }]);
    }

    #[test]
    fn rejects_non_positive_population() {
        assert!(EpidemicModel::new(ModelKind::Sir, 0.0).is_err());
    }
}
