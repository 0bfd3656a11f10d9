//! Simulation output containers.

use serde::{Deserialize, Serialize};

use crate::domain::{Compartment, CompartmentSet};

/// Per-compartment trajectories sampled on a time grid.
///
/// `values[c][k]` is compartment `layout[c]` at `time[k]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub layout: Vec<Compartment>,
    pub time: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

impl Trajectory {
    pub(crate) fn with_capacity(layout: &[Compartment], n: usize) -> Self {
        Self {
            layout: layout.to_vec(),
            time: Vec::with_capacity(n),
            values: layout.iter().map(|_| Vec::with_capacity(n)).collect(),
        }
    }

    pub(crate) fn push(&mut self, t: f64, state: &[f64]) {
        self.time.push(t);
        for (series, &v) in self.values.iter_mut().zip(state) {
            series.push(v);
        }
    }

    /// Pad the remaining grid points with NaN after an integration failure.
    pub(crate) fn fill_invalid(&mut self, remaining: &[f64]) {
        for &t in remaining {
            self.time.push(t);
            for series in &mut self.values {
                series.push(f64::NAN);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn get(&self, c: Compartment) -> Option<&[f64]> {
        self.layout
            .iter()
            .position(|&x| x == c)
            .map(|i| self.values[i].as_slice())
    }

    /// State vector at sample `k`.
    pub fn state_at(&self, k: usize) -> Vec<f64> {
        self.values.iter().map(|series| series[k]).collect()
    }

    /// Last sample as a named state; `None` when empty or not finite.
    pub fn final_state(&self) -> Option<CompartmentSet> {
        let last = self.len().checked_sub(1)?;
        CompartmentSet::new(&self.layout, self.state_at(last)).ok()
    }

    /// Sum of all compartments at every sample.
    pub fn totals(&self) -> Vec<f64> {
        (0..self.len())
            .map(|k| self.values.iter().map(|series| series[k]).sum())
            .collect()
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().flatten().all(|v| v.is_finite())
    }
}

/// Integrator bookkeeping ("full output").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub rhs_evaluations: usize,
    /// True when the step budget ran out or the state became non-finite.
    pub failed: bool,
}

/// A trajectory plus optional solver diagnostics.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub trajectory: Trajectory,
    pub stats: Option<SolverStats>,
}
