//! Fixed-step forward Euler recursion on the sample grid.
//!
//! `x[k] = x[k-1] + (t[k] - t[k-1]) · ẋ[k-1]`
//!
//! Each compartment is accumulated with a Neumaier sum so that a long series
//! (hundreds of daily steps, increments far below `S`) does not drift.

use crate::domain::{Compartment, ModelKind};
use crate::math::NeumaierSum;
use crate::models::{Rates, derivative};
use crate::sim::trajectory::Trajectory;

pub(crate) fn integrate(
    model: ModelKind,
    layout: &[Compartment],
    initial: &[f64],
    grid: &[f64],
    rates: &Rates,
    population: f64,
) -> Trajectory {
    let n = initial.len();
    let mut traj = Trajectory::with_capacity(layout, grid.len());
    let mut acc: Vec<NeumaierSum> = initial.iter().map(|&v| NeumaierSum::new(v)).collect();
    let mut state = initial.to_vec();
    let mut rate = vec![0.0; n];

    traj.push(grid[0], &state);
    for (k, w) in grid.windows(2).enumerate() {
        let dt = w[1] - w[0];
        derivative(model, &state, rates, population, &mut rate);
        for i in 0..n {
            acc[i].add(dt * rate[i]);
            state[i] = acc[i].value();
        }
        if state.iter().any(|v| !v.is_finite()) {
            traj.fill_invalid(&grid[k + 1..]);
            return traj;
        }
        traj.push(w[1], &state);
    }
    traj
}
