//! Simulator: advance a compartment state over a time grid under fixed rates.
//!
//! Three modes (see [`SimulationMode`]):
//!
//! - `Continuous`: adaptive RK45 restarted on every grid interval
//! - `Ivp`: one adaptive RK45 pass over an explicit span, sampled at requested
//!   points (step size carried across samples; suits irregular grids)
//! - `Discrete`: compensated forward Euler on the grid itself
//!
//! Guarantees: the trajectory has exactly one sample per grid point and the
//! first sample equals the initial state. Numeric blow-ups never error; the
//! remaining samples are NaN and `SolverStats::failed` is set.

pub mod euler;
pub mod rk45;
pub mod trajectory;

pub use rk45::SolverOptions;
pub use trajectory::*;

use crate::domain::{Compartment, ModelKind, SimulationMode};
use crate::error::AppError;
use crate::models::{Rates, derivative};

/// Simulate `model` from `initial` over `grid`.
pub fn simulate(
    model: ModelKind,
    mode: SimulationMode,
    initial: &[f64],
    grid: &[f64],
    rates: &Rates,
    population: f64,
    opts: &SolverOptions,
) -> Result<Simulation, AppError> {
    let layout = resolve_layout(model, initial)?;
    validate_grid(grid)?;

    match mode {
        SimulationMode::Discrete => {
            let trajectory = euler::integrate(model, layout, initial, grid, rates, population);
            let stats = opts.full_output.then(|| SolverStats {
                accepted_steps: grid.len() - 1,
                rejected_steps: 0,
                rhs_evaluations: grid.len() - 1,
                failed: !trajectory.is_finite(),
            });
            Ok(Simulation { trajectory, stats })
        }
        SimulationMode::Continuous => {
            integrate_adaptive(model, layout, initial, grid[0], grid, rates, population, opts, false)
        }
        SimulationMode::Ivp => {
            integrate_adaptive(model, layout, initial, grid[0], grid, rates, population, opts, true)
        }
    }
}

/// Event-aware continuous integration over `t_span`, sampled at `t_eval`.
///
/// `t_eval` must be strictly increasing and lie inside `t_span`; it need not
/// start at `t_span.0`, in which case the first sample is not the initial state.
pub fn simulate_ivp(
    model: ModelKind,
    initial: &[f64],
    t_span: (f64, f64),
    t_eval: &[f64],
    rates: &Rates,
    population: f64,
    opts: &SolverOptions,
) -> Result<Simulation, AppError> {
    let layout = resolve_layout(model, initial)?;
    validate_grid(t_eval)?;
    let (t0, t1) = t_span;
    if !(t0.is_finite() && t1.is_finite() && t0 <= t1) {
        return Err(AppError::config(format!("Invalid integration span [{t0}, {t1}].")));
    }
    if t_eval[0] < t0 || t_eval[t_eval.len() - 1] > t1 {
        return Err(AppError::config(format!(
            "Evaluation points must lie inside the span [{t0}, {t1}]."
        )));
    }
    integrate_adaptive(model, layout, initial, t0, t_eval, rates, population, opts, true)
}

fn integrate_adaptive(
    model: ModelKind,
    layout: &[Compartment],
    initial: &[f64],
    t_start: f64,
    t_eval: &[f64],
    rates: &Rates,
    population: f64,
    opts: &SolverOptions,
    carry_step: bool,
) -> Result<Simulation, AppError> {
    if !opts.is_valid() {
        return Err(AppError::config("Invalid solver options (tolerances/steps must be > 0)."));
    }

    let rhs = |_t: f64, y: &[f64], dy: &mut [f64]| derivative(model, y, rates, population, dy);
    let mut ws = rk45::Rk45Workspace::new(initial.len());
    let mut stats = SolverStats::default();
    let mut traj = Trajectory::with_capacity(layout, t_eval.len());
    let mut y = initial.to_vec();

    let span = t_eval[t_eval.len() - 1] - t_start;
    let mut h = opts.initial_step(span.max(opts.h_min));
    let mut t = t_start;

    for (k, &target) in t_eval.iter().enumerate() {
        if target > t {
            if !carry_step {
                h = opts.initial_step(target - t);
            }
            let ok = rk45::advance(&rhs, &mut y, t, target, &mut h, opts, &mut ws, &mut stats);
            if !ok || y.iter().any(|v| !v.is_finite()) {
                stats.failed = true;
                traj.fill_invalid(&t_eval[k..]);
                break;
            }
            t = target;
        }
        traj.push(target, &y);
    }

    Ok(Simulation {
        trajectory: traj,
        stats: opts.full_output.then_some(stats),
    })
}

fn resolve_layout(model: ModelKind, initial: &[f64]) -> Result<&'static [Compartment], AppError> {
    let layout = model.layout_for_len(initial.len()).ok_or_else(|| {
        AppError::data_shape(format!(
            "{} cannot simulate a state of {} compartments.",
            model.display_name(),
            initial.len()
        ))
    })?;
    if initial.iter().any(|v| !v.is_finite()) {
        return Err(AppError::data_shape("Initial state must be finite."));
    }
    Ok(layout)
}

fn validate_grid(grid: &[f64]) -> Result<(), AppError> {
    if grid.is_empty() {
        return Err(AppError::data_shape("Time grid is empty."));
    }
    if grid.iter().any(|t| !t.is_finite()) || grid.windows(2).any(|w| w[1] <= w[0]) {
        return Err(AppError::data_shape("Time grid must be finite and strictly increasing."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATES: Rates = Rates {
        beta: 0.4,
        r: 0.1,
        extra: 0.0,
    };

    fn days(n: usize) -> Vec<f64> {
        (0..n).map(|k| k as f64).collect()
    }

    #[test]
    fn single_point_grid_returns_initial_state() {
        let initial = [999_990.0, 10.0, 0.0];
        for mode in [SimulationMode::Continuous, SimulationMode::Ivp, SimulationMode::Discrete] {
            let sim = simulate(ModelKind::Sir, mode, &initial, &[0.0], &RATES, 1e6, &SolverOptions::default())
                .unwrap();
            assert_eq!(sim.trajectory.len(), 1);
            assert_eq!(sim.trajectory.state_at(0), initial.to_vec());
        }
    }

    #[test]
    fn trajectory_length_matches_grid_and_starts_at_initial() {
        let initial = [999_990.0, 10.0, 0.0];
        let grid = days(61);
        for mode in [SimulationMode::Continuous, SimulationMode::Ivp, SimulationMode::Discrete] {
            let sim =
                simulate(ModelKind::Sir, mode, &initial, &grid, &RATES, 1e6, &SolverOptions::default()).unwrap();
            assert_eq!(sim.trajectory.len(), grid.len());
            assert_eq!(sim.trajectory.state_at(0), initial.to_vec());
            assert!(sim.trajectory.is_finite());
        }
    }

    #[test]
    fn continuous_sir_conserves_population() {
        let initial = [999_990.0, 10.0, 0.0];
        let sim = simulate(
            ModelKind::Sir,
            SimulationMode::Continuous,
            &initial,
            &days(120),
            &RATES,
            1e6,
            &SolverOptions::default(),
        )
        .unwrap();
        for total in sim.trajectory.totals() {
            assert!((total - 1e6).abs() / 1e6 < 1e-8, "total={total}");
        }
    }

    #[test]
    fn discrete_sir_conserves_population() {
        let initial = [999_990.0, 10.0, 0.0];
        let sim = simulate(
            ModelKind::Sir,
            SimulationMode::Discrete,
            &initial,
            &days(365),
            &RATES,
            1e6,
            &SolverOptions::default(),
        )
        .unwrap();
        for total in sim.trajectory.totals() {
            assert!((total - 1e6).abs() < 1e-6, "total={total}");
        }
    }

    #[test]
    fn continuous_and_discrete_agree_on_fine_grid() {
        let initial = [999_990.0, 10.0, 0.0];
        let fine: Vec<f64> = (0..=6000).map(|k| k as f64 * 0.01).collect();
        let opts = SolverOptions::default();
        let cont = simulate(ModelKind::Sir, SimulationMode::Continuous, &initial, &fine, &RATES, 1e6, &opts).unwrap();
        let disc = simulate(ModelKind::Sir, SimulationMode::Discrete, &initial, &fine, &RATES, 1e6, &opts).unwrap();
        let ic = cont.trajectory.get(Compartment::I).unwrap();
        let id = disc.trajectory.get(Compartment::I).unwrap();
        let peak = ic.iter().cloned().fold(0.0, f64::max);
        let max_gap = ic.iter().zip(id).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
        assert!(max_gap / peak < 0.05, "gap={max_gap} peak={peak}");
    }

    #[test]
    fn ivp_samples_inside_span() {
        let initial = [999_990.0, 10.0, 0.0];
        let opts = SolverOptions::default().with_full_output(true);
        let sim = simulate_ivp(ModelKind::Sir, &initial, (0.0, 50.0), &[10.0, 20.5, 50.0], &RATES, 1e6, &opts)
            .unwrap();
        assert_eq!(sim.trajectory.len(), 3);
        assert!(sim.trajectory.get(Compartment::I).unwrap()[0] > 10.0);
        assert!(sim.stats.unwrap().accepted_steps > 0);
    }

    #[test]
    fn rejects_wrong_state_length() {
        let err = simulate(
            ModelKind::Seir,
            SimulationMode::Discrete,
            &[1.0, 2.0, 3.0],
            &[0.0, 1.0],
            &RATES,
            1.0,
            &SolverOptions::default(),
        )
        .unwrap_err();
        assert!(err.is_data_shape());
    }

    #[test]
    fn numeric_blow_up_pads_with_nan() {
        let rates = Rates {
            beta: 1e200,
            r: 0.1,
            extra: 0.0,
        };
        let sim = simulate(
            ModelKind::Sir,
            SimulationMode::Discrete,
            &[1e6, 1e6, 0.0],
            &days(10),
            &rates,
            1.0,
            &SolverOptions::default().with_full_output(true),
        )
        .unwrap();
        assert_eq!(sim.trajectory.len(), 10);
        assert!(!sim.trajectory.is_finite());
        assert!(sim.stats.unwrap().failed);
    }
}
