//! Dormand–Prince 4(5) adaptive integrator.
//!
//! Compartmental models are non-stiff for realistic rates, so a single explicit
//! embedded pair covers both continuous modes. The integrator advances the
//! state in place between two time points and reports failure instead of
//! erroring: callers pad the trajectory with NaN and let the cost evaluator
//! absorb it.

use serde::{Deserialize, Serialize};

use crate::sim::trajectory::SolverStats;

/// Configuration for the adaptive integrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Relative tolerance (default: 1e-6).
    pub rtol: f64,
    /// Absolute tolerance (default: 1e-6; states are head counts).
    pub atol: f64,
    /// Minimum step size (default: 1e-10).
    pub h_min: f64,
    /// Maximum step size (`None`: unbounded).
    pub h_max: Option<f64>,
    /// Step budget per call (default: 100_000).
    pub max_steps: usize,
    /// Return `SolverStats` alongside the trajectory.
    pub full_output: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-6,
            h_min: 1e-10,
            h_max: None,
            max_steps: 100_000,
            full_output: false,
        }
    }
}

impl SolverOptions {
    pub fn with_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.rtol = rtol;
        self.atol = atol;
        self
    }

    pub fn with_full_output(mut self, full_output: bool) -> Self {
        self.full_output = full_output;
        self
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.rtol.is_finite()
            && self.rtol > 0.0
            && self.atol.is_finite()
            && self.atol > 0.0
            && self.h_min > 0.0
            && self.h_max.is_none_or(|h| h > 0.0)
            && self.max_steps > 0
    }

    fn max_step(&self) -> f64 {
        self.h_max.unwrap_or(f64::INFINITY)
    }

    pub(crate) fn initial_step(&self, span: f64) -> f64 {
        (span * 1e-2).max(self.h_min).min(self.max_step()).min(span)
    }
}

// Dormand–Prince tableau.
const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th-order weights (advancing solution).
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// y5 - y4 error weights.
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

/// Reusable stage buffers so a full trajectory allocates once.
pub(crate) struct Rk45Workspace {
    k: [Vec<f64>; 7],
    y_tmp: Vec<f64>,
    y_new: Vec<f64>,
}

impl Rk45Workspace {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            k: std::array::from_fn(|_| vec![0.0; n]),
            y_tmp: vec![0.0; n],
            y_new: vec![0.0; n],
        }
    }
}

/// Advance `y` from `t0` to `t1`, starting with step `*h` and leaving the last
/// accepted step size in `*h` so callers can carry it into the next interval.
///
/// Returns `false` when the step budget is exhausted or the state stops being
/// finite.
pub(crate) fn advance<F>(
    rhs: &F,
    y: &mut [f64],
    t0: f64,
    t1: f64,
    h: &mut f64,
    opts: &SolverOptions,
    ws: &mut Rk45Workspace,
    stats: &mut SolverStats,
) -> bool
where
    F: Fn(f64, &[f64], &mut [f64]),
{
    let n = y.len();
    let mut t = t0;
    if t1 <= t0 {
        return true;
    }

    let [k1, k2, k3, k4, k5, k6, k7] = &mut ws.k;
    let y_tmp = &mut ws.y_tmp;
    let y_new = &mut ws.y_new;

    rhs(t, y, k1);
    stats.rhs_evaluations += 1;

    for _ in 0..opts.max_steps {
        if t >= t1 {
            return true;
        }
        let remaining = t1 - t;
        let mut step = h.min(opts.max_step()).max(opts.h_min);
        // Land exactly on t1 instead of leaving a sliver for the next step.
        if step >= remaining || remaining - step < opts.h_min {
            step = remaining;
        }

        for i in 0..n {
            y_tmp[i] = y[i] + step * A21 * k1[i];
        }
        rhs(t + step / 5.0, y_tmp, k2);

        for i in 0..n {
            y_tmp[i] = y[i] + step * (A31 * k1[i] + A32 * k2[i]);
        }
        rhs(t + 3.0 * step / 10.0, y_tmp, k3);

        for i in 0..n {
            y_tmp[i] = y[i] + step * (A41 * k1[i] + A42 * k2[i] + A43 * k3[i]);
        }
        rhs(t + 4.0 * step / 5.0, y_tmp, k4);

        for i in 0..n {
            y_tmp[i] = y[i] + step * (A51 * k1[i] + A52 * k2[i] + A53 * k3[i] + A54 * k4[i]);
        }
        rhs(t + 8.0 * step / 9.0, y_tmp, k5);

        for i in 0..n {
            y_tmp[i] = y[i]
                + step * (A61 * k1[i] + A62 * k2[i] + A63 * k3[i] + A64 * k4[i] + A65 * k5[i]);
        }
        rhs(t + step, y_tmp, k6);

        for i in 0..n {
            y_new[i] = y[i]
                + step * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i]);
        }
        rhs(t + step, y_new, k7);
        stats.rhs_evaluations += 6;

        let mut err_norm = 0.0;
        for i in 0..n {
            let ei = step
                * (E1 * k1[i] + E3 * k3[i] + E4 * k4[i] + E5 * k5[i] + E6 * k6[i] + E7 * k7[i]);
            let sc = opts.atol + opts.rtol * y[i].abs().max(y_new[i].abs());
            err_norm += (ei / sc) * (ei / sc);
        }
        err_norm = (err_norm / n as f64).sqrt();

        if !err_norm.is_finite() {
            return false;
        }

        if err_norm <= 1.0 {
            t = if step == remaining { t1 } else { t + step };
            y.copy_from_slice(y_new);
            // FSAL
            k1.copy_from_slice(k7);
            stats.accepted_steps += 1;
        } else {
            stats.rejected_steps += 1;
            if step <= opts.h_min {
                return false;
            }
        }

        let factor = if err_norm == 0.0 {
            5.0
        } else {
            (0.9 * err_norm.powf(-0.2)).clamp(0.2, 5.0)
        };
        // A short landing step says nothing about the solution's smoothness.
        if step < remaining || err_norm > 1.0 {
            *h = (step * factor).max(opts.h_min).min(opts.max_step());
        } else {
            *h = h.max(step).min(opts.max_step());
        }
    }

    t >= t1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_decay_matches_closed_form() {
        let rhs = |_t: f64, y: &[f64], dy: &mut [f64]| dy[0] = -0.5 * y[0];
        let opts = SolverOptions::default().with_tolerances(1e-9, 1e-12);
        let mut ws = Rk45Workspace::new(1);
        let mut stats = SolverStats::default();
        let mut y = [2.0];
        let mut h = opts.initial_step(4.0);
        assert!(advance(&rhs, &mut y, 0.0, 4.0, &mut h, &opts, &mut ws, &mut stats));
        let exact = 2.0 * (-2.0f64).exp();
        assert!((y[0] - exact).abs() < 1e-8, "y={} exact={exact}", y[0]);
        assert!(stats.accepted_steps > 0);
    }

    #[test]
    fn blow_up_reports_failure() {
        let rhs = |_t: f64, y: &[f64], dy: &mut [f64]| dy[0] = y[0] * y[0];
        let opts = SolverOptions {
            max_steps: 10_000,
            ..SolverOptions::default()
        };
        let mut ws = Rk45Workspace::new(1);
        let mut stats = SolverStats::default();
        let mut y = [1.0];
        let mut h = opts.initial_step(2.0);
        // y' = y² from y=1 explodes at t=1.
        assert!(!advance(&rhs, &mut y, 0.0, 2.0, &mut h, &opts, &mut ws, &mut stats));
    }
}
