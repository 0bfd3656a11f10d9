//! Right-hand sides for SIR / SEIR / SIRD / NSIR.
//!
//! The simulator and the cost evaluator rely on two primitive operations:
//! - turn an optimizer coordinate vector into epidemiological rates
//! - evaluate the instantaneous derivative of a state vector under those rates
//!
//! Every variant divides the force of infection by the *effective* population
//! `N_eff = N · pop_fraction`, in every simulation mode.

use serde::{Deserialize, Serialize};

use crate::domain::{Compartment, ModelKind, ParamSpace};

/// Rates consumed by the dynamics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    /// Transmission rate β.
    pub beta: f64,
    /// Removal rate r = 1/D.
    pub r: f64,
    /// σ (SEIR latency), μ (SIRD mortality) or ν (NSIR notified fraction); 0 for SIR.
    pub extra: f64,
}

/// Decoded optimizer coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoded {
    pub rates: Rates,
    /// Multiplier on the total population (1.0 when not searched).
    pub pop_fraction: f64,
}

/// Decode an optimizer vector laid out as `[a, b, (extra), (pop)]`.
///
/// `x` must hold `model.param_len(search_population)` values; the checked
/// entry point is [`crate::models::EpidemicModel::decode`].
pub(crate) fn decode(model: ModelKind, space: ParamSpace, x: &[f64], search_population: bool) -> Decoded {
    let (beta, r) = match space {
        ParamSpace::Rates => (x[0], x[1]),
        ParamSpace::Reproduction => (x[0] / x[1], 1.0 / x[1]),
    };
    let extra = if model.extra_param().is_some() { x[2] } else { 0.0 };
    let pop_fraction = if search_population {
        x[model.param_len(true) - 1]
    } else {
        1.0
    };
    Decoded {
        rates: Rates { beta, r, extra },
        pop_fraction,
    }
}

/// Basic reproduction number implied by a set of rates.
///
/// Deaths remove infectious mass as well, so SIRD uses `β / (r + μ)`.
pub fn reproduction_number(model: ModelKind, rates: &Rates) -> f64 {
    match model {
        ModelKind::Sird => rates.beta / (rates.r + rates.extra),
        _ => rates.beta / rates.r,
    }
}

/// Fill `out` with the derivative of `state`.
///
/// The SIR variant dispatches on the state length (2 → `[S, I]`, 3 → `[S, I, R]`).
/// A non-positive `population` yields NaN derivatives; the cost evaluator
/// treats those as a failed evaluation. `state` and `out` share the model
/// layout, which the simulator checks before integrating.
pub(crate) fn derivative(model: ModelKind, state: &[f64], rates: &Rates, population: f64, out: &mut [f64]) {
    let Rates { beta, r, extra } = *rates;
    let per_capita = if population > 0.0 {
        beta / population
    } else {
        f64::NAN
    };

    match model {
        ModelKind::Sir => {
            let (s, i) = (state[0], state[1]);
            let force = per_capita * s * i;
            out[0] = -force;
            out[1] = force - r * i;
            if state.len() == 3 {
                out[2] = r * i;
            }
        }
        ModelKind::Seir => {
            let (s, e, i) = (state[0], state[1], state[2]);
            let force = per_capita * s * i;
            out[0] = -force;
            out[1] = force - extra * e;
            out[2] = extra * e - r * i;
            out[3] = r * i;
        }
        ModelKind::Sird => {
            let (s, i) = (state[0], state[1]);
            let force = per_capita * s * i;
            out[0] = -force;
            out[1] = force - r * i - extra * i;
            out[2] = r * i;
            out[3] = extra * i;
        }
        ModelKind::Nsir => {
            let (s, i, q) = (state[0], state[1], state[2]);
            let force = per_capita * s * i;
            out[0] = -force;
            out[1] = force - r * i;
            out[2] = extra * force - r * q;
            out[3] = r * i;
        }
    }
}

/// Which simulated compartments are summed to match an observed series.
///
/// SEIR compares observed susceptibles against `S + E` (exposed people are not
/// yet counted as cases); NSIR compares observed active cases against `Q`.
pub fn observation_sources(model: ModelKind, observed: Compartment) -> &'static [Compartment] {
    match (model, observed) {
        (ModelKind::Seir, Compartment::S) => &[Compartment::S, Compartment::E],
        (ModelKind::Nsir, Compartment::I) => &[Compartment::Q],
        (_, Compartment::S) => &[Compartment::S],
        (_, Compartment::E) => &[Compartment::E],
        (_, Compartment::I) => &[Compartment::I],
        (_, Compartment::Q) => &[Compartment::Q],
        (_, Compartment::R) => &[Compartment::R],
        (_, Compartment::D) => &[Compartment::D],
    }
}
