//! Rough parameter estimates and search bounds.
//!
//! Each searched parameter gets the box `[x₀ / low, high · x₀]` around a rough
//! estimate `x₀`. The estimate is either a set of epidemiological constants or
//! a linear regression on the discretised SIR relations:
//!
//! ```text
//! ΔS = -β · S·I/N · Δt
//! ΔI =  β · S·I/N · Δt - r · I · Δt
//! ΔR =                   r · I · Δt
//! ```
//!
//! stacked into one tall system in `(β, r)` and solved by SVD.

use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::{Bound, Compartment, Dataset, ModelKind, ParamSpace};
use crate::error::AppError;
use crate::math::solve_least_squares;

const BETA_0: f64 = 0.25;
const R_0: f64 = 1.0 / 21.0;
const SIGMA_0: f64 = 1.0 / 5.2;
const MU_0: f64 = 0.005;
const NU_0: f64 = 0.3;

/// Per-parameter `(low, high)` multipliers around the rough estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityConfig {
    /// β (rates space) or R₀ (reproduction space).
    pub primary: (f64, f64),
    /// r (rates space) or D (reproduction space).
    pub removal: (f64, f64),
    /// σ, μ or ν depending on the variant.
    pub extra: (f64, f64),
    /// Absolute `[lower, upper]` bounds of the population fraction.
    pub population: (f64, f64),
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            primary: (10.0, 10.0),
            removal: (10.0, 10.0),
            extra: (10.0, 10.0),
            population: (1e-3, 1.0),
        }
    }
}

impl SensitivityConfig {
    pub fn with_primary(mut self, low: f64, high: f64) -> Self {
        self.primary = (low, high);
        self
    }

    pub fn with_removal(mut self, low: f64, high: f64) -> Self {
        self.removal = (low, high);
        self
    }

    pub fn with_extra(mut self, low: f64, high: f64) -> Self {
        self.extra = (low, high);
        self
    }

    pub fn with_population(mut self, lower: f64, upper: f64) -> Self {
        self.population = (lower, upper);
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for (name, (low, high)) in [
            ("primary", self.primary),
            ("removal", self.removal),
            ("extra", self.extra),
        ] {
            if !(low.is_finite() && high.is_finite() && low > 0.0 && high > 0.0) {
                return Err(AppError::config(format!(
                    "Sensitivity for {name} must be finite and > 0 (got {low}, {high})."
                )));
            }
        }
        let (lo, hi) = self.population;
        if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo <= hi) {
            return Err(AppError::config(format!(
                "Population fraction bounds must satisfy 0 < lower <= upper (got {lo}, {hi})."
            )));
        }
        Ok(())
    }
}

/// How the reference point for the bounds is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EstimateMethod {
    /// Fixed epidemiological constants.
    #[default]
    Constant,
    /// Least-squares regression on the data, falling back to the constants.
    Regression,
}

/// Reference point in the model's parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoughEstimate {
    pub primary: f64,
    pub removal: f64,
    pub extra: Option<f64>,
}

impl RoughEstimate {
    fn from_rates(model: ModelKind, space: ParamSpace, beta: f64, r: f64) -> Self {
        let (primary, removal) = match space {
            ParamSpace::Rates => (beta, r),
            ParamSpace::Reproduction => (beta / r, 1.0 / r),
        };
        let extra = match model {
            ModelKind::Sir => None,
            ModelKind::Seir => Some(SIGMA_0),
            ModelKind::Sird => Some(MU_0),
            ModelKind::Nsir => Some(NU_0),
        };
        Self {
            primary,
            removal,
            extra,
        }
    }
}

/// Constant estimate: β₀ = 0.25 and r₀ = 1/21 in rates space, R₀ = 2.5 and
/// D = 21 days in reproduction space.
pub fn constant_estimate(model: ModelKind, space: ParamSpace) -> RoughEstimate {
    match space {
        ParamSpace::Rates => RoughEstimate::from_rates(model, space, BETA_0, R_0),
        ParamSpace::Reproduction => RoughEstimate {
            primary: 2.5,
            removal: 21.0,
            ..RoughEstimate::from_rates(model, space, BETA_0, R_0)
        },
    }
}

/// Regression estimate of `(β, r)`; `None` when the data cannot support it.
pub fn regression_estimate(
    model: ModelKind,
    space: ParamSpace,
    dataset: &Dataset,
    population: f64,
) -> Option<RoughEstimate> {
    let n = dataset.len();
    if n < 3 || !(population.is_finite() && population > 0.0) {
        return None;
    }
    let i = dataset.get(Compartment::I)?;
    let r = dataset.get(Compartment::R)?;
    let d = dataset.get(Compartment::D);
    let s: Vec<f64> = match dataset.get(Compartment::S) {
        Some(s) => s.to_vec(),
        None => (0..n)
            .map(|k| population - i[k] - r[k] - d.map_or(0.0, |d| d[k]))
            .collect(),
    };
    let t = dataset.time();

    let steps = n - 1;
    let mut x = DMatrix::<f64>::zeros(3 * steps, 2);
    let mut y = DVector::<f64>::zeros(3 * steps);
    for k in 0..steps {
        let dt = t[k + 1] - t[k];
        let contact = s[k] * i[k] / population * dt;
        x[(k, 0)] = -contact;
        y[k] = s[k + 1] - s[k];

        x[(steps + k, 0)] = contact;
        x[(steps + k, 1)] = -i[k] * dt;
        y[steps + k] = i[k + 1] - i[k];

        x[(2 * steps + k, 1)] = i[k] * dt;
        y[2 * steps + k] = r[k + 1] - r[k];
    }

    let theta = solve_least_squares(&x, &y)?;
    let (beta, removal) = (theta[0], theta[1]);
    if !(beta.is_finite() && removal.is_finite() && beta > 0.0 && removal > 0.0) {
        return None;
    }
    debug!("regression estimate: beta={beta:.6} r={removal:.6}");
    Some(RoughEstimate::from_rates(model, space, beta, removal))
}

/// Box bounds `[x₀/low, high·x₀]` in optimizer order, population last.
pub fn build_bounds(
    model: ModelKind,
    estimate: &RoughEstimate,
    sensitivity: &SensitivityConfig,
    search_population: bool,
) -> Result<Vec<Bound>, AppError> {
    sensitivity.validate()?;
    let around = |x0: f64, (low, high): (f64, f64)| {
        if !(x0.is_finite() && x0 > 0.0) {
            return Err(AppError::config(format!(
                "Rough estimate must be finite and > 0 (got {x0})."
            )));
        }
        Bound::new(x0 / low, high * x0)
    };

    let mut bounds = vec![
        around(estimate.primary, sensitivity.primary)?,
        around(estimate.removal, sensitivity.removal)?,
    ];
    if model.extra_param().is_some() {
        let x0 = estimate.extra.unwrap_or(match model {
            ModelKind::Seir => SIGMA_0,
            ModelKind::Sird => MU_0,
            _ => NU_0,
        });
        let mut b = around(x0, sensitivity.extra)?;
        // ν is a fraction of new infections.
        if model == ModelKind::Nsir {
            b = Bound::new(b.lower.min(1.0), b.upper.min(1.0))?;
        }
        bounds.push(b);
    }
    if search_population {
        let (lo, hi) = sensitivity.population;
        bounds.push(Bound::new(lo, hi)?);
    }
    Ok(bounds)
}
