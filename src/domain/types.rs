//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON
//! - handed to external consumers (storage, dashboards) as plain values

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A named compartment of an epidemic model.
///
/// `Q` is the notified (reported) active compartment of the NSIR variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
pub enum Compartment {
    S,
    E,
    I,
    Q,
    R,
    D,
}

impl Compartment {
    pub fn label(self) -> &'static str {
        match self {
            Compartment::S => "S",
            Compartment::E => "E",
            Compartment::I => "I",
            Compartment::Q => "Q",
            Compartment::R => "R",
            Compartment::D => "D",
        }
    }

    /// Parse a column/header name. Accepts the single-letter labels and the
    /// usual long names found in case-count exports.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "s" | "susceptible" => Some(Compartment::S),
            "e" | "exposed" => Some(Compartment::E),
            "i" | "infected" | "active" => Some(Compartment::I),
            "q" | "notified" => Some(Compartment::Q),
            "r" | "recovered" | "removed" => Some(Compartment::R),
            "d" | "deaths" | "dead" => Some(Compartment::D),
            _ => None,
        }
    }
}

/// Which compartmental model to simulate and fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Susceptible / Infected / (Removed). Runs with 2 or 3 compartments.
    Sir,
    /// Adds an exposed compartment with latency rate σ.
    Seir,
    /// Adds a deaths compartment with mortality rate μ.
    Sird,
    /// Notified-case extension: a reported compartment `Q` fed by a fraction ν
    /// of new infections. Observed active cases are compared against `Q`.
    Nsir,
}

const SIR_2: [Compartment; 2] = [Compartment::S, Compartment::I];
const SIR_3: [Compartment; 3] = [Compartment::S, Compartment::I, Compartment::R];
const SEIR: [Compartment; 4] = [Compartment::S, Compartment::E, Compartment::I, Compartment::R];
const SIRD: [Compartment; 4] = [Compartment::S, Compartment::I, Compartment::R, Compartment::D];
const NSIR: [Compartment; 4] = [Compartment::S, Compartment::I, Compartment::Q, Compartment::R];

impl ModelKind {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Sir => "SIR",
            ModelKind::Seir => "SEIR",
            ModelKind::Sird => "SIRD",
            ModelKind::Nsir => "NSIR (notified)",
        }
    }

    /// Full state layout (the SIR variant also has a 2-compartment form).
    pub fn layout(self) -> &'static [Compartment] {
        match self {
            ModelKind::Sir => &SIR_3,
            ModelKind::Seir => &SEIR,
            ModelKind::Sird => &SIRD,
            ModelKind::Nsir => &NSIR,
        }
    }

    /// Resolve the state layout for a state vector of length `n`.
    pub fn layout_for_len(self, n: usize) -> Option<&'static [Compartment]> {
        match (self, n) {
            (ModelKind::Sir, 2) => Some(&SIR_2),
            (ModelKind::Sir, 3) => Some(&SIR_3),
            (ModelKind::Seir | ModelKind::Sird | ModelKind::Nsir, 4) => Some(self.layout()),
            _ => None,
        }
    }

    /// Name of the variant-specific third rate, if any.
    pub fn extra_param(self) -> Option<&'static str> {
        match self {
            ModelKind::Sir => None,
            ModelKind::Seir => Some("sigma"),
            ModelKind::Sird => Some("mu"),
            ModelKind::Nsir => Some("nu"),
        }
    }

    /// Compartments that can be matched against observed data.
    pub fn observable(self) -> &'static [Compartment] {
        match self {
            ModelKind::Sird => &SIRD,
            _ => &SIR_3,
        }
    }

    /// Number of optimizer parameters for this variant.
    pub fn param_len(self, search_population: bool) -> usize {
        2 + usize::from(self.extra_param().is_some()) + usize::from(search_population)
    }

    /// Ordered parameter names for the given parameter space.
    pub fn param_names(self, space: ParamSpace, search_population: bool) -> Vec<String> {
        let mut names: Vec<String> = match space {
            ParamSpace::Rates => vec!["beta".into(), "r".into()],
            ParamSpace::Reproduction => vec!["r0".into(), "d".into()],
        };
        if let Some(extra) = self.extra_param() {
            names.push(extra.into());
        }
        if search_population {
            names.push("pop".into());
        }
        names
    }
}

/// How the Simulator advances the state over the time grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    /// Adaptive-step integration, restarted on every grid interval.
    Continuous,
    /// Adaptive-step integration over an explicit span, sampled at given points.
    Ivp,
    /// Fixed-step forward Euler recursion on the grid itself.
    Discrete,
}

/// How per-compartment errors are merged into one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CostAggregation {
    /// `Σ_c Σ_t w_c e²`
    Sum,
    /// `Σ_c sqrt(mean_t(w_c e²))`
    Rms,
    /// `Σ_c log10(1 + Σ_t w_c e²)`
    Log10,
}

/// How per-compartment weights are derived when not given explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WeightMode {
    /// `w_c = 1 / mean(observed_c)` so every compartment contributes comparably.
    InverseMean,
    /// `w_c = 1`.
    Uniform,
}

/// Coordinates the optimizer searches in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ParamSpace {
    /// `(β, r[, extra][, pop])`
    Rates,
    /// `(R₀, D[, extra][, pop])` with `β = R₀/D`, `r = 1/D`.
    Reproduction,
}

/// Ordered, named state values (one per compartment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompartmentSet {
    pub layout: Vec<Compartment>,
    pub values: Vec<f64>,
}

impl CompartmentSet {
    pub fn new(layout: &[Compartment], values: Vec<f64>) -> Result<Self, AppError> {
        if layout.len() != values.len() {
            return Err(AppError::data_shape(format!(
                "State has {} values for {} compartments.",
                values.len(),
                layout.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AppError::data_shape("State values must be finite."));
        }
        Ok(Self {
            layout: layout.to_vec(),
            values,
        })
    }

    pub fn get(&self, c: Compartment) -> Option<f64> {
        self.layout.iter().position(|&x| x == c).map(|i| self.values[i])
    }

    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }
}

/// Observed, time-aligned series per compartment.
///
/// Invariants (checked by [`Dataset::new`]): at least one sample, every series
/// has the same length as `time`, `time` is finite and strictly increasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    time: Vec<f64>,
    series: BTreeMap<Compartment, Vec<f64>>,
    reference_date: Option<NaiveDate>,
}

impl Dataset {
    pub fn new(time: Vec<f64>, series: BTreeMap<Compartment, Vec<f64>>) -> Result<Self, AppError> {
        if time.is_empty() {
            return Err(AppError::data_shape("Dataset has no samples."));
        }
        if time.iter().any(|t| !t.is_finite()) {
            return Err(AppError::data_shape("Time index must be finite."));
        }
        if let Some(k) = time.windows(2).position(|w| w[1] <= w[0]) {
            return Err(AppError::data_shape(format!(
                "Time index must be strictly increasing (t[{}]={} >= t[{}]={}).",
                k,
                time[k],
                k + 1,
                time[k + 1]
            )));
        }
        if series.is_empty() {
            return Err(AppError::data_shape("Dataset has no compartment series."));
        }
        for (c, values) in &series {
            if values.len() != time.len() {
                return Err(AppError::data_shape(format!(
                    "Series {} has {} samples but the time index has {}.",
                    c.label(),
                    values.len(),
                    time.len()
                )));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(AppError::data_shape(format!(
                    "Series {} contains non-finite values.",
                    c.label()
                )));
            }
        }
        Ok(Self {
            time,
            series,
            reference_date: None,
        })
    }

    /// Attach the calendar date that `t = 0` refers to (time in days).
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn reference_date(&self) -> Option<NaiveDate> {
        self.reference_date
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn get(&self, c: Compartment) -> Option<&[f64]> {
        self.series.get(&c).map(|v| v.as_slice())
    }

    pub fn contains(&self, c: Compartment) -> bool {
        self.series.contains_key(&c)
    }

    pub fn require(&self, c: Compartment) -> Result<&[f64], AppError> {
        self.get(c).ok_or_else(|| {
            AppError::data_shape(format!("Dataset is missing required series {}.", c.label()))
        })
    }

    pub fn compartments(&self) -> impl Iterator<Item = Compartment> + '_ {
        self.series.keys().copied()
    }

    /// Sub-range `[start, end)` keeping the same reference date.
    pub fn slice(&self, start: usize, end: usize) -> Result<Self, AppError> {
        if start >= end || end > self.len() {
            return Err(AppError::data_shape(format!(
                "Invalid dataset slice {start}..{end} (len={}).",
                self.len()
            )));
        }
        let series = self
            .series
            .iter()
            .map(|(c, v)| (*c, v[start..end].to_vec()))
            .collect();
        Ok(Self {
            time: self.time[start..end].to_vec(),
            series,
            reference_date: self.reference_date,
        })
    }

    /// The first `len` samples.
    pub fn prefix(&self, len: usize) -> Result<Self, AppError> {
        self.slice(0, len)
    }

    /// Calendar date for a time value, when a reference date is known.
    pub fn date_at(&self, t: f64) -> Option<NaiveDate> {
        let base = self.reference_date?;
        if !t.is_finite() {
            return None;
        }
        base.checked_add_signed(Duration::days(t.round() as i64))
    }
}

/// Named optimizer coordinates (immutable once a fit is stored).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    pub names: Vec<String>,
    pub values: Vec<f64>,
}

impl ParameterVector {
    pub fn new(names: Vec<String>, values: Vec<f64>) -> Self {
        Self { names, values }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Inclusive search interval for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    pub fn new(lower: f64, upper: f64) -> Result<Self, AppError> {
        if !(lower.is_finite() && upper.is_finite() && lower <= upper) {
            return Err(AppError::config(format!(
                "Invalid bound [{lower}, {upper}] (must be finite and lower <= upper)."
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.lower && x <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// One epidemic wave as a half-open index range `[start, end)` into a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpidemicWindow {
    pub start: usize,
    pub end: usize,
}

impl EpidemicWindow {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Non-fatal findings attached to results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// Iteration budget exhausted (or no evaluation beat the sentinel cost).
    NonConvergence { iterations: usize, best_cost: f64 },
    /// Zero initial susceptible or infected: "not exciting enough".
    DegenerateInput { compartment: Compartment },
    /// Search stopped by the caller's cancellation flag or deadline.
    Cancelled { iterations: usize },
    /// Fewer than two epidemic windows were detected.
    FewWindows { found: usize },
}

/// Optimizer diagnostics for one fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub iterations: usize,
    pub evaluations: usize,
    /// Evaluations that hit a numeric failure and reused the previous cost.
    pub failed_evaluations: usize,
    pub final_cost: f64,
    pub converged: bool,
    pub population_size: usize,
}

/// Best-fit parameters plus diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub model: ModelKind,
    pub space: ParamSpace,
    pub parameters: ParameterVector,
    pub bounds: Vec<Bound>,
    pub population: f64,
    pub search_population: bool,
    pub diagnostics: FitDiagnostics,
    pub advisories: Vec<Advisory>,
}

impl FitResult {
    pub fn converged(&self) -> bool {
        self.diagnostics.converged
    }

    /// Fitted population fraction (1.0 when it was not searched).
    pub fn population_fraction(&self) -> f64 {
        if self.search_population {
            self.parameters.values.last().copied().unwrap_or(1.0)
        } else {
            1.0
        }
    }
}
