//! Command-line parsing for the `epi` binary.
//!
//! Argument parsing and command dispatch stay separate from the modelling
//! code: this module only describes the arguments, `app` turns them into
//! library configuration.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{Compartment, CostAggregation, ModelKind, ParamSpace, SimulationMode, WeightMode};
use crate::fit::{Algorithm, EstimateMethod, Strategy};
use crate::sweep::PeakMode;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "epi", version, about = "Compartmental epidemic model fitting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Simulate a model with known parameters (optionally as noisy observed series).
    Simulate(SimulateArgs),
    /// Fit a model to a case series CSV.
    Fit(FitCommandArgs),
    /// Forecast from a fit JSON produced by `epi fit --export-fit`.
    Forecast(ForecastArgs),
    /// Detect epidemic windows; optionally fit each one.
    Windows(WindowsArgs),
    /// Refit on growing prefixes or random sub-windows.
    Sweep(SweepArgs),
}

/// Model selection shared by every command.
#[derive(Debug, Args, Clone)]
pub struct ModelArgs {
    #[arg(short = 'm', long, value_enum, default_value_t = ModelKind::Sir)]
    pub model: ModelKind,

    /// Total population N.
    #[arg(short = 'N', long)]
    pub population: f64,

    #[arg(long, value_enum, default_value_t = SimulationMode::Discrete)]
    pub mode: SimulationMode,

    /// Parameter coordinates: rates (beta, r) or reproduction (R0, D).
    #[arg(long, value_enum, default_value_t = ParamSpace::Rates)]
    pub space: ParamSpace,

    /// Relative tolerance of the adaptive integrator.
    #[arg(long, default_value_t = 1e-6)]
    pub rtol: f64,

    /// Absolute tolerance of the adaptive integrator.
    #[arg(long, default_value_t = 1e-6)]
    pub atol_solver: f64,
}

/// Fitting knobs shared by `fit`, `windows` and `sweep`.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Compartments that enter the cost (default: every observable series present).
    #[arg(long, value_enum, value_delimiter = ',', ignore_case = true)]
    pub focus: Vec<Compartment>,

    #[arg(long, value_enum, default_value_t = CostAggregation::Sum)]
    pub aggregation: CostAggregation,

    #[arg(long, value_enum, default_value_t = WeightMode::InverseMean)]
    pub weight_mode: WeightMode,

    /// Skip R/D samples with no day-over-day change.
    #[arg(long)]
    pub ponder: bool,

    /// Also search a population fraction in [pop-min, pop-max].
    #[arg(long)]
    pub search_population: bool,

    /// Keep the reproduction number >= this value.
    #[arg(long)]
    pub r0_min: Option<f64>,

    /// Keep the reproduction number <= this value.
    #[arg(long)]
    pub r0_max: Option<f64>,

    /// Bound multipliers (low,high) around the first parameter's rough estimate.
    #[arg(long, value_delimiter = ',', default_values_t = [10.0, 10.0])]
    pub primary_sens: Vec<f64>,

    /// Bound multipliers (low,high) around the second parameter's rough estimate.
    #[arg(long, value_delimiter = ',', default_values_t = [10.0, 10.0])]
    pub removal_sens: Vec<f64>,

    /// Bound multipliers (low,high) around the variant-specific rate.
    #[arg(long, value_delimiter = ',', default_values_t = [10.0, 10.0])]
    pub extra_sens: Vec<f64>,

    #[arg(long, default_value_t = 1e-3)]
    pub pop_min: f64,

    #[arg(long, default_value_t = 1.0)]
    pub pop_max: f64,

    /// Rough estimate the bounds are built around.
    #[arg(long, value_enum, default_value_t = EstimateMethod::Constant)]
    pub estimate: EstimateMethod,

    #[arg(long, value_enum, default_value_t = Algorithm::DifferentialEvolution)]
    pub algorithm: Algorithm,

    /// Population size multiplier (members = popsize x parameters).
    #[arg(long, default_value_t = 15)]
    pub popsize: usize,

    #[arg(long, value_delimiter = ',', default_values_t = [0.5, 1.2])]
    pub mutation: Vec<f64>,

    #[arg(long, default_value_t = 0.7)]
    pub recombination: f64,

    #[arg(long, value_enum, default_value_t = Strategy::Best1Exp)]
    pub strategy: Strategy,

    #[arg(long, default_value_t = 1e-4)]
    pub tol: f64,

    #[arg(long, default_value_t = 0.0)]
    pub atol: f64,

    #[arg(long, default_value_t = 4000)]
    pub maxiter: usize,

    /// Starting temperature for simulated annealing.
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f64,

    /// Annealing stops after this many iterations without improvement.
    #[arg(long, default_value_t = 500)]
    pub stall: usize,

    /// Optimizer seed (falls back to EPI_SEED; unseeded when neither is set).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop each fit after this many seconds and keep the best so far.
    #[arg(long)]
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Model parameters in the chosen space, e.g. `0.4,0.1`.
    #[arg(long, value_delimiter = ',', required = true)]
    pub params: Vec<f64>,

    /// Initial state in the model's compartment order, e.g. `999990,10,0`.
    #[arg(long, value_delimiter = ',', required = true)]
    pub initial: Vec<f64>,

    #[arg(long, default_value_t = 100)]
    pub days: usize,

    /// Reference date for day 0 (YYYY-MM-DD).
    #[arg(long)]
    pub start_date: Option<chrono::NaiveDate>,

    /// Export the full trajectory to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export observed series (readable by `epi fit --csv`) to CSV.
    #[arg(long)]
    pub export_series: Option<PathBuf>,

    /// Observed compartments written by `--export-series`.
    #[arg(long, value_enum, value_delimiter = ',', ignore_case = true)]
    pub observed: Vec<Compartment>,

    /// Multiplicative log-normal noise on the observed series.
    #[arg(long)]
    pub noise: Option<f64>,

    #[arg(long, default_value_t = 42)]
    pub noise_seed: u64,
}

#[derive(Debug, Parser, Clone)]
pub struct FitCommandArgs {
    /// Case series CSV (`time` or `date` column plus compartment columns).
    #[arg(long, value_name = "CSV")]
    pub csv: PathBuf,

    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub fit: FitArgs,

    /// Write the fitted model (parameters, diagnostics, initial state) to JSON.
    #[arg(long)]
    pub export_fit: Option<PathBuf>,

    /// Write the fitted trajectory (data grid extended by --forecast-days) to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    pub forecast_days: usize,
}

#[derive(Debug, Parser, Clone)]
pub struct ForecastArgs {
    /// Fit JSON produced by `epi fit --export-fit`.
    #[arg(long, value_name = "JSON")]
    pub fit: PathBuf,

    #[arg(long, default_value_t = 200)]
    pub days: usize,

    /// Sample spacing of the forecast grid.
    #[arg(long, default_value_t = 1.0)]
    pub step: f64,

    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct WindowsArgs {
    #[arg(long, value_name = "CSV")]
    pub csv: PathBuf,

    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub fit: FitArgs,

    /// Threshold on the smoothed derivative, as a fraction of its std.
    #[arg(long, default_value_t = 1.0)]
    pub threshold: f64,

    /// Samples to move each start back by.
    #[arg(long, default_value_t = 10)]
    pub cases_before: usize,

    /// Hamming width used before differentiating.
    #[arg(long, default_value_t = 11)]
    pub smoothing: usize,

    /// Fit every detected window.
    #[arg(long)]
    pub fit_windows: bool,

    /// Prefix sweep inside every window (minimum days).
    #[arg(long)]
    pub monte_carlo: Option<usize>,

    /// Prefix step of the Monte Carlo sweep.
    #[arg(long, default_value_t = 10)]
    pub monte_carlo_step: usize,

    /// Hamming width applied to each window before fitting.
    #[arg(long)]
    pub window_smoothing: Option<usize>,

    /// Write window fits / sweeps to JSON.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct SweepArgs {
    #[arg(long, value_name = "CSV")]
    pub csv: PathBuf,

    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub fit: FitArgs,

    /// Index of the last sample of the first prefix.
    #[arg(long, default_value_t = 10)]
    pub start_day: usize,

    /// Forecast horizon past each prefix (days).
    #[arg(long, default_value_t = 200.0)]
    pub horizon: f64,

    #[arg(long, value_enum, default_value_t = PeakMode::Observed)]
    pub peak_mode: PeakMode,

    /// Smoothing width for observed peaks.
    #[arg(long, default_value_t = 13)]
    pub peak_smoothing: usize,

    /// Run a bootstrap over this many random sub-windows instead.
    #[arg(long)]
    pub bootstrap: Option<usize>,

    /// Minimum sub-window length of the bootstrap.
    #[arg(long, default_value_t = 30)]
    pub min_len: usize,

    #[arg(long)]
    pub export: Option<PathBuf>,
}
