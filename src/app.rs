//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and initialises logging
//! - parses CLI arguments
//! - loads case series or simulates synthetic ones
//! - runs fits, window detection and sweeps
//! - prints reports and writes optional exports

use clap::Parser;
use serde::Serialize;

use crate::cli::{Command, FitCommandArgs, ForecastArgs, SimulateArgs, SweepArgs, WindowsArgs};
use crate::data::{SyntheticConfig, synthetic_dataset};
use crate::domain::{Advisory, Compartment, EpidemicWindow};
use crate::error::AppError;
use crate::fit::{MultiFit, MultiFitConfig, fit_multiple};
use crate::io::{FitFile, read_fit_json, write_dataset_csv, write_fit_json, write_json, write_trajectory_csv};
use crate::signal::{WindowConfig, find_epidemic_windows};
use crate::sweep::{
    BootstrapConfig, MonteCarloConfig, SweepConfig, WindowSweep, bootstrap_sweep, monte_carlo_windows,
    time_shift_sweep,
};

pub mod pipeline;

/// Entry point for the `epi` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Simulate(args) => handle_simulate(args),
        Command::Fit(args) => handle_fit(args),
        Command::Forecast(args) => handle_forecast(args),
        Command::Windows(args) => handle_windows(args),
        Command::Sweep(args) => handle_sweep(args),
    }
}

/// `EPI_LOG` takes precedence over `RUST_LOG`; the default level is `info`.
fn init_logging() {
    let env = if std::env::var_os("EPI_LOG").is_some() {
        env_logger::Env::new().filter("EPI_LOG")
    } else {
        env_logger::Env::default().default_filter_or("info")
    };
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let model = pipeline::build_model(&args.model)?;
    if model.kind.layout_for_len(args.initial.len()).is_none() {
        return Err(AppError::config(format!(
            "--initial must follow the {} layout ({}).",
            model.kind.display_name(),
            pipeline::describe_layout(model.kind)
        )));
    }

    let grid: Vec<f64> = (0..args.days.max(1)).map(|k| k as f64).collect();
    let trajectory = model.simulate(&args.initial, &grid, &args.params, false)?.trajectory;
    println!(
        "{}",
        crate::report::format_trajectory_summary(model.kind, &trajectory, args.start_date)
    );

    if let Some(path) = &args.export {
        write_trajectory_csv(path, &trajectory, args.start_date)?;
    }
    if let Some(path) = &args.export_series {
        let mut synth = SyntheticConfig::new(args.params.clone(), args.initial.clone(), args.days.max(1));
        if !args.observed.is_empty() {
            synth = synth.with_observed(args.observed.clone());
        }
        if let Some(sigma) = args.noise {
            synth = synth.with_noise(sigma, args.noise_seed);
        }
        if let Some(date) = args.start_date {
            synth = synth.with_reference_date(date);
        }
        let dataset = synthetic_dataset(&model, &synth)?;
        write_dataset_csv(path, &dataset)?;
    }
    Ok(())
}

fn handle_fit(args: FitCommandArgs) -> Result<(), AppError> {
    let model = pipeline::build_model(&args.model)?;
    let opts = pipeline::fit_options(&args.fit)?;
    let dataset = pipeline::load_dataset(&args.csv)?;

    let run = pipeline::run_fit(&model, &dataset, &opts)?;
    println!(
        "{}",
        crate::report::format_fit_summary(run.fitted.result(), &dataset, &run.residuals)
    );

    if let Some(path) = &args.export {
        let grid = pipeline::extended_grid(dataset.time(), args.forecast_days);
        let trajectory = run.fitted.predict(&run.initial, &grid)?;
        write_trajectory_csv(path, &trajectory, dataset.reference_date())?;
    }
    if let Some(path) = &args.export_fit {
        let file = FitFile::new(
            run.fitted.clone(),
            dataset.time()[0],
            run.initial.clone(),
            dataset.reference_date(),
        );
        write_fit_json(path, &file)?;
    }
    Ok(())
}

fn handle_forecast(args: ForecastArgs) -> Result<(), AppError> {
    if !(args.step.is_finite() && args.step > 0.0) {
        return Err(AppError::config(format!("--step must be > 0 (got {}).", args.step)));
    }
    let file = read_fit_json(&args.fit)?;
    let steps = (args.days as f64 / args.step).floor() as usize;
    let grid: Vec<f64> = (0..=steps).map(|k| file.t0 + k as f64 * args.step).collect();
    let trajectory = file.fitted.predict(&file.initial, &grid)?;

    let kind = file.fitted.model().kind;
    println!(
        "{}",
        crate::report::format_trajectory_summary(kind, &trajectory, file.reference_date)
    );
    if let Some(path) = &args.export {
        write_trajectory_csv(path, &trajectory, file.reference_date)?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct WindowsExport {
    windows: Vec<EpidemicWindow>,
    advisories: Vec<Advisory>,
    fits: Option<MultiFit>,
    monte_carlo: Option<Vec<WindowSweep>>,
}

fn handle_windows(args: WindowsArgs) -> Result<(), AppError> {
    let model = pipeline::build_model(&args.model)?;
    let opts = pipeline::fit_options(&args.fit)?;
    let dataset = pipeline::load_dataset(&args.csv)?;

    let window_config = WindowConfig::default()
        .with_threshold_prop(args.threshold)
        .with_cases_before(args.cases_before)
        .with_smoothing(args.smoothing);
    let (windows, advisories) = find_epidemic_windows(dataset.require(Compartment::I)?, &window_config)?;
    println!("{}", crate::report::format_windows(&windows, &dataset));

    let fits = if args.fit_windows {
        let config = MultiFitConfig::default()
            .with_windows(window_config.clone())
            .with_smoothing(args.window_smoothing);
        let multi = fit_multiple(&model, &dataset, &config, &opts)?;
        println!("{}", crate::report::format_multi_fit(&multi));
        Some(multi)
    } else {
        None
    };

    let monte_carlo = match args.monte_carlo {
        Some(minimum_days) => {
            let config = MonteCarloConfig::default()
                .with_minimum_days(minimum_days)
                .with_step(args.monte_carlo_step)
                .with_smoothing(args.window_smoothing);
            let sweeps = monte_carlo_windows(&model, &dataset, &windows, &opts, &config)?;
            println!("{}", crate::report::format_monte_carlo(&sweeps));
            Some(sweeps)
        }
        None => None,
    };

    if let Some(path) = &args.export {
        write_json(
            path,
            &WindowsExport {
                windows,
                advisories,
                fits,
                monte_carlo,
            },
        )?;
    }
    Ok(())
}

fn handle_sweep(args: SweepArgs) -> Result<(), AppError> {
    let model = pipeline::build_model(&args.model)?;
    let opts = pipeline::fit_options(&args.fit)?;
    let dataset = pipeline::load_dataset(&args.csv)?;

    if let Some(draws) = args.bootstrap {
        let config = BootstrapConfig::default()
            .with_draws(draws)
            .with_min_len(args.min_len)
            .with_seed(opts.optimizer.seed);
        let boot = bootstrap_sweep(&model, &dataset, &opts, &config)?;
        println!("{}", crate::report::format_bootstrap(&boot));
        if let Some(path) = &args.export {
            write_json(path, &boot)?;
        }
        return Ok(());
    }

    let config = SweepConfig::default()
        .with_start_day(args.start_day)
        .with_horizon(args.horizon)
        .with_peak_mode(args.peak_mode)
        .with_peak_smoothing(args.peak_smoothing);
    let sweep = time_shift_sweep(&model, &dataset, &opts, &config)?;
    println!("{}", crate::report::format_sweep(&sweep));
    if let Some(path) = &args.export {
        write_json(path, &sweep)?;
    }
    Ok(())
}
