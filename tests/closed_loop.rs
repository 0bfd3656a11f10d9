//! End-to-end checks: simulate a known outbreak, then recover it.

use epi_curves::data::{SyntheticConfig, synthetic_dataset};
use epi_curves::domain::{Compartment, CostAggregation, Dataset, ModelKind, SimulationMode};
use epi_curves::fit::{
    CostContext, CostEvaluator, CostSpec, FitOptions, OptimizerConfig, SensitivityConfig, Weights,
    fit_model,
};
use epi_curves::io::{FitFile, read_fit_json, write_fit_json};
use epi_curves::models::{EpidemicModel, FittedModel};
use epi_curves::signal::{WindowConfig, find_epidemic_windows, find_peak, find_smoothed_peak};

const N: f64 = 1e6;
const BETA: f64 = 0.4;
const REMOVAL: f64 = 0.1;

fn outbreak(model: &EpidemicModel, days: usize) -> Dataset {
    let config = SyntheticConfig::new(vec![BETA, REMOVAL], vec![N - 10.0, 10.0, 0.0], days);
    synthetic_dataset(model, &config).unwrap()
}

fn options(max_iterations: usize) -> FitOptions {
    FitOptions::default()
        .with_aggregation(CostAggregation::Rms)
        .with_sensitivity(
            SensitivityConfig::default()
                .with_primary(10.0, 100.0)
                .with_removal(10.0, 100.0),
        )
        .with_optimizer(
            OptimizerConfig::default()
                .with_seed(Some(11))
                .with_tolerance(1e-4, 1e-10)
                .with_max_iterations(max_iterations),
        )
}

fn assert_close(name: &str, got: f64, want: f64) {
    let rel = (got - want).abs() / want;
    assert!(rel < 0.05, "{name}: got {got}, want {want} (rel err {rel:.3})");
}

/// The fitted vector must reproduce a finite epidemic, not a blow-up.
fn assert_finite_forecast(fitted: &FittedModel, model: &EpidemicModel, dataset: &Dataset) {
    let initial = model.initial_state(dataset).unwrap();
    let forecast = fitted.predict(&initial, dataset.time()).unwrap();
    assert!(
        forecast.values.iter().flatten().all(|v| v.is_finite()),
        "params={:?}",
        fitted.result().parameters.values
    );
    let failed = fitted.result().diagnostics.failed_evaluations;
    let total = fitted.result().diagnostics.evaluations;
    assert!(failed < total, "{failed} of {total} evaluations failed");
}

#[test]
fn discrete_sir_recovers_its_rates() {
    let model = EpidemicModel::new(ModelKind::Sir, N).unwrap();
    let dataset = outbreak(&model, 60);
    assert!(dataset.contains(Compartment::I) && dataset.contains(Compartment::R));

    let fitted = fit_model(&model, &dataset, &options(1000)).unwrap();
    let fit = fitted.result();
    assert_close("beta", fit.parameters.values[0], BETA);
    assert_close("r", fit.parameters.values[1], REMOVAL);
    assert!(fit.diagnostics.final_cost < 1.0, "cost={}", fit.diagnostics.final_cost);
    assert_finite_forecast(&fitted, &model, &dataset);
}

#[test]
fn continuous_sir_recovers_its_rates() {
    let model = EpidemicModel::new(ModelKind::Sir, N)
        .unwrap()
        .with_mode(SimulationMode::Continuous);
    let dataset = outbreak(&model, 60);

    let fitted = fit_model(&model, &dataset, &options(400)).unwrap();
    let fit = fitted.result();
    assert_close("beta", fit.parameters.values[0], BETA);
    assert_close("r", fit.parameters.values[1], REMOVAL);
    assert_finite_forecast(&fitted, &model, &dataset);
}

#[test]
fn saved_fit_predicts_the_same_trajectory() {
    let model = EpidemicModel::new(ModelKind::Sir, N).unwrap();
    let dataset = outbreak(&model, 40);
    let fitted = fit_model(&model, &dataset, &options(200)).unwrap();
    let initial = model.initial_state(&dataset).unwrap();

    let path = std::env::temp_dir().join(format!("epi-closed-loop-{}.json", std::process::id()));
    write_fit_json(&path, &FitFile::new(fitted.clone(), 0.0, initial.clone(), None)).unwrap();
    let loaded = read_fit_json(&path).unwrap();
    let _ = std::fs::remove_file(&path);

    let grid: Vec<f64> = (0..80).map(|k| k as f64).collect();
    let before = fitted.predict(&initial, &grid).unwrap();
    let after = loaded.fitted.predict(&loaded.initial, &grid).unwrap();
    assert_eq!(before.values, after.values);
}

#[test]
fn empty_focus_costs_nothing() {
    let model = EpidemicModel::new(ModelKind::Sir, N).unwrap();
    let dataset = outbreak(&model, 20);
    let evaluator = CostEvaluator::new(
        &model,
        &dataset,
        model.initial_state(&dataset).unwrap(),
        &CostSpec {
            focus: &[],
            weights: &Weights::default(),
            aggregation: CostAggregation::Sum,
            ponder: false,
            search_population: false,
        },
    )
    .unwrap();
    let mut ctx = CostContext::new();
    assert_eq!(evaluator.cost(&[5.0, 0.01], &mut ctx), 0.0);
    assert_eq!(ctx.previous(), 0.0);
}

#[test]
fn reported_outbreak_forms_one_window_around_its_peak() {
    // Whole-person reports: the tail rounds down to zero and closes the wave.
    let model = EpidemicModel::new(ModelKind::Sir, N).unwrap();
    let dataset = outbreak(&model, 300);
    let cases: Vec<f64> = dataset
        .require(Compartment::I)
        .unwrap()
        .iter()
        .map(|v| v.round())
        .collect();
    // Rounded reports are step-shaped; the peak is read off the smoothed series.
    let peak = find_smoothed_peak(&cases, 13).unwrap();
    let argmax = cases
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(k, _)| k)
        .unwrap();
    assert!(peak.abs_diff(argmax) <= 2, "peak={peak} argmax={argmax}");

    let (windows, _) = find_epidemic_windows(&cases, &WindowConfig::default()).unwrap();
    assert_eq!(windows.len(), 1, "{windows:?}");
    let rise = cases.iter().position(|&v| v > 0.01 * cases[peak]).unwrap();
    assert!(windows[0].start < rise, "start={} rise={rise}", windows[0].start);
    assert!(windows[0].end > peak + 30, "end={} peak={peak}", windows[0].end);
}

#[test]
fn zero_tail_does_not_move_the_peak() {
    let model = EpidemicModel::new(ModelKind::Sir, N).unwrap();
    let dataset = outbreak(&model, 120);
    let mut infected = dataset.require(Compartment::I).unwrap().to_vec();
    let clean = find_peak(&infected).unwrap();
    infected.extend(std::iter::repeat(0.0).take(60));
    assert_eq!(find_peak(&infected), Some(clean));
}

#[test]
fn smoothed_peak_matches_simulated_maximum() {
    let model = EpidemicModel::new(ModelKind::Sir, N).unwrap();
    let dataset = outbreak(&model, 160);
    let infected = dataset.require(Compartment::I).unwrap();
    let argmax = infected
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(k, _)| k)
        .unwrap();

    let peak = find_smoothed_peak(infected, 13).unwrap();
    assert!(peak.abs_diff(argmax) <= 2, "peak={peak} argmax={argmax}");
}
