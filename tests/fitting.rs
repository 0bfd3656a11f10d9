//! Recovery checks for every model variant and for the less common fit modes.

use std::collections::BTreeMap;

use epi_curves::data::{SyntheticConfig, synthetic_dataset};
use epi_curves::domain::{Compartment, CostAggregation, Dataset, ModelKind};
use epi_curves::fit::{
    FitOptions, MultiFitConfig, OptimizerConfig, SensitivityConfig, fit_model, fit_multiple,
};
use epi_curves::models::EpidemicModel;

const N: f64 = 1e6;

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
                .with_seed(Some(5))
                .with_tolerance(1e-6, 1e-12)
                .with_max_iterations(max_iterations),
        )
}

fn assert_within(name: &str, got: f64, want: f64, rel: f64) {
    let err = (got - want).abs() / want;
    assert!(err < rel, "{name}: got {got}, want {want} (rel err {err:.3})");
}

fn simulated(model: &EpidemicModel, parameters: Vec<f64>, initial: Vec<f64>, days: usize) -> Dataset {
    synthetic_dataset(model, &SyntheticConfig::new(parameters, initial, days)).unwrap()
}

fn round_series(dataset: &Dataset) -> Dataset {
    let series: BTreeMap<Compartment, Vec<f64>> = dataset
        .compartments()
        .map(|c| {
            let values = dataset.require(c).unwrap().iter().map(|v| (v + 0.5).floor()).collect();
            (c, values)
        })
        .collect();
    Dataset::new(dataset.time().to_vec(), series).unwrap()
}

#[test]
fn seir_recovers_latency() {
    let model = EpidemicModel::new(ModelKind::Seir, N).unwrap();
    // E₀ = I₀ is what the fitter derives from the first sample.
    let dataset = simulated(&model, vec![0.6, 0.1, 0.25], vec![N - 20.0, 10.0, 10.0, 0.0], 90);
    assert!(!dataset.contains(Compartment::E));

    let fit = fit_model(&model, &dataset, &options(1500)).unwrap().into_result();
    let p = &fit.parameters;
    assert_within("beta", p.get("beta").unwrap(), 0.6, 0.1);
    assert_within("r", p.get("r").unwrap(), 0.1, 0.1);
    assert_within("sigma", p.get("sigma").unwrap(), 0.25, 0.1);
}

#[test]
fn sird_recovers_mortality() {
    let model = EpidemicModel::new(ModelKind::Sird, N).unwrap();
    let dataset = simulated(&model, vec![0.4, 0.08, 0.02], vec![N - 10.0, 10.0, 0.0, 0.0], 80);
    assert!(dataset.contains(Compartment::D));

    let fit = fit_model(&model, &dataset, &options(1500)).unwrap().into_result();
    let p = &fit.parameters;
    assert_within("beta", p.get("beta").unwrap(), 0.4, 0.1);
    assert_within("r", p.get("r").unwrap(), 0.08, 0.1);
    assert_within("mu", p.get("mu").unwrap(), 0.02, 0.1);
}

#[test]
fn nsir_recovers_the_notified_fraction() {
    let model = EpidemicModel::new(ModelKind::Nsir, N).unwrap();
    // Observed I is the notified compartment Q.
    let dataset = simulated(&model, vec![0.4, 0.1, 0.5], vec![N - 10.0, 10.0, 10.0, 0.0], 80);
    assert!(!dataset.contains(Compartment::Q));

    let fit = fit_model(&model, &dataset, &options(1500)).unwrap().into_result();
    let p = &fit.parameters;
    assert_within("beta", p.get("beta").unwrap(), 0.4, 0.1);
    assert_within("r", p.get("r").unwrap(), 0.1, 0.1);
    assert_within("nu", p.get("nu").unwrap(), 0.5, 0.1);
}

#[test]
fn population_fraction_is_recovered_under_reproduction_bounds() {
    // Only half the nominal population takes part in the outbreak.
    let half = EpidemicModel::new(ModelKind::Sir, N / 2.0).unwrap();
    let dataset = simulated(&half, vec![0.4, 0.1], vec![N / 2.0 - 10.0, 10.0, 0.0], 80);
    assert!(!dataset.contains(Compartment::S));

    // Effective R₀ is β·pop/r = 2, while β/r alone is 4 and outside the range.
    let model = EpidemicModel::new(ModelKind::Sir, N).unwrap();
    let opts = options(1500)
        .with_search_population(true)
        .with_reproduction_bounds(1.5, 2.5);
    let fit = fit_model(&model, &dataset, &opts).unwrap().into_result();

    let p = &fit.parameters;
    let (beta, r) = (p.get("beta").unwrap(), p.get("r").unwrap());
    let pop = fit.population_fraction();
    assert_eq!(p.get("pop"), Some(pop));
    assert_within("pop", pop, 0.5, 0.1);
    assert_within("beta", beta, 0.4, 0.1);
    assert_within("r", r, 0.1, 0.1);
    let effective = beta * pop / r;
    assert!((1.5..=2.5 + 1e-9).contains(&effective), "effective r0={effective}");
}

#[test]
fn pondering_ignores_stale_recovered_reports() {
    let model = EpidemicModel::new(ModelKind::Sir, N).unwrap();
    let clean = simulated(&model, vec![0.4, 0.1], vec![N - 10.0, 10.0, 0.0], 60);

    // Recoveries are only updated every other day; the repeats carry no information.
    let mut recovered = clean.require(Compartment::R).unwrap().to_vec();
    for k in (1..recovered.len()).step_by(2) {
        recovered[k] = recovered[k - 1];
    }
    let series = BTreeMap::from([
        (Compartment::I, clean.require(Compartment::I).unwrap().to_vec()),
        (Compartment::R, recovered),
    ]);
    let stale = Dataset::new(clean.time().to_vec(), series).unwrap();

    let fit = fit_model(&model, &stale, &options(1000).with_ponder(true))
        .unwrap()
        .into_result();
    let p = &fit.parameters;
    assert_within("beta", p.get("beta").unwrap(), 0.4, 0.05);
    assert_within("r", p.get("r").unwrap(), 0.1, 0.05);
}

#[test]
fn two_waves_are_fitted_separately() {
    let model = EpidemicModel::new(ModelKind::Sir, N).unwrap();
    let first = simulated(&model, vec![0.3, 0.2], vec![N - 10.0, 10.0, 0.0], 260);
    let immune = *first.require(Compartment::R).unwrap().last().unwrap();
    // A more transmissible strain meets the immunity left by the first wave.
    let second = simulated(&model, vec![0.8, 0.1], vec![N - immune - 10.0, 10.0, immune], 200);

    let time: Vec<f64> = (0..first.len() + second.len()).map(|k| k as f64).collect();
    let series: BTreeMap<Compartment, Vec<f64>> = [Compartment::I, Compartment::R]
        .into_iter()
        .map(|c| {
            let mut values = first.require(c).unwrap().to_vec();
            values.extend_from_slice(second.require(c).unwrap());
            (c, values)
        })
        .collect();
    let dataset = round_series(&Dataset::new(time, series).unwrap());

    let multi = fit_multiple(&model, &dataset, &MultiFitConfig::default(), &options(1000)).unwrap();
    assert!(multi.advisories.is_empty(), "{:?}", multi.advisories);
    assert_eq!(multi.windows.len(), 2);

    let (w1, w2) = (&multi.windows[0], &multi.windows[1]);
    assert!(w1.window.end <= 260 && w2.window.start >= 260, "{:?} {:?}", w1.window, w2.window);
    for (w, beta, r) in [(w1, 0.3, 0.2), (w2, 0.8, 0.1)] {
        let p = &w.fit.parameters;
        assert_within("beta", p.get("beta").unwrap(), beta, 0.1);
        assert_within("r", p.get("r").unwrap(), r, 0.1);
        assert_eq!(w.simulated.time.len(), w.prepared.len());
    }
}
