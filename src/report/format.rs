//! Formatted terminal output.
//!
//! Formatting lives in one place so:
//! - the fitting code stays free of presentation concerns
//! - output changes are localized

use chrono::NaiveDate;

use crate::domain::{Advisory, Compartment, Dataset, EpidemicWindow, FitResult, ModelKind, ParameterVector};
use crate::fit::MultiFit;
use crate::models::{decode, reproduction_number};
use crate::report::SeriesResidual;
use crate::signal::find_peak;
use crate::sim::Trajectory;
use crate::sweep::{BootstrapSweep, PeakEstimate, TimeShiftSweep, WindowSweep};

/// Fit summary: data range, parameters, diagnostics and advisories.
pub fn format_fit_summary(fit: &FitResult, dataset: &Dataset, residuals: &[SeriesResidual]) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== epi - {} fit ===\n", fit.model.display_name()));
    out.push_str(&format!(
        "Data: n={} | t=[{}, {}]{}\n",
        dataset.len(),
        dataset.time()[0],
        dataset.time()[dataset.len() - 1],
        date_suffix(dataset.reference_date())
    ));
    if fit.search_population {
        let fraction = fit.population_fraction();
        out.push_str(&format!(
            "Population: {:.0} (fraction {fraction:.4}, effective {:.0})\n",
            fit.population,
            fraction * fit.population
        ));
    } else {
        out.push_str(&format!("Population: {:.0}\n", fit.population));
    }

    out.push_str("\nParameters:\n");
    out.push_str(&format_parameters(&fit.parameters));
    let x = fit.parameters.as_slice();
    if x.len() == fit.model.param_len(fit.search_population) {
        let decoded = decode(fit.model, fit.space, x, fit.search_population);
        out.push_str(&format!(
            "  {:<6} {:>14.6}\n",
            "R0*",
            reproduction_number(fit.model, &decoded.rates)
        ));
    }

    out.push_str("\nDiagnostics:\n");
    let d = &fit.diagnostics;
    out.push_str(&format!(
        "- cost={:.6e} | iterations={} | evaluations={} | failed={} | converged={}\n",
        d.final_cost, d.iterations, d.evaluations, d.failed_evaluations, d.converged
    ));

    if !residuals.is_empty() {
        out.push_str("\nResiduals:\n");
        out.push_str(
            format!(
                "{:<4} {:>14} {:>14} {:>14} {:>14}\n",
                "", "rmse", "max|e|", "last obs", "last fit"
            )
            .trim_end(),
        );
        out.push('\n');
        for r in residuals {
            out.push_str(&format!(
                "{:<4} {:>14.3} {:>14.3} {:>14.3} {:>14.3}\n",
                r.compartment.label(),
                r.rmse,
                r.max_abs,
                r.last_observed,
                r.last_fitted
            ));
        }
    }

    out.push_str(&format_advisories(&fit.advisories));
    out
}

/// Peak of the infected curve (notified `Q` for NSIR) and the final state.
pub fn format_trajectory_summary(kind: ModelKind, trajectory: &Trajectory, reference_date: Option<NaiveDate>) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== epi - {} trajectory ({} points) ===\n",
        kind.display_name(),
        trajectory.len()
    ));
    let tracked = match kind {
        ModelKind::Nsir => Compartment::Q,
        _ => Compartment::I,
    };
    if let Some(series) = trajectory.get(tracked) {
        if let Some(k) = find_peak(series) {
            let t = trajectory.time[k];
            let date = reference_date.and_then(|d| d.checked_add_signed(chrono::Duration::days(t.round() as i64)));
            out.push_str(&format!(
                "Peak {}: {:.1} at t={}{}\n",
                tracked.label(),
                series[k],
                t,
                date.map(|d| format!(" on {d}")).unwrap_or_default()
            ));
        }
    }
    match trajectory.final_state() {
        Some(state) => {
            out.push_str("Final state:\n");
            for (c, v) in state.layout.iter().zip(&state.values) {
                out.push_str(&format!("  {:<2} {v:>16.1}\n", c.label()));
            }
            out.push_str(&format!("  {:<2} {:>16.1}\n", "N", state.total()));
        }
        None if !trajectory.is_empty() => out.push_str("Final state: not finite (integration failed)\n"),
        None => {}
    }
    out
}

/// Detected windows with their time range.
pub fn format_windows(windows: &[EpidemicWindow], dataset: &Dataset) -> String {
    let mut out = String::new();
    out.push_str(&format!("Epidemic windows: {}\n", windows.len()));
    for (idx, w) in windows.iter().enumerate() {
        let t0 = dataset.time().get(w.start).copied().unwrap_or(f64::NAN);
        let t1 = dataset
            .time()
            .get(w.end.saturating_sub(1))
            .copied()
            .unwrap_or(f64::NAN);
        out.push_str(&format!(
            "  #{:<3} samples {:>5}..{:<5} t=[{}, {}]{}\n",
            idx + 1,
            w.start,
            w.end,
            t0,
            t1,
            date_suffix(dataset.date_at(t0))
        ));
    }
    out
}

pub fn format_multi_fit(multi: &MultiFit) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== epi - {} window fits ===\n", multi.windows.len()));
    for (idx, w) in multi.windows.iter().enumerate() {
        out.push_str(&format!(
            "\nWindow #{} (samples {}..{}, {} fitted points)\n",
            idx + 1,
            w.window.start,
            w.window.end,
            w.prepared.len()
        ));
        out.push_str(&format_parameters(&w.fit.parameters));
        out.push_str(&format!(
            "  cost={:.6e} converged={}\n",
            w.fit.diagnostics.final_cost, w.fit.diagnostics.converged
        ));
    }
    out.push_str(&format_advisories(&multi.advisories));
    out
}

/// One line per prefix: end time, parameters, cost and peak.
pub fn format_sweep(sweep: &TimeShiftSweep) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== epi - {} time-shift sweep ({:?} peaks) ===\n",
        sweep.model.display_name(),
        sweep.peak_mode
    ));
    let Some(first) = sweep.entries.first() else {
        out.push_str("(no entries)\n");
        return out;
    };
    out.push_str(&format!("{:>8} {:<11}", "t", "date"));
    for name in &first.parameters.names {
        out.push_str(&format!(" {name:>12}"));
    }
    out.push_str(&format!(" {:>12} {:>4} {:>10}\n", "cost", "conv", "peak t"));
    for e in &sweep.entries {
        out.push_str(&format!("{:>8} {:<11}", e.time, fmt_date(e.date)));
        for v in &e.parameters.values {
            out.push_str(&format!(" {v:>12.6}"));
        }
        out.push_str(&format!(
            " {:>12.4e} {:>4} {:>10}\n",
            e.cost,
            if e.converged { "yes" } else { "no" },
            fmt_peak(e.peak.as_ref())
        ));
    }
    out
}

pub fn format_monte_carlo(sweeps: &[WindowSweep]) -> String {
    let mut out = String::new();
    for (idx, sweep) in sweeps.iter().enumerate() {
        out.push_str(&format!(
            "Window #{} (samples {}..{}): {} prefix fits\n",
            idx + 1,
            sweep.window.start,
            sweep.window.end,
            sweep.fits.len()
        ));
        for f in &sweep.fits {
            out.push_str(&format!("  n={:<5} {}", f.samples, fmt_named(&f.parameters)));
            out.push_str(&format!(" cost={:.4e}\n", f.cost));
        }
    }
    out
}

pub fn format_bootstrap(boot: &BootstrapSweep) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== epi - bootstrap ({} draws) ===\n", boot.draws.len()));
    out.push_str(&format!(
        "{:<6} {:>12} {:>12} {:>12} {:>12} {:>12}\n",
        "param", "mean", "std", "p05", "p50", "p95"
    ));
    for s in &boot.summary {
        out.push_str(&format!(
            "{:<6} {:>12.6} {:>12.6} {:>12.6} {:>12.6} {:>12.6}\n",
            s.name, s.mean, s.std, s.p05, s.p50, s.p95
        ));
    }
    out
}

pub fn format_advisories(advisories: &[Advisory]) -> String {
    if advisories.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nAdvisories:\n");
    for a in advisories {
        let line = match a {
            Advisory::NonConvergence { iterations, best_cost } => {
                format!("no convergence after {iterations} iterations (best cost {best_cost:.6e})")
            }
            Advisory::DegenerateInput { compartment } => {
                format!("initial {} is zero; the fit may be meaningless", compartment.label())
            }
            Advisory::Cancelled { iterations } => format!("stopped early after {iterations} iterations"),
            Advisory::FewWindows { found } => format!("only {found} epidemic window(s) detected"),
        };
        out.push_str(&format!("- {line}\n"));
    }
    out
}

fn format_parameters(params: &ParameterVector) -> String {
    let mut out = String::new();
    for (name, v) in params.names.iter().zip(&params.values) {
        out.push_str(&format!("  {name:<6} {v:>14.6}\n"));
    }
    out
}

fn fmt_named(params: &ParameterVector) -> String {
    let parts: Vec<String> = params
        .names
        .iter()
        .zip(&params.values)
        .map(|(n, v)| format!("{n}={v:.6}"))
        .collect();
    parts.join(" ")
}

fn fmt_peak(peak: Option<&PeakEstimate>) -> String {
    match peak {
        Some(p) => format!("{}", p.time),
        None => "-".to_string(),
    }
}

fn fmt_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

fn date_suffix(date: Option<NaiveDate>) -> String {
    date.map(|d| format!(" from {d}")).unwrap_or_default()
}
