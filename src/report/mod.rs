//! Reporting utilities: residuals and formatted terminal output.

pub mod format;

pub use format::*;

use serde::Serialize;

use crate::domain::{Compartment, Dataset, ModelKind};
use crate::error::AppError;
use crate::models::observation_sources;
use crate::sim::Trajectory;

/// Fit quality for one observed series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesResidual {
    pub compartment: Compartment,
    pub rmse: f64,
    pub max_abs: f64,
    pub last_observed: f64,
    pub last_fitted: f64,
}

/// Compare every observed series with its simulated counterpart.
///
/// Series the model does not simulate are skipped.
pub fn compute_residuals(
    kind: ModelKind,
    dataset: &Dataset,
    fitted: &Trajectory,
) -> Result<Vec<SeriesResidual>, AppError> {
    if fitted.len() != dataset.len() {
        return Err(AppError::data_shape(format!(
            "Fitted trajectory has {} samples but the data has {}.",
            fitted.len(),
            dataset.len()
        )));
    }
    let mut out = Vec::new();
    for c in dataset.compartments() {
        let sources = observation_sources(kind, c);
        let Some(columns) = sources.iter().map(|s| fitted.get(*s)).collect::<Option<Vec<_>>>() else {
            continue;
        };
        let observed = dataset.require(c)?;
        let simulated: Vec<f64> = (0..observed.len())
            .map(|k| columns.iter().map(|col| col[k]).sum())
            .collect();
        if simulated.iter().any(|v| !v.is_finite()) {
            return Err(AppError::numeric(format!(
                "Non-finite fitted values for {}.",
                c.label()
            )));
        }

        let n = observed.len() as f64;
        let mut sse = 0.0;
        let mut max_abs: f64 = 0.0;
        for (o, s) in observed.iter().zip(&simulated) {
            let e = o - s;
            sse += e * e;
            max_abs = max_abs.max(e.abs());
        }
        out.push(SeriesResidual {
            compartment: c,
            rmse: (sse / n).sqrt(),
            max_abs,
            last_observed: observed[observed.len() - 1],
            last_fitted: simulated[simulated.len() - 1],
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn residuals_use_observation_mapping() {
        let mut series = BTreeMap::new();
        series.insert(Compartment::I, vec![2.0, 4.0]);
        series.insert(Compartment::R, vec![0.0, 1.0]);
        let data = Dataset::new(vec![0.0, 1.0], series).unwrap();
        let trajectory = Trajectory {
            layout: vec![Compartment::S, Compartment::I, Compartment::Q, Compartment::R],
            time: vec![0.0, 1.0],
            values: vec![vec![98.0, 95.0], vec![9.0, 9.0], vec![2.0, 6.0], vec![0.0, 1.0]],
        };
        let residuals = compute_residuals(ModelKind::Nsir, &data, &trajectory).unwrap();
        assert_eq!(residuals.len(), 2);
        assert_eq!(residuals[0].compartment, Compartment::I);
        assert!((residuals[0].rmse - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(residuals[0].max_abs, 2.0);
        assert_eq!(residuals[0].last_fitted, 6.0);
        assert_eq!(residuals[1].rmse, 0.0);
    }
}
