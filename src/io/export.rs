//! Export trajectories to CSV.
//!
//! One row per time point, one column per compartment, plus a `date` column
//! when the series has a reference date. Easy to load in spreadsheets or
//! plotting scripts.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{Duration, NaiveDate};

use crate::domain::Dataset;
use crate::error::AppError;
use crate::sim::Trajectory;

/// Write a trajectory to a CSV file.
pub fn write_trajectory_csv(
    path: &Path,
    trajectory: &Trajectory,
    reference_date: Option<NaiveDate>,
) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::config(format!("Failed to create export CSV '{}': {e}", path.display())))?;
    write_trajectory(file, trajectory, reference_date)
}

/// Write observed series in the layout `load_series` reads back.
pub fn write_dataset_csv(path: &Path, dataset: &Dataset) -> Result<(), AppError> {
    let mut layout = Vec::new();
    let mut values = Vec::new();
    for c in dataset.compartments() {
        values.push(dataset.require(c)?.to_vec());
        layout.push(c);
    }
    let as_table = Trajectory {
        layout,
        time: dataset.time().to_vec(),
        values,
    };
    write_trajectory_csv(path, &as_table, dataset.reference_date())
}

/// Write a trajectory as CSV to any writer.
pub fn write_trajectory<W: Write>(
    mut out: W,
    trajectory: &Trajectory,
    reference_date: Option<NaiveDate>,
) -> Result<(), AppError> {
    let mut header = vec!["time".to_string()];
    if reference_date.is_some() {
        header.push("date".to_string());
    }
    header.extend(trajectory.layout.iter().map(|c| c.label().to_string()));
    writeln!(out, "{}", header.join(","))
        .map_err(|e| AppError::config(format!("Failed to write export CSV header: {e}")))?;

    for (k, t) in trajectory.time.iter().enumerate() {
        let mut row = vec![format!("{t}")];
        if let Some(base) = reference_date {
            let date = base
                .checked_add_signed(Duration::days(t.round() as i64))
                .map(|d| d.to_string())
                .unwrap_or_default();
            row.push(date);
        }
        row.extend(trajectory.values.iter().map(|series| format!("{:.6}", series[k])));
        writeln!(out, "{}", row.join(","))
            .map_err(|e| AppError::config(format!("Failed to write export CSV row: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Compartment;

    #[test]
    fn writes_dates_and_compartments() {
        let trajectory = Trajectory {
            layout: vec![Compartment::S, Compartment::I],
            time: vec![0.0, 1.0],
            values: vec![vec![99.0, 98.5], vec![1.0, 1.5]],
        };
        let mut buf = Vec::new();
        write_trajectory(&mut buf, &trajectory, NaiveDate::from_ymd_opt(2021, 12, 31)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,date,S,I");
        assert_eq!(lines[1], "0,2021-12-31,99.000000,1.000000");
        assert_eq!(lines[2], "1,2022-01-01,98.500000,1.500000");
    }
}
