//! CSV ingest of case time series.
//!
//! Turns a case-count export into a validated [`Dataset`]:
//!
//! - one time column: calendar `date`, or else numeric `time` (aliases `t`, `day`)
//! - any number of compartment columns, recognised by name (`I`, `infected`,
//!   `active`, `recovered`, `deaths`, ...); other columns are ignored
//! - bad rows are skipped and reported, never silently patched
//! - rows are ordered by time; duplicate times are rejected row by row
//!
//! With a `date` column, time is measured in days from the earliest date and
//! that date becomes the dataset's reference date.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use log::{debug, warn};

use crate::domain::{Compartment, Dataset};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct IngestedSeries {
    pub dataset: Dataset,
    pub columns: Vec<Compartment>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

#[derive(Debug, Clone, Copy)]
enum TimeColumn {
    Numeric(usize),
    Date(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stamp {
    Time(f64),
    Date(NaiveDate),
}

/// Load a case series CSV from disk.
pub fn load_series(path: &Path) -> Result<IngestedSeries, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_series(file)
}

/// Parse a case series CSV from any reader.
pub fn read_series<R: Read>(input: R) -> Result<IngestedSeries, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| AppError::config(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    let time_column = resolve_time_column(&header_map)?;
    let columns = resolve_compartment_columns(&headers)?;
    debug!(
        "ingest: time column {:?}, compartments {:?}",
        time_column,
        columns.iter().map(|(c, _)| *c).collect::<Vec<_>>()
    );

    let mut rows: Vec<(usize, Stamp, Vec<f64>)> = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header line; lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        match parse_row(&record, time_column, &columns) {
            Ok((stamp, values)) => rows.push((line, stamp, values)),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    rows.sort_by(|a, b| compare_stamps(a.1, b.1));
    let mut kept: Vec<(Stamp, Vec<f64>)> = Vec::with_capacity(rows.len());
    for (line, stamp, values) in rows {
        if kept.last().is_some_and(|(prev, _)| *prev == stamp) {
            row_errors.push(RowError {
                line,
                message: "Duplicate time stamp.".to_string(),
            });
            continue;
        }
        kept.push((stamp, values));
    }

    if kept.is_empty() {
        return Err(AppError::data_shape("No valid rows in CSV."));
    }
    for err in &row_errors {
        warn!("line {}: {}", err.line, err.message);
    }

    let reference_date = match kept[0].0 {
        Stamp::Date(d) => Some(d),
        Stamp::Time(_) => None,
    };
    let time: Vec<f64> = kept
        .iter()
        .map(|(stamp, _)| match (stamp, reference_date) {
            (Stamp::Time(t), _) => *t,
            (Stamp::Date(d), Some(base)) => (*d - base).num_days() as f64,
            (Stamp::Date(_), None) => f64::NAN,
        })
        .collect();

    let mut series: BTreeMap<Compartment, Vec<f64>> = BTreeMap::new();
    for (j, (c, _)) in columns.iter().enumerate() {
        series.insert(*c, kept.iter().map(|(_, values)| values[j]).collect());
    }

    let rows_used = kept.len();
    let dataset = Dataset::new(time, series)?;
    let dataset = match reference_date {
        Some(date) => dataset.with_reference_date(date),
        None => dataset,
    };

    Ok(IngestedSeries {
        dataset,
        columns: columns.iter().map(|(c, _)| *c).collect(),
        row_errors,
        rows_read,
        rows_used,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn resolve_time_column(header_map: &HashMap<String, usize>) -> Result<TimeColumn, AppError> {
    if let Some(idx) = header_map.get("date") {
        return Ok(TimeColumn::Date(*idx));
    }
    for name in ["time", "t", "day"] {
        if let Some(idx) = header_map.get(name) {
            return Ok(TimeColumn::Numeric(*idx));
        }
    }
    Err(AppError::config(
        "Missing time column: expected one of `time`, `t`, `day` or `date`.",
    ))
}

fn resolve_compartment_columns(headers: &StringRecord) -> Result<Vec<(Compartment, usize)>, AppError> {
    let mut columns: Vec<(Compartment, usize)> = Vec::new();
    for (idx, name) in headers.iter().enumerate() {
        let Some(c) = Compartment::parse(&normalize_header_name(name)) else {
            continue;
        };
        if columns.iter().any(|(seen, _)| *seen == c) {
            return Err(AppError::config(format!(
                "Compartment {} appears in more than one column.",
                c.label()
            )));
        }
        columns.push((c, idx));
    }
    if columns.is_empty() {
        return Err(AppError::data_shape(
            "CSV has no compartment columns (expected e.g. `I`, `R`, `D`).",
        ));
    }
    Ok(columns)
}

fn parse_row(
    record: &StringRecord,
    time_column: TimeColumn,
    columns: &[(Compartment, usize)],
) -> Result<(Stamp, Vec<f64>), String> {
    let stamp = match time_column {
        TimeColumn::Numeric(idx) => {
            let raw = get_required(record, idx, "time")?;
            let t = raw
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .ok_or_else(|| format!("Invalid time '{raw}'."))?;
            Stamp::Time(t)
        }
        TimeColumn::Date(idx) => Stamp::Date(parse_date(get_required(record, idx, "date")?)?),
    };

    let mut values = Vec::with_capacity(columns.len());
    for (c, idx) in columns {
        let raw = get_required(record, *idx, c.label())?;
        let v = raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| format!("Invalid {} value '{raw}' (must be finite and >= 0).", c.label()))?;
        values.push(v);
    }
    Ok((stamp, values))
}

fn compare_stamps(a: Stamp, b: Stamp) -> std::cmp::Ordering {
    match (a, b) {
        (Stamp::Time(x), Stamp::Time(y)) => x.total_cmp(&y),
        (Stamp::Date(x), Stamp::Date(y)) => x.cmp(&y),
        _ => std::cmp::Ordering::Equal,
    }
}

fn get_required<'a>(record: &'a StringRecord, idx: usize, name: &str) -> Result<&'a str, String> {
    record
        .get(idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    const FMTS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    Err(format!(
        "Invalid date '{s}'. Expected one of: YYYY-MM-DD, DD/MM/YYYY, DD-MM-YYYY, YYYY/MM/DD."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_time_with_aliases() {
        let csv = "day,Infected,recovered,region\n0,10,0,north\n1,14,1,north\n2,19,3,north\n";
        let out = read_series(csv.as_bytes()).unwrap();
        assert_eq!(out.columns, vec![Compartment::I, Compartment::R]);
        assert_eq!(out.dataset.time(), &[0.0, 1.0, 2.0]);
        assert_eq!(out.dataset.get(Compartment::I).unwrap(), &[10.0, 14.0, 19.0]);
        assert!(out.dataset.reference_date().is_none());
        assert_eq!(out.rows_used, 3);
    }

    #[test]
    fn dates_become_day_offsets() {
        let csv = "\u{feff}Date,I\n2020-03-03,7\n2020-03-01,5\n2020-03-02,6\n";
        let out = read_series(csv.as_bytes()).unwrap();
        assert_eq!(out.dataset.time(), &[0.0, 1.0, 2.0]);
        assert_eq!(out.dataset.get(Compartment::I).unwrap(), &[5.0, 6.0, 7.0]);
        assert_eq!(out.dataset.reference_date(), NaiveDate::from_ymd_opt(2020, 3, 1));
    }

    #[test]
    fn bad_rows_are_reported_and_skipped() {
        let csv = "time,I\n0,1\n1,-3\n2,\n3,x\n3,4\n3,5\n";
        let out = read_series(csv.as_bytes()).unwrap();
        assert_eq!(out.rows_read, 6);
        assert_eq!(out.rows_used, 2);
        let lines: Vec<usize> = out.row_errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4, 5, 7]);
    }

    #[test]
    fn missing_time_column_is_a_config_error() {
        let err = read_series("I,R\n1,2\n".as_bytes()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn no_compartments_is_a_shape_error() {
        let err = read_series("time,cases_total\n0,1\n".as_bytes()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
