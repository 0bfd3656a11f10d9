//! Epidemic window detection.
//!
//! A long case series with several waves is cut into one window per wave by
//! thresholding the first difference of the smoothed series:
//!
//! - a wave opens when the difference exceeds `threshold_prop · std(diff)`; its
//!   start is backdated to the flattest point of the preceding `cases_before`
//!   samples and then moved past leading zero-case samples
//! - a wave closes at the first sample where a negative difference is followed
//!   by a non-negative one
//!
//! A start without a matching end (series cut mid-wave) is dropped.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::domain::{Advisory, EpidemicWindow};
use crate::error::AppError;
use crate::signal::smoothing::{diff, smooth, std_dev};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Multiple of `std(diff)` that opens a window (default: 1.0).
    pub threshold_prop: f64,
    /// Lookback used to backdate a window start (default: 10).
    pub cases_before: usize,
    /// Hamming smoothing width (default: 11).
    pub smoothing: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            threshold_prop: 1.0,
            cases_before: 10,
            smoothing: 11,
        }
    }
}

impl WindowConfig {
    pub fn with_threshold_prop(mut self, threshold_prop: f64) -> Self {
        self.threshold_prop = threshold_prop;
        self
    }

    pub fn with_cases_before(mut self, cases_before: usize) -> Self {
        self.cases_before = cases_before;
        self
    }

    pub fn with_smoothing(mut self, smoothing: usize) -> Self {
        self.smoothing = smoothing;
        self
    }

    fn validate(&self) -> Result<(), AppError> {
        if !(self.threshold_prop.is_finite() && self.threshold_prop >= 0.0) {
            return Err(AppError::config(format!(
                "Window threshold proportion must be finite and >= 0 (got {}).",
                self.threshold_prop
            )));
        }
        Ok(())
    }
}

/// Raw start/end indices as produced by the scan (`ends.len() <= starts.len()`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowBreaks {
    pub starts: Vec<usize>,
    pub ends: Vec<usize>,
}

impl WindowBreaks {
    /// Pair starts with ends, dropping trailing unmatched starts.
    ///
    /// A window covers `[start, end]` inclusive of the closing sample, stored as
    /// the half-open `[start, end + 1)`.
    pub fn pair(&self, len: usize) -> Vec<EpidemicWindow> {
        self.starts
            .iter()
            .zip(&self.ends)
            .filter_map(|(&start, &end)| {
                let end = (end + 1).min(len);
                (start < end).then_some(EpidemicWindow { start, end })
            })
            .collect()
    }
}

/// Scan `cases` and return the raw break points.
pub fn find_breaks(cases: &[f64], config: &WindowConfig) -> Result<WindowBreaks, AppError> {
    config.validate()?;
    if cases.iter().any(|v| !v.is_finite()) {
        return Err(AppError::data_shape("Case series contains non-finite values."));
    }
    if cases.len() < 3 {
        return Ok(WindowBreaks::default());
    }

    let smoothed = smooth(cases, config.smoothing);
    let variation = diff(&smoothed);
    let threshold = config.threshold_prop * std_dev(&variation).unwrap_or(0.0);
    debug!(
        "window scan: {} samples, threshold {threshold:.4}",
        cases.len()
    );

    let mut breaks = WindowBreaks::default();
    let mut in_epidemic = false;
    for (k, &value) in variation.iter().enumerate() {
        if !in_epidemic {
            if value > threshold {
                in_epidemic = true;
                breaks.starts.push(backdate_start(cases, &variation, k, config.cases_before));
            }
        } else if variation[k - 1] < 0.0 && value >= 0.0 {
            in_epidemic = false;
            breaks.ends.push(k);
        }
    }
    Ok(breaks)
}

/// Detect epidemic windows plus any advisory about how many were found.
pub fn find_epidemic_windows(
    cases: &[f64],
    config: &WindowConfig,
) -> Result<(Vec<EpidemicWindow>, Vec<Advisory>), AppError> {
    let breaks = find_breaks(cases, config)?;
    if breaks.starts.len() > breaks.ends.len() {
        debug!(
            "dropping {} unmatched window start(s)",
            breaks.starts.len() - breaks.ends.len()
        );
    }
    let windows = breaks.pair(cases.len());
    info!("found {} epidemic window(s)", windows.len());

    let mut advisories = Vec::new();
    if windows.len() < 2 {
        warn!("fewer than two epidemic windows detected ({})", windows.len());
        advisories.push(Advisory::FewWindows {
            found: windows.len(),
        });
    }
    Ok((windows, advisories))
}

fn backdate_start(cases: &[f64], variation: &[f64], k: usize, cases_before: usize) -> usize {
    let lo = k.saturating_sub(cases_before);
    // First occurrence of the smallest |diff| in the lookback.
    let mut start = variation[lo..k]
        .iter()
        .enumerate()
        .fold(None::<(usize, f64)>, |best, (i, v)| match best {
            Some((_, b)) if b <= v.abs() => best,
            _ => Some((i, v.abs())),
        })
        .map(|(i, _)| lo + i)
        .unwrap_or(k);

    while start + 1 < cases.len() && cases[start] == 0.0 {
        start += 1;
    }
    start
}
