//! Series helpers: Hamming smoothing, differences, summary statistics and
//! linear resampling.
//!
//! Smoothing pads both ends by point reflection around the first/last sample
//! (`2·x₀ - x[k]`) so a rising edge keeps rising into the padding instead of
//! folding back, then convolves with a normalised Hamming window of odd width.

use std::f64::consts::PI;

use crate::error::AppError;

/// Symmetric Hamming window of `width` points.
pub fn hamming(width: usize) -> Vec<f64> {
    match width {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let m = (width - 1) as f64;
            (0..width)
                .map(|k| 0.54 - 0.46 * (2.0 * PI * k as f64 / m).cos())
                .collect()
        }
    }
}

/// Effective smoothing width for a series of `len` samples.
///
/// Even widths are bumped to the next odd width; widths longer than the series
/// shrink to the largest odd width that fits. Below 3 no smoothing happens.
pub fn effective_width(width: usize, len: usize) -> usize {
    let mut w = if width % 2 == 0 { width + 1 } else { width };
    if w > len {
        w = if len % 2 == 0 { len.saturating_sub(1) } else { len };
    }
    if w < 3 { 1 } else { w }
}

/// Hamming-weighted moving average with reflected padding. Output has the same
/// length as the input.
pub fn smooth(x: &[f64], width: usize) -> Vec<f64> {
    let n = x.len();
    let w = effective_width(width, n);
    if w < 3 {
        return x.to_vec();
    }

    let kernel = hamming(w);
    let norm: f64 = kernel.iter().sum();
    let half = (w / 2) as isize;
    let first = x[0];
    let last = x[n - 1];
    let n_i = n as isize;

    // m < 0 and m >= n hit the reflected padding.
    let at = |m: isize| -> f64 {
        if m < 0 {
            2.0 * first - x[(-m) as usize]
        } else if m >= n_i {
            2.0 * last - x[(2 * (n_i - 1) - m) as usize]
        } else {
            x[m as usize]
        }
    };

    (0..n_i)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(j, &k)| k * at(i - half + j as isize))
                .sum::<f64>()
                / norm
        })
        .collect()
}

/// First difference `x[k+1] - x[k]` (one shorter than the input).
pub fn diff(x: &[f64]) -> Vec<f64> {
    x.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Unit-spacing gradient: central differences inside, one-sided at the ends.
pub fn gradient(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|k| {
                if k == 0 {
                    x[1] - x[0]
                } else if k == n - 1 {
                    x[n - 1] - x[n - 2]
                } else {
                    (x[k + 1] - x[k - 1]) / 2.0
                }
            })
            .collect(),
    }
}

pub fn mean(x: &[f64]) -> Option<f64> {
    if x.is_empty() {
        None
    } else {
        Some(x.iter().sum::<f64>() / x.len() as f64)
    }
}

/// Population standard deviation (divides by `n`).
pub fn std_dev(x: &[f64]) -> Option<f64> {
    let m = mean(x)?;
    let var = x.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / x.len() as f64;
    Some(var.sqrt())
}

/// Percentile with linear interpolation between closest ranks, `q` in `[0, 100]`.
pub fn percentile(x: &[f64], q: f64) -> Option<f64> {
    if x.is_empty() || !(0.0..=100.0).contains(&q) {
        return None;
    }
    let mut sorted = x.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Linearly resample `(time, values)` onto `t0, t0 + step, …, ≤ t_last`.
pub fn resample_linear(time: &[f64], values: &[f64], step: f64) -> Result<(Vec<f64>, Vec<f64>), AppError> {
    if time.len() != values.len() {
        return Err(AppError::data_shape(format!(
            "Cannot resample {} values on {} time points.",
            values.len(),
            time.len()
        )));
    }
    if time.is_empty() {
        return Err(AppError::data_shape("Cannot resample an empty series."));
    }
    if !(step.is_finite() && step > 0.0) {
        return Err(AppError::config(format!("Resampling step must be > 0 (got {step}).")));
    }

    let t0 = time[0];
    let t_last = time[time.len() - 1];
    let count = ((t_last - t0) / step + 1e-9).floor() as usize + 1;

    let mut out_t = Vec::with_capacity(count);
    let mut out_v = Vec::with_capacity(count);
    let mut seg = 0usize;
    for k in 0..count {
        let t = t0 + k as f64 * step;
        while seg + 2 < time.len() && time[seg + 1] < t {
            seg += 1;
        }
        let v = if time.len() == 1 {
            values[0]
        } else {
            let (ta, tb) = (time[seg], time[seg + 1]);
            let u = ((t - ta) / (tb - ta)).clamp(0.0, 1.0);
            values[seg] + u * (values[seg + 1] - values[seg])
        };
        out_t.push(t);
        out_v.push(v);
    }
    Ok((out_t, out_v))
}
