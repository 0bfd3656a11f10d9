//! Peak detection on infected-type series.

use crate::signal::smoothing::{gradient, smooth};

/// Index of the peak of `series`.
///
/// Drops the trailing flat stretch (zero gradient, e.g. a tail of zero
/// reports), then scans the gradient from the end and returns the first index
/// (read in reverse) where it is non-negative: the last point at which the
/// series was still rising. A series that never rises peaks at 0. `None` for
/// an empty series.
pub fn find_peak(series: &[f64]) -> Option<usize> {
    if series.is_empty() {
        return None;
    }
    let g = gradient(series);
    let active = g.iter().rposition(|&d| d != 0.0).map_or(0, |k| k + 1);
    Some(g[..active].iter().rposition(|&d| d >= 0.0).unwrap_or(0))
}

/// [`find_peak`] on a Hamming-smoothed copy of `series`.
pub fn find_smoothed_peak(series: &[f64], width: usize) -> Option<usize> {
    find_peak(&smooth(series, width))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian(n: usize, center: f64, scale: f64) -> Vec<f64> {
        (0..n)
            .map(|k| 1e4 * (-((k as f64 - center) / scale).powi(2)).exp())
            .collect()
    }

    #[test]
    fn finds_maximum_of_rise_and_fall() {
        let series = gaussian(100, 40.0, 10.0);
        let peak = find_peak(&series).unwrap();
        assert!(peak.abs_diff(40) <= 1, "peak={peak}");
    }

    #[test]
    fn smoothed_peak_within_window_resolution() {
        // Skewed bump: t² e^{-t/8} peaks at t = 16.
        let series: Vec<f64> = (0..120)
            .map(|k| {
                let t = k as f64;
                t * t * (-t / 8.0).exp()
            })
            .collect();
        let peak = find_smoothed_peak(&series, 13).unwrap();
        assert!(peak.abs_diff(16) <= 2, "peak={peak}");
    }

    #[test]
    fn flat_zero_tail_is_not_a_rise() {
        assert_eq!(
            find_peak(&[0.0, 2.0, 5.0, 9.0, 6.0, 3.0, 1.0, 0.0, 0.0, 0.0]),
            Some(3)
        );
        assert_eq!(find_peak(&[3.0, 3.0, 3.0]), Some(0));
    }

    #[test]
    fn decreasing_series_peaks_at_start() {
        assert_eq!(find_peak(&[5.0, 4.0, 3.0, 1.0]), Some(0));
        assert_eq!(find_peak(&[]), None);
    }
}
