//! Shared numeric utilities for the scoring strategies, following the teacher's
//! `technical-analysis::indicators` style: fixed-window iteration over a plain
//! `&[f64]`, NaN-sanitized via [`finite_or`].

use chrono::{Datelike, NaiveDate};
use statrs::statistics::Statistics;

/// Replaces a non-finite value with `default`, matching
/// `technical-analysis::indicators::finite_or`.
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Mean of the last `window` elements of `data`, or `None` if `data` has fewer
/// than `window` elements.
pub fn sma_last(data: &[f64], window: usize) -> Option<f64> {
    if window == 0 || data.len() < window {
        return None;
    }
    let slice = &data[data.len() - window..];
    Some(finite_or(slice.mean(), 0.0))
}

/// Sample standard deviation of the last `window` elements of `data`, or `None`
/// if `data` has fewer than `window` elements.
pub fn stdev_last(data: &[f64], window: usize) -> Option<f64> {
    if window == 0 || data.len() < window {
        return None;
    }
    let slice = &data[data.len() - window..];
    Some(finite_or(slice.std_dev(), 0.0))
}

/// Day-over-day simple returns, one element shorter than `closes`.
pub fn daily_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| finite_or((w[1] - w[0]) / w[0], 0.0))
        .collect()
}

/// `numpy.sign` semantics: -1/0/+1, `0.0` for exactly zero (not NaN-propagating).
pub fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Resamples an ascending `(date, close)` series to month-end closes, mirroring
/// pandas' `resample('ME').last()`: the last observation in each `(year, month)`
/// bucket, in ascending order.
pub fn month_end_closes(dates: &[NaiveDate], closes: &[f64]) -> Vec<f64> {
    let mut out = Vec::new();
    for (i, date) in dates.iter().enumerate() {
        let is_month_end = dates
            .get(i + 1)
            .map(|next| next.year() != date.year() || next.month() != date.month())
            .unwrap_or(true);
        if is_month_end {
            out.push(closes[i]);
        }
    }
    out
}

/// Period-over-period returns of an already-resampled series (e.g. month-end
/// closes), mirroring pandas' `pct_change().dropna()`.
pub fn pct_change(series: &[f64]) -> Vec<f64> {
    daily_returns(series)
}
