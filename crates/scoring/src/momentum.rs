//! Quality Momentum Score ("Frog in the Pan" methodology), SPEC_FULL.md §4.7.
//!
//! Grounded directly on `original_source/web_app/src/momentum_calculator.py`'s
//! `MomentumCalculator`: the lookback windows, the smooth/FIP formulas, the
//! normalization bounds, and the default weights are all taken from
//! `calculate_quality_momentum_score` verbatim.

use chrono::NaiveDate;
use core_types::{Bar, MomentumDetail, ScoreDetail, ScoreRow, Strategy};

use crate::numeric::{daily_returns, finite_or, month_end_closes, pct_change, sign, sma_last};

const L_12_2: usize = 180;
const SKIP_RECENT: usize = 15;
const L_6M: usize = 100;
const L_3M: usize = 50;
const L_1M: usize = 15;
const SMOOTH_WINDOW: usize = 120;
const VOL_ADJ_WINDOW: usize = 60;
const CONSISTENCY_WINDOW: usize = 60;
const MIN_TRADING_DAYS: usize = 120;

/// Configurable momentum sub-score weights (§4.7). Must sum to 1.0; `normalize`
/// re-scales weights that drift from that, matching the original's tolerance
/// for hand-edited config.
#[derive(Debug, Clone, Copy)]
pub struct MomentumWeights {
    pub raw_6m: f64,
    pub raw_3m: f64,
    pub smooth: f64,
    pub vol_adj: f64,
    pub consistency: f64,
    pub trend: f64,
}

impl Default for MomentumWeights {
    fn default() -> Self {
        Self {
            raw_6m: 0.30,
            raw_3m: 0.20,
            smooth: 0.25,
            vol_adj: 0.15,
            consistency: 0.05,
            trend: 0.05,
        }
    }
}

impl MomentumWeights {
    fn sum(&self) -> f64 {
        self.raw_6m + self.raw_3m + self.smooth + self.vol_adj + self.consistency + self.trend
    }

    /// Re-normalizes in place if the weights don't sum to 1.0 within 0.01.
    pub fn normalize(&mut self) {
        let sum = self.sum();
        if (sum - 1.0).abs() > 0.01 && sum != 0.0 {
            self.raw_6m /= sum;
            self.raw_3m /= sum;
            self.smooth /= sum;
            self.vol_adj /= sum;
            self.consistency /= sum;
            self.trend /= sum;
        }
    }
}

fn raw_momentum(closes: &[f64], period: usize) -> Option<f64> {
    let n = closes.len();
    if n < period + 1 {
        return None;
    }
    let current = closes[n - 1];
    let past = closes[n - 1 - period];
    Some(finite_or((current - past) / past, 0.0))
}

/// `raw_momentum(w) * fraction_of_positive_return_days(w)`. Mirrors
/// `calculate_smooth_momentum`: note it inherits `raw_momentum`'s stricter
/// `n >= period + 1` requirement even though its own outer guard is `n >= period`,
/// so it is `None` at the single-bar boundary `n == period`.
fn smooth_momentum(closes: &[f64], period: usize) -> Option<f64> {
    let n = closes.len();
    if n < period {
        return None;
    }
    let returns = daily_returns(closes);
    if returns.len() < period {
        return None;
    }
    let tail = &returns[returns.len() - period..];
    let positive_days = tail.iter().filter(|&&r| r > 0.0).count();
    let consistency_ratio = positive_days as f64 / period as f64;
    let total_return = raw_momentum(closes, period)?;
    Some(total_return * consistency_ratio)
}

/// FIP quality: resample to month-end closes, require >= 8 of the last 10
/// monthly returns, `(pct_positive - pct_negative) * sign(cumulative_return)`.
fn fip_quality(dates: &[NaiveDate], closes: &[f64]) -> Option<f64> {
    if closes.len() < L_12_2 {
        return None;
    }
    let monthly_closes = month_end_closes(dates, closes);
    let monthly_returns = pct_change(&monthly_closes);
    let window = &monthly_returns[monthly_returns.len().saturating_sub(10)..];
    if window.len() < 8 {
        return None;
    }
    let total = window.len() as f64;
    let positive = window.iter().filter(|&&r| r > 0.0).count() as f64;
    let negative = window.iter().filter(|&&r| r < 0.0).count() as f64;
    let cumulative_return: f64 = window.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0;
    Some((positive / total - negative / total) * sign(cumulative_return))
}

fn clip01(x: f64, lo: f64, hi: f64) -> f64 {
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// `compute_score(Strategy::Momentum, ...)`'s implementation (§4.7).
pub fn compute(symbol: &str, date: NaiveDate, bars: &[Bar], weights: &MomentumWeights) -> ScoreRow {
    if bars.len() < MIN_TRADING_DAYS {
        return ScoreRow::insufficient(symbol, date, Strategy::Momentum);
    }

    let dates: Vec<NaiveDate> = bars.iter().map(|b| b.date).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let raw_return_6m = raw_momentum(&closes, L_6M).unwrap_or(0.0);
    let raw_return_3m = raw_momentum(&closes, L_3M).unwrap_or(0.0);
    let raw_return_1m = raw_momentum(&closes, L_1M).unwrap_or(0.0);
    let raw_momentum_12_2 = raw_momentum(&closes, L_12_2 + SKIP_RECENT);

    let smooth = smooth_momentum(&closes, SMOOTH_WINDOW).unwrap_or(0.0);
    let true_momentum_6m = smooth_momentum(&closes, L_6M);
    let true_momentum_3m = smooth_momentum(&closes, L_3M);
    let true_momentum_1m = smooth_momentum(&closes, L_1M);

    let returns = daily_returns(&closes);
    let vol_adj_momentum = if returns.len() >= VOL_ADJ_WINDOW {
        let tail = &returns[returns.len() - VOL_ADJ_WINDOW..];
        let mean: f64 = tail.iter().sum::<f64>() / tail.len() as f64;
        let variance: f64 =
            tail.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (tail.len() as f64 - 1.0).max(1.0);
        let stdev = variance.sqrt();
        if stdev == 0.0 {
            0.0
        } else {
            mean / stdev
        }
    } else {
        0.0
    };

    let consistency_score = if returns.len() >= CONSISTENCY_WINDOW {
        let tail = &returns[returns.len() - CONSISTENCY_WINDOW..];
        tail.iter().filter(|&&r| r > 0.0).count() as f64 / tail.len() as f64
    } else {
        0.0
    };

    let sma20 = sma_last(&closes, 20);
    let sma50 = sma_last(&closes, 50);
    let trend_strength = match (sma20, sma50) {
        (Some(sma20), Some(sma50)) => {
            let current = closes[closes.len() - 1];
            if current > sma20 && sma20 > sma50 {
                1.0
            } else if current > sma20 || current > sma50 {
                0.5
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    let fip = fip_quality(&dates, &closes);

    let raw_6m_norm = clip01(raw_return_6m, -0.5, 0.5);
    let raw_3m_norm = clip01(raw_return_3m, -0.3, 0.3);
    let smooth_norm = clip01(smooth, -0.3, 0.3);
    let vol_adj_norm = clip01(vol_adj_momentum, -1.0, 1.0);

    let total = weights.raw_6m * raw_6m_norm
        + weights.raw_3m * raw_3m_norm
        + weights.smooth * smooth_norm
        + weights.vol_adj * vol_adj_norm
        + weights.consistency * consistency_score
        + weights.trend * trend_strength;

    ScoreRow {
        symbol: symbol.to_string(),
        calculation_date: date,
        strategy: Strategy::Momentum,
        score: Some(total),
        insufficient_data: false,
        detail: Some(ScoreDetail::Momentum(MomentumDetail {
            fip_quality: fip,
            raw_momentum_12_2,
            true_momentum_6m,
            true_momentum_3m,
            true_momentum_1m,
            raw_return_6m: Some(raw_return_6m),
            raw_return_3m: Some(raw_return_3m),
            raw_return_1m: Some(raw_return_1m),
            raw_momentum_6m: Some(raw_return_6m),
            raw_momentum_3m: Some(raw_return_3m),
            raw_momentum_1m: Some(raw_return_1m),
            vol_adj_momentum: Some(vol_adj_momentum),
            consistency_score: Some(consistency_score),
            trend_strength: Some(trend_strength),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_series(n: usize, price: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + chrono::Duration::days(i as i64),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1000.0,
            })
            .collect()
    }

    fn uptrend_series(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let price = 100.0 * (1.0 + 0.001 * i as f64);
                Bar {
                    date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + chrono::Duration::days(i as i64),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    #[test]
    fn insufficient_below_120_bars() {
        let bars = flat_series(100, 50.0);
        let row = compute("TEST", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), &bars, &MomentumWeights::default());
        assert!(row.insufficient_data);
        assert!(row.score.is_none());
    }

    #[test]
    fn flat_series_has_zero_momentum_and_full_consistency_penalty() {
        let bars = flat_series(250, 50.0);
        let row = compute("TEST", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), &bars, &MomentumWeights::default());
        assert!(!row.insufficient_data);
        match row.detail {
            Some(ScoreDetail::Momentum(m)) => {
                assert_eq!(m.raw_return_6m, Some(0.0));
                assert_eq!(m.consistency_score, Some(0.0));
            }
            _ => panic!("expected momentum detail"),
        }
    }

    #[test]
    fn deterministic_given_identical_inputs() {
        let bars = uptrend_series(260);
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let a = compute("TEST", date, &bars, &MomentumWeights::default());
        let b = compute("TEST", date, &bars, &MomentumWeights::default());
        assert_eq!(a.score, b.score);
    }

    #[test]
    fn uptrend_scores_higher_than_downtrend() {
        let up = uptrend_series(260);
        let down: Vec<Bar> = up
            .iter()
            .rev()
            .enumerate()
            .map(|(i, b)| Bar { date: up[i].date, ..*b })
            .collect();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let up_row = compute("UP", date, &up, &MomentumWeights::default());
        let down_row = compute("DOWN", date, &down, &MomentumWeights::default());
        assert!(up_row.score.unwrap() > down_row.score.unwrap());
    }

    #[test]
    fn weights_normalize_when_off_by_more_than_tolerance() {
        let mut weights = MomentumWeights {
            raw_6m: 0.6,
            raw_3m: 0.4,
            smooth: 0.5,
            vol_adj: 0.3,
            consistency: 0.1,
            trend: 0.1,
        };
        weights.normalize();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
    }
}
