//! Low Volatility (§4.7): sign-inverted trailing daily-return volatility so that
//! ascending and descending sorts agree with every other strategy (§4.9).

use chrono::NaiveDate;
use core_types::{AuxiliaryDetail, Bar, ScoreDetail, ScoreRow, Strategy};

use crate::numeric::{daily_returns, stdev_last};

const PRIMARY_WINDOW: usize = 252;
const SECONDARY_FLOOR: usize = 50;
const MIN_RETURN_SAMPLES: usize = 20;

pub fn compute(symbol: &str, date: NaiveDate, bars: &[Bar]) -> ScoreRow {
    if bars.len() < SECONDARY_FLOOR {
        return ScoreRow::insufficient(symbol, date, Strategy::LowVolatility);
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let returns = daily_returns(&closes);
    if returns.len() < MIN_RETURN_SAMPLES {
        return ScoreRow::insufficient(symbol, date, Strategy::LowVolatility);
    }

    let window = PRIMARY_WINDOW.min(returns.len());
    let daily_vol = stdev_last(&returns, window).unwrap_or(0.0);

    ScoreRow {
        symbol: symbol.to_string(),
        calculation_date: date,
        strategy: Strategy::LowVolatility,
        score: Some(-daily_vol),
        insufficient_data: false,
        detail: Some(ScoreDetail::Auxiliary(AuxiliaryDetail {
            daily_volatility: Some(daily_vol),
            ..Default::default()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: i64, close: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + chrono::Duration::days(day),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn insufficient_below_50_bars() {
        let bars: Vec<Bar> = (0..49).map(|i| bar(i, 100.0)).collect();
        let row = compute("TEST", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), &bars);
        assert!(row.insufficient_data);
    }

    #[test]
    fn flat_series_has_zero_volatility() {
        let bars: Vec<Bar> = (0..252).map(|i| bar(i, 42.0)).collect();
        let row = compute("TEST", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), &bars);
        assert_eq!(row.score, Some(-0.0));
    }

    #[test]
    fn higher_volatility_scores_lower() {
        let calm: Vec<Bar> = (0..252).map(|i| bar(i, 100.0 + (i % 2) as f64 * 0.01)).collect();
        let wild: Vec<Bar> = (0..252).map(|i| bar(i, 100.0 + (i % 2) as f64 * 10.0)).collect();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let calm_row = compute("CALM", date, &calm);
        let wild_row = compute("WILD", date, &wild);
        assert!(calm_row.score.unwrap() > wild_row.score.unwrap());
    }
}
