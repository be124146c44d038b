//! Mean Reversion (§4.7): z-score of the current price against its trailing 200-day
//! mean. Strict `>= 200` bar requirement, no secondary floor.

use chrono::NaiveDate;
use core_types::{AuxiliaryDetail, Bar, ScoreDetail, ScoreRow, Strategy};

use crate::numeric::{sma_last, stdev_last};

const MIN_BARS: usize = 200;

pub fn compute(symbol: &str, date: NaiveDate, bars: &[Bar], current_price: Option<f64>) -> ScoreRow {
    if bars.len() < MIN_BARS {
        return ScoreRow::insufficient(symbol, date, Strategy::MeanReversion);
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let sma_200 = sma_last(&closes, MIN_BARS).unwrap_or(0.0);
    let stdev = stdev_last(&closes, MIN_BARS).unwrap_or(0.0);
    let price = current_price.unwrap_or(bars[bars.len() - 1].close);

    if stdev == 0.0 {
        return ScoreRow {
            symbol: symbol.to_string(),
            calculation_date: date,
            strategy: Strategy::MeanReversion,
            score: None,
            insufficient_data: false,
            detail: Some(ScoreDetail::Auxiliary(AuxiliaryDetail {
                ma_200: Some(sma_200),
                z_score: None,
                ..Default::default()
            })),
        };
    }

    let z_score = (price - sma_200) / stdev;

    ScoreRow {
        symbol: symbol.to_string(),
        calculation_date: date,
        strategy: Strategy::MeanReversion,
        score: Some(z_score),
        insufficient_data: false,
        detail: Some(ScoreDetail::Auxiliary(AuxiliaryDetail {
            ma_200: Some(sma_200),
            z_score: Some(z_score),
            ..Default::default()
        })),
    }
}
