//! Moving-Average Crossover (§4.7): relative spread between SMA-50 and SMA-200.

use chrono::NaiveDate;
use core_types::{AuxiliaryDetail, Bar, ScoreDetail, ScoreRow, Strategy};

use crate::numeric::sma_last;

const MIN_BARS: usize = 200;

pub fn compute(symbol: &str, date: NaiveDate, bars: &[Bar]) -> ScoreRow {
    if bars.len() < MIN_BARS {
        return ScoreRow::insufficient(symbol, date, Strategy::MaCrossover);
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let sma_50 = sma_last(&closes, 50).unwrap_or(0.0);
    let sma_200 = sma_last(&closes, 200).unwrap_or(0.0);

    let score = if sma_200 == 0.0 {
        0.0
    } else {
        (sma_50 - sma_200) / sma_200
    };

    ScoreRow {
        symbol: symbol.to_string(),
        calculation_date: date,
        strategy: Strategy::MaCrossover,
        score: Some(score),
        insufficient_data: false,
        detail: Some(ScoreDetail::Auxiliary(AuxiliaryDetail {
            ma_50: Some(sma_50),
            ma_200: Some(sma_200),
            ..Default::default()
        })),
    }
}
