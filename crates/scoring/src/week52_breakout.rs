//! 52-Week Breakout (§4.7): position within the trailing 52-week high/low range.

use chrono::NaiveDate;
use core_types::{AuxiliaryDetail, Bar, ScoreDetail, ScoreRow, Strategy};

const PRIMARY_WINDOW: usize = 252;
const SECONDARY_FLOOR: usize = 50;

pub fn compute(symbol: &str, date: NaiveDate, bars: &[Bar], current_price: Option<f64>) -> ScoreRow {
    if bars.len() < SECONDARY_FLOOR {
        return ScoreRow::insufficient(symbol, date, Strategy::Week52Breakout);
    }

    let window = PRIMARY_WINDOW.min(bars.len());
    let tail = &bars[bars.len() - window..];
    let high52 = tail.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low52 = tail.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let price = current_price.unwrap_or(bars[bars.len() - 1].close);

    let breakout = if high52 == low52 {
        0.5
    } else {
        (price - low52) / (high52 - low52)
    };

    ScoreRow {
        symbol: symbol.to_string(),
        calculation_date: date,
        strategy: Strategy::Week52Breakout,
        score: Some(breakout),
        insufficient_data: false,
        detail: Some(ScoreDetail::Auxiliary(AuxiliaryDetail {
            breakout_ratio: Some(breakout),
            ..Default::default()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: i64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + chrono::Duration::days(day),
            open: close,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn insufficient_below_50_bars() {
        let bars: Vec<Bar> = (0..49).map(|i| bar(i, 100.0, 90.0, 95.0)).collect();
        let row = compute("TEST", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), &bars, None);
        assert!(row.insufficient_data);
    }

    #[test]
    fn breakout_ratio_edge_case() {
        let mut bars: Vec<Bar> = (0..252).map(|i| bar(i, 200.0, 150.0, 175.0)).collect();
        bars[180].high = 500.0;
        bars[30].low = 50.0;
        let row = compute(
            "TEST",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            &bars,
            Some(500.0),
        );
        assert_eq!(row.score, Some(1.0));
    }

    #[test]
    fn flat_range_returns_half() {
        let bars: Vec<Bar> = (0..252).map(|i| bar(i, 100.0, 100.0, 100.0)).collect();
        let row = compute("TEST", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), &bars, None);
        assert_eq!(row.score, Some(0.5));
    }
}
