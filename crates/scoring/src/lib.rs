//! Pure, deterministic scoring functions for the five ranking strategies (§4.7).
//!
//! Every strategy here is I/O-free: callers pass in an already-loaded bar series
//! and metadata snapshot and get a `ScoreRow` back. Persistence and read-through
//! caching live in the `store` crate, not here, mirroring how the teacher's
//! `technical-analysis`/`quant-analysis` crates keep indicator math separate from
//! `data-loader`'s database layer.

mod low_volatility;
mod ma_crossover;
mod mean_reversion;
mod momentum;
mod numeric;
mod week52_breakout;

pub use momentum::MomentumWeights;

use chrono::NaiveDate;
use core_types::{Bar, ScoreRow, StockMetadata, Strategy};

/// Dispatches to the strategy-specific pure function (§4.7's "tagged enum, no trait
/// object" redesign guidance). `current_price` is `metadata.current_price`, passed
/// separately so callers can override it (e.g. backtesting against an as-of price).
pub fn compute_score(
    strategy: Strategy,
    symbol: &str,
    date: NaiveDate,
    bars: &[Bar],
    metadata: &StockMetadata,
    weights: &MomentumWeights,
) -> ScoreRow {
    let current_price = metadata.current_price;
    match strategy {
        Strategy::Momentum => momentum::compute(symbol, date, bars, weights),
        Strategy::Week52Breakout => week52_breakout::compute(symbol, date, bars, current_price),
        Strategy::MaCrossover => ma_crossover::compute(symbol, date, bars),
        Strategy::LowVolatility => low_volatility::compute(symbol, date, bars),
        Strategy::MeanReversion => mean_reversion::compute(symbol, date, bars, current_price),
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
    fn dispatch_routes_to_matching_strategy() {
        let bars: Vec<Bar> = (0..260).map(|i| bar(i, 100.0 + i as f64 * 0.1)).collect();
        let metadata = StockMetadata { symbol: "TEST".into(), current_price: Some(130.0), ..Default::default() };
        let weights = MomentumWeights::default();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        for strategy in [
            Strategy::Momentum,
            Strategy::Week52Breakout,
            Strategy::MaCrossover,
            Strategy::LowVolatility,
            Strategy::MeanReversion,
        ] {
            let row = compute_score(strategy, "TEST", date, &bars, &metadata, &weights);
            assert_eq!(row.strategy, strategy);
            assert!(!row.insufficient_data);
        }
    }

    #[test]
    fn insufficient_bars_propagates_through_dispatch() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 100.0)).collect();
        let metadata = StockMetadata::default();
        let weights = MomentumWeights::default();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let row = compute_score(Strategy::Momentum, "TEST", date, &bars, &metadata, &weights);
        assert!(row.insufficient_data);
    }
}
