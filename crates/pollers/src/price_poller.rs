//! Price Poller (C5): keeps price history current to today across the universe,
//! grounded in `original_source/services/data-service/price_poller.py`'s
//! schedule-then-wave-retry algorithm. Task shape (`Arc<Semaphore>`-bounded
//! per-symbol fan-out within a wave, joined before the wave completes) follows
//! `data-loader::main`'s `tokio::spawn`-per-symbol idiom.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use core_types::{Bar, MetadataPatch, OpKind, PriceBar, StockMetadata, Strategy, MAX_RETRIES};
use fetcher::Fetcher;
use market_calendar::MarketCalendar;
use scoring::{compute_score, MomentumWeights};
use store::{StoreError, StoreGateway};
use tokio::sync::{watch, Semaphore};
use tokio::time::sleep;

const MAX_WAVES: u32 = 5;
const WAVE_RETRY_DELAY: Duration = Duration::from_secs(300);
const BATCH_SIZE: usize = 50;
const FALLBACK_SPACING: Duration = Duration::from_millis(500);
const SCHEDULE_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Lookback window requested from the Fetcher per cycle: comfortably covers the
/// widest scoring requirement (252 trading days) plus slack for non-trading days.
const HISTORY_LOOKBACK_DAYS: i64 = 400;

const STRATEGIES: [Strategy; 5] = [
    Strategy::Momentum,
    Strategy::Week52Breakout,
    Strategy::MaCrossover,
    Strategy::LowVolatility,
    Strategy::MeanReversion,
];

#[derive(Clone)]
pub struct PricePoller {
    store: StoreGateway,
    fetcher: Fetcher,
    weights: MomentumWeights,
}

impl PricePoller {
    pub fn new(store: StoreGateway, fetcher: Fetcher) -> Self {
        Self { store, fetcher, weights: MomentumWeights::default() }
    }

    pub fn with_weights(mut self, weights: MomentumWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Long-lived scheduling loop (§4.5). Wakes once a minute; runs the update
    /// cycle at most once per trading day, after market close.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                return;
            }
            match self.should_run_today().await {
                Ok(true) => self.run_update_cycle(&mut stop).await,
                Ok(false) => {}
                Err(e) => tracing::error!("price poller: schedule check failed: {e}"),
            }
            if *stop.borrow() {
                return;
            }
            tokio::select! {
                _ = sleep(SCHEDULE_POLL_INTERVAL) => {}
                _ = stop.changed() => {}
            }
        }
    }

    async fn should_run_today(&self) -> Result<bool, StoreError> {
        let calendar = MarketCalendar::new();
        if !calendar.is_weekday() || !calendar.is_market_closed_for_day() {
            return Ok(false);
        }
        let today = calendar.trading_date();
        Ok(!self.store.has_bars_for_date(today).await?)
    }

    /// Runs a manual or scheduled cycle to completion. Exposed so a caller (e.g.
    /// an admin endpoint or a CLI) can trigger an out-of-band update.
    pub async fn run_manual_cycle(&self) {
        let (_tx, rx) = watch::channel(false);
        let mut rx = rx;
        self.run_update_cycle(&mut rx).await;
    }

    async fn run_update_cycle(&self, stop: &mut watch::Receiver<bool>) {
        let calendar = MarketCalendar::new();
        let today = calendar.trading_date();
        let yesterday = calendar.prev_trading_date();

        let mut pending = match self.store.symbols_needing_price_update(today, yesterday).await {
            Ok(universe) => universe,
            Err(e) => {
                tracing::error!("price poller: failed to load update universe: {e}");
                return;
            }
        };

        if pending.is_empty() {
            tracing::info!("price poller: no symbols need updating for {today}");
            return;
        }
        tracing::info!("price poller: {} symbols need updates for {today}", pending.len());

        for wave in 1..=MAX_WAVES {
            if *stop.borrow() || pending.is_empty() {
                break;
            }
            tracing::info!("price poller: wave {wave}/{MAX_WAVES}, {} symbols", pending.len());
            self.process_wave(&pending, today).await;

            pending = match self.store.dequeue_pending_ops(OpKind::Prices, MAX_RETRIES).await {
                Ok(ops) => ops.into_iter().map(|op| op.symbol).collect(),
                Err(e) => {
                    tracing::error!("price poller: failed to re-read pending backlog: {e}");
                    Vec::new()
                }
            };

            if wave < MAX_WAVES && !pending.is_empty() {
                tokio::select! {
                    _ = sleep(WAVE_RETRY_DELAY) => {}
                    _ = stop.changed() => return,
                }
            }
        }

        tracing::info!("price poller: update cycle completed, {} symbols still pending", pending.len());
    }

    async fn process_wave(&self, symbols: &[String], today: NaiveDate) {
        for batch in symbols.chunks(BATCH_SIZE) {
            self.process_batch(batch, today).await;
        }
    }

    async fn process_batch(&self, batch: &[String], today: NaiveDate) {
        let from = today - chrono::Duration::days(HISTORY_LOOKBACK_DAYS);
        let symbols: Vec<String> = batch.to_vec();

        match self.fetcher.fetch_bars_batch(&symbols, from, today).await {
            Ok(mut results) => {
                let semaphore = Arc::new(Semaphore::new(symbols.len().max(1)));
                let mut tasks = tokio::task::JoinSet::new();
                for symbol in symbols {
                    let fetched = results.remove(&symbol);
                    let semaphore = Arc::clone(&semaphore);
                    let poller = self.clone();
                    tasks.spawn(async move {
                        let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                        match fetched {
                            Some(Ok(bars)) => poller.finish_symbol(&symbol, today, bars).await,
                            Some(Err(e)) => poller.fail_symbol(&symbol, &e.to_string()).await,
                            None => poller.fail_symbol(&symbol, "missing from batch response").await,
                        }
                    });
                }
                while tasks.join_next().await.is_some() {}
            }
            Err(e) => {
                tracing::warn!("price poller: batch fetch failed ({e}), falling back to per-symbol");
                for symbol in &symbols {
                    match self.fetcher.fetch_bars(symbol, from, today).await {
                        Ok(bars) => self.finish_symbol(symbol, today, bars).await,
                        Err(e) => self.fail_symbol(symbol, &e.to_string()).await,
                    }
                    sleep(FALLBACK_SPACING).await;
                }
            }
        }
    }

    async fn finish_symbol(&self, symbol: &str, today: NaiveDate, bars: Vec<Bar>) {
        let existing = match self.store.get_existing_bar_dates(symbol).await {
            Ok(dates) => dates,
            Err(e) => {
                self.fail_symbol(symbol, &e.to_string()).await;
                return;
            }
        };

        let new_bars: Vec<PriceBar> = bars
            .iter()
            .filter(|bar| !existing.contains(&bar.date))
            .map(|bar| PriceBar { symbol: symbol.to_string(), bar: *bar })
            .collect();

        if let Err(e) = self.store.upsert_price_bars(&new_bars).await {
            self.fail_symbol(symbol, &e.to_string()).await;
            return;
        }

        let last_price_date = bars.last().map(|b| b.date).unwrap_or(today);
        let patch = MetadataPatch {
            current_price: bars.last().map(|b| b.close),
            last_price_date: Some(last_price_date),
            ..Default::default()
        };
        if let Err(e) = self.store.update_metadata(symbol, &patch).await {
            tracing::warn!("price poller: {symbol} metadata update failed: {e}");
        }

        if let Err(e) = self.score_symbol(symbol, today).await {
            tracing::warn!("price poller: {symbol} scoring failed: {e}");
        }

        let total_records = match self.store.get_price_data(symbol, None, None).await {
            Ok(bars) => bars.len() as i64,
            Err(_) => 0,
        };
        let _ = self.store.mark_update_completed(symbol, today, total_records, last_price_date).await;
        let _ = self.store.remove_pending_op(symbol, OpKind::Prices).await;
        tracing::info!("price poller: {symbol} updated ({total_records} total bars)");
    }

    async fn fail_symbol(&self, symbol: &str, reason: &str) {
        tracing::warn!("price poller: {symbol} update failed: {reason}");
        let _ = self.store.mark_update_failed(symbol).await;
        let _ = self.store.enqueue_pending_op(symbol, OpKind::Prices, reason, None).await;
    }

    async fn score_symbol(&self, symbol: &str, date: NaiveDate) -> Result<(), StoreError> {
        let bars = self.store.get_price_data(symbol, None, None).await?;
        let metadata = self
            .store
            .get_metadata(symbol)
            .await?
            .unwrap_or_else(|| StockMetadata { symbol: symbol.to_string(), ..Default::default() });

        for strategy in STRATEGIES {
            let row = compute_score(strategy, symbol, date, &bars, &metadata, &self.weights);
            self.store.upsert_score_row(&row).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::StoreGateway;

    #[tokio::test]
    async fn finish_symbol_persists_bars_and_scores() {
        let store = StoreGateway::connect_in_memory().await.unwrap();
        let fetcher = Fetcher::new("http://upstream.invalid", "key");
        let poller = PricePoller::new(store.clone(), fetcher);

        store
            .update_metadata("TCS", &MetadataPatch { market_cap: Some(1), ..Default::default() })
            .await
            .unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let bars: Vec<Bar> = (0..10)
            .map(|i| Bar {
                date: today - chrono::Duration::days(9 - i),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 1000.0,
            })
            .collect();

        poller.finish_symbol("TCS", today, bars).await;

        let stored = store.get_price_data("TCS", None, None).await.unwrap();
        assert_eq!(stored.len(), 10);

        let status = store.get_update_status("TCS").await.unwrap().unwrap();
        assert_eq!(status.total_records, 10);

        let score = store
            .get_score_rows_for_date(today, Strategy::MaCrossover, &core_types::MetadataFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(score.len(), 1);
        assert!(score[0].insufficient_data);
    }
}
