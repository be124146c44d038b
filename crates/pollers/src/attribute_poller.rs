//! Attribute Poller (C6): continuously drains the missing-fundamentals backlog,
//! grounded in `original_source/services/data-service/attribute_poller.py`'s
//! cycle (ensure-missing, cleanup-completed, shard-by-instance, batched fetch
//! with a rate-limit cooldown).

use std::sync::Arc;
use std::time::{Duration, Instant};

use core_types::{FetchError, OpKind, MAX_RETRIES};
use fetcher::Fetcher;
use store::{StoreError, StoreGateway};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::sleep;

const CYCLE_INTERVAL: Duration = Duration::from_secs(300);
const COOLDOWN_DURATION: Duration = Duration::from_secs(300);
const BATCH_SIZE: usize = 50;
const WORKER_CONCURRENCY: usize = 10;
const BATCH_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AttributePoller {
    store: StoreGateway,
    fetcher: Fetcher,
    instance_id: String,
    cooldown_until: Arc<Mutex<Option<Instant>>>,
}

impl AttributePoller {
    /// Reads `SERVICE_INSTANCE` (default `"1"`) to decide this replica's shard,
    /// matching the original's `os.getenv("SERVICE_INSTANCE", "1")`.
    pub fn new(store: StoreGateway, fetcher: Fetcher) -> Self {
        let instance_id = std::env::var("SERVICE_INSTANCE").unwrap_or_else(|_| "1".to_string());
        Self::with_instance_id(store, fetcher, instance_id)
    }

    pub fn with_instance_id(store: StoreGateway, fetcher: Fetcher, instance_id: String) -> Self {
        Self { store, fetcher, instance_id, cooldown_until: Arc::new(Mutex::new(None)) }
    }

    /// Long-lived 5-minute-cadence loop (§4.6).
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                return;
            }
            self.run_cycle().await;
            if *stop.borrow() {
                return;
            }
            tokio::select! {
                _ = sleep(CYCLE_INTERVAL) => {}
                _ = stop.changed() => {}
            }
        }
    }

    /// Runs one cycle immediately, outside the 5-minute cadence (the
    /// `TriggerAttributeUpdate()` admin operation with no symbols given).
    pub async fn run_manual_cycle(&self) {
        self.run_cycle().await;
    }

    /// Force-enqueues specific symbols for an immediate update, bypassing the
    /// missing-attribute detection (`TriggerAttributeUpdate(symbols)`). Still
    /// honors an active rate-limit cooldown.
    pub async fn trigger_symbols(&self, symbols: &[String]) -> Result<(), StoreError> {
        if self.is_cooling_down().await {
            tracing::info!("attribute poller: cooling down, ignoring manual trigger");
            return Ok(());
        }
        for symbol in symbols {
            self.store.enqueue_pending_op(symbol, OpKind::Attributes, "manually triggered", None).await?;
        }
        for batch in symbols.chunks(BATCH_SIZE) {
            if self.process_batch(batch).await {
                self.enter_cooldown().await;
                break;
            }
        }
        Ok(())
    }

    async fn run_cycle(&self) {
        if self.is_cooling_down().await {
            tracing::info!("attribute poller: cooling down, skipping cycle");
            return;
        }

        if let Err(e) = self.ensure_missing_in_pending().await {
            tracing::error!("attribute poller: ensure-missing failed: {e}");
        }
        if let Err(e) = self.cleanup_completed().await {
            tracing::error!("attribute poller: cleanup failed: {e}");
        }

        let backlog = match self.store.dequeue_pending_ops(OpKind::Attributes, MAX_RETRIES).await {
            Ok(ops) => ops,
            Err(e) => {
                tracing::error!("attribute poller: backlog read failed: {e}");
                return;
            }
        };

        let symbols = self.shard(backlog.into_iter().map(|op| op.symbol).collect());
        if symbols.is_empty() {
            tracing::info!("attribute poller: no symbols pending for instance {}", self.instance_id);
            return;
        }
        tracing::info!(
            "attribute poller: instance {} has {} symbols pending",
            self.instance_id,
            symbols.len()
        );

        for batch in symbols.chunks(BATCH_SIZE) {
            let hit_rate_limit = self.process_batch(batch).await;
            if hit_rate_limit {
                self.enter_cooldown().await;
                tracing::warn!("attribute poller: rate limited, entering cooldown");
                break;
            }
            sleep(BATCH_DELAY).await;
        }
    }

    /// Instance 1 takes even indices, instance 2 takes odd indices (§4.6 step 5).
    fn shard(&self, symbols: Vec<String>) -> Vec<String> {
        let start = if self.instance_id == "2" { 1 } else { 0 };
        symbols.into_iter().skip(start).step_by(2).collect()
    }

    async fn ensure_missing_in_pending(&self) -> Result<(), StoreError> {
        let missing = self.store.symbols_missing_core_attributes().await?;
        for symbol in missing {
            self.store
                .enqueue_pending_op(&symbol, OpKind::Attributes, "missing core attributes", None)
                .await?;
        }
        Ok(())
    }

    async fn cleanup_completed(&self) -> Result<(), StoreError> {
        let backlog = self.store.dequeue_pending_ops(OpKind::Attributes, MAX_RETRIES).await?;
        for op in backlog {
            if let Some(metadata) = self.store.get_metadata(&op.symbol).await? {
                if metadata.is_attribute_complete() {
                    self.store.remove_pending_op(&op.symbol, OpKind::Attributes).await?;
                }
            }
        }
        Ok(())
    }

    /// Returns true iff the batch saw a rate-limit response.
    async fn process_batch(&self, batch: &[String]) -> bool {
        let semaphore = Arc::new(Semaphore::new(WORKER_CONCURRENCY));
        let mut tasks = tokio::task::JoinSet::new();
        for symbol in batch {
            let semaphore = Arc::clone(&semaphore);
            let poller = self.clone();
            let symbol = symbol.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                poller.update_one(&symbol).await
            });
        }
        let mut rate_limited = false;
        while let Some(result) = tasks.join_next().await {
            if matches!(result, Ok(true)) {
                rate_limited = true;
            }
        }
        rate_limited
    }

    /// Returns true iff this symbol's fetch was rate-limited.
    async fn update_one(&self, symbol: &str) -> bool {
        match self.fetcher.fetch_fundamentals(symbol).await {
            Ok(patch) => {
                if let Err(e) = self.store.update_metadata(symbol, &patch).await {
                    tracing::warn!("attribute poller: {symbol} metadata update failed: {e}");
                    return false;
                }
                match self.store.get_metadata(symbol).await {
                    Ok(Some(metadata)) if metadata.is_attribute_complete() => {
                        let _ = self.store.remove_pending_op(symbol, OpKind::Attributes).await;
                    }
                    _ => {
                        let _ = self
                            .store
                            .enqueue_pending_op(symbol, OpKind::Attributes, "still missing attributes", None)
                            .await;
                    }
                }
                false
            }
            Err(FetchError::RateLimited) => {
                let _ = self
                    .store
                    .enqueue_pending_op(symbol, OpKind::Attributes, "rate limited", None)
                    .await;
                true
            }
            Err(e) => {
                let _ = self.store.enqueue_pending_op(symbol, OpKind::Attributes, &e.to_string(), None).await;
                false
            }
        }
    }

    async fn is_cooling_down(&self) -> bool {
        let mut guard = self.cooldown_until.lock().await;
        if let Some(deadline) = *guard {
            if Instant::now() < deadline {
                return true;
            }
            *guard = None;
        }
        false
    }

    async fn enter_cooldown(&self) {
        let mut guard = self.cooldown_until.lock().await;
        *guard = Some(Instant::now() + COOLDOWN_DURATION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::MetadataPatch;
    use store::StoreGateway;

    #[tokio::test]
    async fn sharding_splits_even_and_odd_indices() {
        let store = StoreGateway::connect_in_memory().await.unwrap();
        let fetcher = Fetcher::new("http://upstream.invalid", "key");
        let instance1 = AttributePoller::with_instance_id(store.clone(), fetcher.clone(), "1".into());
        let instance2 = AttributePoller::with_instance_id(store, fetcher, "2".into());

        let symbols: Vec<String> = (0..6).map(|i| format!("S{i}")).collect();
        assert_eq!(instance1.shard(symbols.clone()), vec!["S0", "S2", "S4"]);
        assert_eq!(instance2.shard(symbols), vec!["S1", "S3", "S5"]);
    }

    #[tokio::test]
    async fn cleanup_removes_pending_ops_for_complete_symbols() {
        let store = StoreGateway::connect_in_memory().await.unwrap();
        let fetcher = Fetcher::new("http://upstream.invalid", "key");
        let poller = AttributePoller::with_instance_id(store.clone(), fetcher, "1".into());

        store
            .update_metadata(
                "COMPLETE",
                &MetadataPatch {
                    sector: Some("IT".into()),
                    industry: Some("Software".into()),
                    pe_ratio: Some(20.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .enqueue_pending_op("COMPLETE", OpKind::Attributes, "missing", None)
            .await
            .unwrap();

        poller.cleanup_completed().await.unwrap();

        let backlog = store.dequeue_pending_ops(OpKind::Attributes, MAX_RETRIES).await.unwrap();
        assert!(backlog.is_empty());
    }

    #[tokio::test]
    async fn cooldown_expires_after_duration() {
        let store = StoreGateway::connect_in_memory().await.unwrap();
        let fetcher = Fetcher::new("http://upstream.invalid", "key");
        let poller = AttributePoller::with_instance_id(store, fetcher, "1".into());

        assert!(!poller.is_cooling_down().await);
        {
            let mut guard = poller.cooldown_until.lock().await;
            *guard = Some(Instant::now() - Duration::from_secs(1));
        }
        assert!(!poller.is_cooling_down().await);
    }
}
