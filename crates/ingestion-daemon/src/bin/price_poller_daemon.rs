//! Long-lived process running only the Price Poller (C5). Scheduling,
//! wave-retry, and scoring all live in `pollers::PricePoller`; this binary is
//! just env/tracing bootstrap plus the SIGINT/SIGTERM-aware shutdown, the same
//! split `trading-agent::main` uses between setup and its scan loop.

use std::sync::Arc;

use pollers::PricePoller;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    ingestion_daemon::init_tracing("price_poller_daemon=info,pollers=info");

    let store = ingestion_daemon::connect_store().await?;
    let fetcher = ingestion_daemon::build_fetcher()?;
    let poller = Arc::new(PricePoller::new(store, fetcher));

    let (stop_tx, stop_rx) = watch::channel(false);

    tracing::info!("price poller daemon started, press Ctrl+C to stop");
    tokio::select! {
        _ = poller.run(stop_rx) => {}
        _ = ingestion_daemon::shutdown_signal() => {
            let _ = stop_tx.send(true);
            tokio::time::sleep(ingestion_daemon::SHUTDOWN_GRACE).await;
        }
    }

    tracing::info!("price poller daemon stopped");
    Ok(())
}
