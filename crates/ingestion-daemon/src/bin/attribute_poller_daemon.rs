//! Long-lived process running only the Attribute Poller (C6). A second
//! instance can run alongside this one with `SERVICE_INSTANCE=2` set so the
//! two split the missing-fundamentals backlog by even/odd index (§4.6, §5).

use std::sync::Arc;

use pollers::AttributePoller;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    ingestion_daemon::init_tracing("attribute_poller_daemon=info,pollers=info");

    let store = ingestion_daemon::connect_store().await?;
    let fetcher = ingestion_daemon::build_fetcher()?;
    let poller = Arc::new(AttributePoller::new(store, fetcher));

    let (stop_tx, stop_rx) = watch::channel(false);

    tracing::info!("attribute poller daemon started, press Ctrl+C to stop");
    tokio::select! {
        _ = poller.run(stop_rx) => {}
        _ = ingestion_daemon::shutdown_signal() => {
            let _ = stop_tx.send(true);
            tokio::time::sleep(ingestion_daemon::SHUTDOWN_GRACE).await;
        }
    }

    tracing::info!("attribute poller daemon stopped");
    Ok(())
}
