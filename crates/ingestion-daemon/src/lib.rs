//! Shared startup plumbing for the two poller daemons (§7's "application/binary
//! entry points" note): env-driven config, `tracing-subscriber` init, and the
//! combined SIGINT/SIGTERM shutdown future, grounded in `trading-agent::main`'s
//! startup sequence.

use std::time::Duration;

use fetcher::Fetcher;
use store::StoreGateway;
use tokio::signal::unix::SignalKind;

/// `DATABASE_URL` default when unset, matching `data-loader::main`'s `portfolio.db`
/// fallback pattern but scoped to this crate's own database file.
fn database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:ranking.db?mode=rwc".to_string())
}

fn fetcher_base_url() -> String {
    std::env::var("FETCHER_BASE_URL").unwrap_or_else(|_| "https://upstream.invalid".to_string())
}

/// Initializes `tracing-subscriber` with `RUST_LOG`-overridable filtering,
/// defaulting to `info` for this crate's own logs.
pub fn init_tracing(default_directive: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .init();
}

/// Opens (and migrates) the SQLite store at `DATABASE_URL`, exiting the process
/// via the caller's `anyhow::Result` propagation if the database is unreachable.
pub async fn connect_store() -> anyhow::Result<StoreGateway> {
    let url = database_url();
    tracing::info!("connecting to store at {url}");
    Ok(StoreGateway::connect(&url).await?)
}

/// Builds a `Fetcher` from `FETCHER_BASE_URL`/`FETCHER_API_KEY`; the latter is
/// required since there is no sane default upstream credential.
pub fn build_fetcher() -> anyhow::Result<Fetcher> {
    let base_url = fetcher_base_url();
    let api_key = std::env::var("FETCHER_API_KEY")
        .map_err(|_| anyhow::anyhow!("FETCHER_API_KEY must be set"))?;
    Ok(Fetcher::new(base_url, api_key))
}

/// Resolves once SIGINT or SIGTERM arrives. Both poller daemons race this
/// against their `run` loop's own `stop` receiver.
pub async fn shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("failed to install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }
}

/// How long `main` waits for the poller's own loop to notice the stop signal
/// and return before the process exits anyway.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
