//! Background pollers that keep the price and fundamentals tables current
//! (SPEC_FULL.md §4.5, §4.6). Each poller owns a `StoreGateway` + `Fetcher`
//! pair and runs its own cadence independently; callers spawn `run` on a
//! `tokio::task` and signal shutdown through a shared `watch::Sender<bool>`.

mod attribute_poller;
mod price_poller;

pub use attribute_poller::AttributePoller;
pub use price_poller::PricePoller;
