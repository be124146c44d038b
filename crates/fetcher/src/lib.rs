//! Fetcher (C2): rate-limited, retryable price-bar and fundamentals retrieval
//! from the upstream market-data provider (SPEC_FULL.md §4.2).
//!
//! Grounded on the teacher's `polygon-client::PolygonClient`/`RateLimiter` for the
//! client/retry shape, and on `original_source/backend/models/data_fetcher.py`'s
//! `YahooFinanceFetcher._get_ticker_symbol` for the symbol-suffix translation rule.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use core_types::{Bar, MetadataPatch};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use core_types::FetchError;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(15);
const SINGLE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// NSE market suffix the provider expects. Private to this crate: every other
/// component only ever sees bare tickers (SPEC_FULL.md §4.2, §2a).
const MARKET_SUFFIX: &str = ".NS";

fn to_upstream_symbol(symbol: &str) -> String {
    if symbol.ends_with(MARKET_SUFFIX) {
        symbol.to_string()
    } else {
        format!("{symbol}{MARKET_SUFFIX}")
    }
}

fn strip_upstream_symbol(symbol: &str) -> String {
    symbol
        .strip_suffix(MARKET_SUFFIX)
        .unwrap_or(symbol)
        .to_string()
}

/// Sliding-window rate limiter: at most `max_requests` calls to `acquire()` are
/// allowed to complete within any trailing `window`. Two independent instances
/// back this crate — one for bar fetches, one for fundamentals — since their
/// minimum spacing differs (§4.2). Mirrors `polygon-client::RateLimiter`.
struct RateLimiter {
    timestamps: Mutex<VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Mutex::new(VecDeque::new()),
            max_requests,
            window,
        }
    }

    /// At least 1 request per `spacing`.
    fn with_min_spacing(spacing: Duration) -> Self {
        Self::new(1, spacing)
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(&front) = timestamps.front() {
                    if now.duration_since(front) > self.window {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                if timestamps.len() < self.max_requests {
                    timestamps.push_back(now);
                    None
                } else {
                    let oldest = *timestamps.front().unwrap();
                    Some(self.window.saturating_sub(now.duration_since(oldest)))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

/// Wire shape for a single OHLCV row returned by the upstream provider
/// (`date, open, high, low, close, volume`, per SPEC_FULL.md §6).
#[derive(Debug, Deserialize)]
struct BarDto {
    date: NaiveDate,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

impl BarDto {
    fn into_bar(self) -> Option<Bar> {
        Some(Bar {
            date: self.date,
            open: self.open?,
            high: self.high?,
            low: self.low?,
            close: self.close?,
            volume: self.volume.unwrap_or(0.0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct BarsResponseDto {
    bars: Vec<BarDto>,
}

/// Wire shape for fundamentals, deserialized at the boundary and mapped into
/// `MetadataPatch` (the same fields the Attribute Poller persists).
#[derive(Debug, Deserialize, Default)]
struct FundamentalsDto {
    company_name: Option<String>,
    sector: Option<String>,
    industry: Option<String>,
    exchange: Option<String>,
    market_cap: Option<i64>,
    current_price: Option<f64>,
    pe_ratio: Option<f64>,
    pb_ratio: Option<f64>,
    beta: Option<f64>,
    roe: Option<f64>,
    roa: Option<f64>,
    gross_margin: Option<f64>,
    operating_margin: Option<f64>,
    profit_margin: Option<f64>,
    dividend_yield: Option<f64>,
    debt_to_equity: Option<f64>,
    current_ratio: Option<f64>,
    week52_high: Option<f64>,
    week52_low: Option<f64>,
    volume: Option<f64>,
    shares_outstanding: Option<f64>,
}

impl FundamentalsDto {
    fn into_patch(self) -> MetadataPatch {
        MetadataPatch {
            company_name: self.company_name,
            sector: self.sector,
            industry: self.industry,
            exchange: self.exchange,
            market_cap: self.market_cap,
            current_price: self.current_price,
            last_price_date: None,
            pe_ratio: self.pe_ratio,
            pb_ratio: self.pb_ratio,
            beta: self.beta,
            roe: self.roe,
            roa: self.roa,
            gross_margin: self.gross_margin,
            operating_margin: self.operating_margin,
            profit_margin: self.profit_margin,
            dividend_yield: self.dividend_yield,
            debt_to_equity: self.debt_to_equity,
            current_ratio: self.current_ratio,
            week52_high: self.week52_high,
            week52_low: self.week52_low,
            volume: self.volume,
            shares_outstanding: self.shares_outstanding,
        }
    }
}

/// Clean, sorted, deduplicated bars for a single symbol, with the suffix the
/// provider echoed back already stripped (§4.2: "all other components only
/// ever see bare tickers").
fn normalize_bars(symbol: &str, raw: Vec<BarDto>) -> Vec<Bar> {
    let mut bars: Vec<Bar> = raw.into_iter().filter_map(BarDto::into_bar).collect();
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    debug!(symbol, count = bars.len(), "normalized bars");
    bars
}

/// Retrieves price bars and fundamentals from the upstream provider.
///
/// Clone is cheap: the HTTP client and both limiters are `Arc`-backed internally
/// (`reqwest::Client` is itself a cheap-clone handle, and the limiters below are
/// wrapped in `Arc` so the whole fetcher can be shared across poller tasks).
#[derive(Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    bars_limiter: Arc<RateLimiter>,
    fundamentals_limiter: Arc<RateLimiter>,
}

impl Fetcher {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .build()
                .expect("reqwest client"),
            base_url: base_url.into(),
            api_key: api_key.into(),
            bars_limiter: Arc::new(RateLimiter::with_min_spacing(Duration::from_secs(1))),
            fundamentals_limiter: Arc::new(RateLimiter::with_min_spacing(Duration::from_secs(3))),
        }
    }

    async fn send(&self, url: &str, timeout: Duration) -> Result<reqwest::Response, FetchError> {
        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let response = self
                .http
                .get(url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        FetchError::Transient(format!("request timed out: {e}"))
                    } else {
                        FetchError::Transient(e.to_string())
                    }
                })?;

            if response.status().as_u16() == 429 {
                if attempt == MAX_RATE_LIMIT_RETRIES {
                    return Err(FetchError::RateLimited);
                }
                warn!(attempt, "upstream rate-limited us, backing off");
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                continue;
            }

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(FetchError::Unknown(url.to_string()));
            }

            if !response.status().is_success() {
                return Err(FetchError::Transient(format!(
                    "upstream returned {}",
                    response.status()
                )));
            }

            return Ok(response);
        }
        Err(FetchError::RateLimited)
    }

    /// `FetchBars(symbol, from, to)` (§4.2).
    pub async fn fetch_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        self.bars_limiter.acquire().await;
        let upstream_symbol = to_upstream_symbol(symbol);
        let url = format!(
            "{}/v1/bars/{}?from={}&to={}&apikey={}",
            self.base_url, upstream_symbol, from, to, self.api_key
        );
        let response = self.send(&url, SINGLE_FETCH_TIMEOUT).await?;
        let body: BarsResponseDto = response
            .json()
            .await
            .map_err(|e| FetchError::Validation(e.to_string()))?;
        Ok(normalize_bars(symbol, body.bars))
    }

    /// `FetchBarsBatch(symbols[], from, to)` (§4.2). On an aggregate upstream
    /// failure, callers should fall back to per-symbol `fetch_bars` with 0.5s
    /// spacing (the Price Poller owns that fallback per §4.5).
    pub async fn fetch_bars_batch(
        &self,
        symbols: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<String, Result<Vec<Bar>, FetchError>>, FetchError> {
        self.bars_limiter.acquire().await;
        let upstream_symbols: Vec<String> = symbols.iter().map(|s| to_upstream_symbol(s)).collect();
        let url = format!(
            "{}/v1/bars/batch?symbols={}&from={}&to={}&apikey={}",
            self.base_url,
            upstream_symbols.join(","),
            from,
            to,
            self.api_key
        );
        let response = self.send(&url, BATCH_FETCH_TIMEOUT).await?;

        #[derive(Debug, Deserialize)]
        struct BatchEntryDto {
            symbol: String,
            bars: Option<Vec<BarDto>>,
            error: Option<String>,
        }
        #[derive(Debug, Deserialize)]
        struct BatchResponseDto {
            results: Vec<BatchEntryDto>,
        }

        let body: BatchResponseDto = response
            .json()
            .await
            .map_err(|e| FetchError::Validation(e.to_string()))?;

        let mut out = HashMap::with_capacity(body.results.len());
        for entry in body.results {
            let bare = strip_upstream_symbol(&entry.symbol);
            let result = match entry.error {
                Some(msg) => Err(FetchError::Transient(msg)),
                None => Ok(normalize_bars(&bare, entry.bars.unwrap_or_default())),
            };
            out.insert(bare, result);
        }
        Ok(out)
    }

    /// `FetchFundamentals(symbol)` (§4.2).
    pub async fn fetch_fundamentals(&self, symbol: &str) -> Result<MetadataPatch, FetchError> {
        self.fundamentals_limiter.acquire().await;
        let upstream_symbol = to_upstream_symbol(symbol);
        let url = format!(
            "{}/v1/fundamentals/{}?apikey={}",
            self.base_url, upstream_symbol, self.api_key
        );
        let response = self.send(&url, SINGLE_FETCH_TIMEOUT).await?;
        let body: FundamentalsDto = response
            .json()
            .await
            .map_err(|e| FetchError::Validation(e.to_string()))?;
        Ok(body.into_patch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_market_suffix_once() {
        assert_eq!(to_upstream_symbol("RELIANCE"), "RELIANCE.NS");
        assert_eq!(to_upstream_symbol("RELIANCE.NS"), "RELIANCE.NS");
    }

    #[test]
    fn strips_market_suffix() {
        assert_eq!(strip_upstream_symbol("RELIANCE.NS"), "RELIANCE");
        assert_eq!(strip_upstream_symbol("RELIANCE"), "RELIANCE");
    }

    #[test]
    fn normalize_sorts_dedupes_and_drops_null_ohlc() {
        let raw = vec![
            BarDto {
                date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                open: Some(10.0),
                high: Some(11.0),
                low: Some(9.0),
                close: Some(10.5),
                volume: Some(1000.0),
            },
            BarDto {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                open: Some(9.0),
                high: Some(10.0),
                low: Some(8.5),
                close: Some(9.5),
                volume: Some(800.0),
            },
            BarDto {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                open: Some(9.0),
                high: Some(10.0),
                low: Some(8.5),
                close: Some(9.5),
                volume: Some(800.0),
            },
            BarDto {
                date: NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
                open: None,
                high: Some(10.0),
                low: Some(8.5),
                close: Some(9.5),
                volume: Some(800.0),
            },
        ];
        let bars = normalize_bars("RELIANCE", raw);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[1].date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    }

    #[tokio::test]
    async fn rate_limiter_enforces_min_spacing() {
        let limiter = RateLimiter::with_min_spacing(Duration::from_millis(50));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
