use thiserror::Error;

/// Errors surfaced by the fetcher (C2). Distinguishes the three upstream failure
/// modes the pollers must treat differently (SPEC_FULL.md §7).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by upstream provider")]
    RateLimited,

    #[error("transient upstream error: {0}")]
    Transient(String),

    #[error("symbol not known to upstream provider: {0}")]
    Unknown(String),

    #[error("invalid response from upstream provider: {0}")]
    Validation(String),
}

/// Errors surfaced by the scoring library (C7) when a request is malformed rather
/// than merely data-starved. Insufficient data is represented as
/// `ScoreRow::insufficient_data = true`, not as an `Err`.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("momentum weights do not sum close enough to 1.0: sum = {0}")]
    InvalidWeights(f64),
}

/// Errors surfaced by the Store Gateway (C1). Callers never see raw `sqlx::Error`
/// (SPEC_FULL.md §4.1 "Gateway shape").
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("not found")]
    NotFound,

    #[error("validation error: {0}")]
    Validation(String),
}
