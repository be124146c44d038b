use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar in a symbol's price series, ascending by trading day.
/// Mirrors the teacher's `Bar` shape but drops `vwap`, which nothing in this
/// crate's scoring functions consumes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// `low <= min(open, close) <= max(open, close) <= high` (SPEC_FULL.md §3 invariant 1).
    pub fn is_valid(&self) -> bool {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.volume >= 0.0 && self.low <= lo && lo <= hi && hi <= self.high
    }
}

/// A `Bar` addressed at `(symbol, date)` — the unit the Store Gateway upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub bar: Bar,
}

/// One row per `symbol` (§3). Every fundamental attribute below is populated by the
/// Attribute Poller and is nullable until fetched; `market_cap`/`current_price`/
/// `last_price_date` are also touched by the Price Poller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockMetadata {
    pub symbol: String,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub exchange: Option<String>,
    pub market_cap: Option<i64>,
    pub market_cap_rank: Option<i64>,
    pub current_price: Option<f64>,
    pub last_price_date: Option<NaiveDate>,
    pub pe_ratio: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub beta: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub profit_margin: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub week52_high: Option<f64>,
    pub week52_low: Option<f64>,
    pub volume: Option<f64>,
    pub shares_outstanding: Option<f64>,
}

impl StockMetadata {
    /// Fields the Attribute Poller's `EnsureMissingInPending` treats as "missing" (§4.6 step 2).
    pub fn has_missing_core_attributes(&self) -> bool {
        self.sector.is_none()
            || self.industry.is_none()
            || self.current_price.is_none()
            || self.market_cap.is_none()
    }

    /// The §4.6 completeness predicate: `sector`+`industry` present, plus at least one
    /// metric from the financial-ratio/profitability/balance-sheet/market-data families.
    pub fn is_attribute_complete(&self) -> bool {
        let has_identity = self.sector.is_some() && self.industry.is_some();
        let has_any_ratio = self.pe_ratio.is_some()
            || self.pb_ratio.is_some()
            || self.beta.is_some()
            || self.roe.is_some()
            || self.roa.is_some()
            || self.gross_margin.is_some()
            || self.operating_margin.is_some()
            || self.profit_margin.is_some()
            || self.dividend_yield.is_some()
            || self.debt_to_equity.is_some()
            || self.current_ratio.is_some()
            || self.week52_high.is_some()
            || self.week52_low.is_some()
            || self.volume.is_some()
            || self.shares_outstanding.is_some();
        has_identity && has_any_ratio
    }
}

/// Sparse patch applied via `UpdateMetadata`; `None` means "leave unchanged".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub exchange: Option<String>,
    pub market_cap: Option<i64>,
    pub current_price: Option<f64>,
    pub last_price_date: Option<NaiveDate>,
    pub pe_ratio: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub beta: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub profit_margin: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub week52_high: Option<f64>,
    pub week52_low: Option<f64>,
    pub volume: Option<f64>,
    pub shares_outstanding: Option<f64>,
}

/// Conjunctive filter over `stock_metadata`; `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub industry: Option<String>,
    pub sector: Option<String>,
}

/// The five scoring strategies this crate computes (SPEC_FULL.md §4.7). Reified as a
/// tagged variant per the Design Notes' REDESIGN guidance, not as a trait hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    Momentum,
    Week52Breakout,
    MaCrossover,
    LowVolatility,
    MeanReversion,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Momentum => "momentum",
            Strategy::Week52Breakout => "week52_breakout",
            Strategy::MaCrossover => "ma_crossover",
            Strategy::LowVolatility => "low_volatility",
            Strategy::MeanReversion => "mean_reversion",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "momentum" => Some(Strategy::Momentum),
            "week52_breakout" => Some(Strategy::Week52Breakout),
            "ma_crossover" => Some(Strategy::MaCrossover),
            "low_volatility" => Some(Strategy::LowVolatility),
            "mean_reversion" => Some(Strategy::MeanReversion),
            _ => None,
        }
    }

    /// Low-volatility scores are already sign-inverted so ascending and descending
    /// sorts agree (§4.9); every other strategy sorts descending.
    pub fn sort_descending(&self) -> bool {
        true
    }
}

/// The momentum strategy's full sub-score breakdown (§3, §4.7). `raw_momentum_*` is
/// the legacy-named alias of `raw_return_*` kept for read-path compatibility (§2a).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MomentumDetail {
    pub fip_quality: Option<f64>,
    pub raw_momentum_12_2: Option<f64>,
    pub true_momentum_6m: Option<f64>,
    pub true_momentum_3m: Option<f64>,
    pub true_momentum_1m: Option<f64>,
    pub raw_return_6m: Option<f64>,
    pub raw_return_3m: Option<f64>,
    pub raw_return_1m: Option<f64>,
    pub raw_momentum_6m: Option<f64>,
    pub raw_momentum_3m: Option<f64>,
    pub raw_momentum_1m: Option<f64>,
    pub vol_adj_momentum: Option<f64>,
    pub consistency_score: Option<f64>,
    pub trend_strength: Option<f64>,
}

/// Strategy-specific auxiliary fields for the four non-momentum strategies (§3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AuxiliaryDetail {
    pub ma_50: Option<f64>,
    pub ma_200: Option<f64>,
    pub z_score: Option<f64>,
    pub breakout_ratio: Option<f64>,
    pub daily_volatility: Option<f64>,
}

/// Per-strategy detail payload for a `ScoreRow`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ScoreDetail {
    Momentum(MomentumDetail),
    Auxiliary(AuxiliaryDetail),
}

/// One row per `(symbol, calculation_date, strategy)` (§3). Idempotent upsert key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRow {
    pub symbol: String,
    pub calculation_date: NaiveDate,
    pub strategy: Strategy,
    /// `None` iff `insufficient_data` is true.
    pub score: Option<f64>,
    pub insufficient_data: bool,
    pub detail: Option<ScoreDetail>,
}

impl ScoreRow {
    pub fn insufficient(symbol: impl Into<String>, calculation_date: NaiveDate, strategy: Strategy) -> Self {
        Self {
            symbol: symbol.into(),
            calculation_date,
            strategy,
            score: None,
            insufficient_data: true,
            detail: None,
        }
    }
}

/// The two kinds of pending operation the ledger (C3) tracks (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Prices,
    Attributes,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Prices => "prices",
            OpKind::Attributes => "attributes",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "prices" => Some(OpKind::Prices),
            "attributes" => Some(OpKind::Attributes),
            _ => None,
        }
    }
}

/// Maximum retry attempts before a `PendingOp` is permanently exhausted (§3, §6, §8).
pub const MAX_RETRIES: i64 = 5;

/// One row per `(symbol, op_kind)` (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOp {
    pub symbol: String,
    pub op_kind: OpKind,
    pub retry_count: i64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub target_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// The update tracker's per-symbol state machine (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl UpdateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateState::Pending => "pending",
            UpdateState::InProgress => "in_progress",
            UpdateState::Completed => "completed",
            UpdateState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "in_progress" => UpdateState::InProgress,
            "completed" => UpdateState::Completed,
            "failed" => UpdateState::Failed,
            _ => UpdateState::Pending,
        }
    }
}

/// One row per `symbol` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub symbol: String,
    pub last_updated: Option<NaiveDate>,
    pub update_status: UpdateState,
    pub total_records: i64,
    pub last_price_date: Option<NaiveDate>,
}
