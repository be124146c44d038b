//! Pipeline Executor (C9): chains scoring stages, each narrowing the prior
//! stage's output, grounded in `analysis-orchestrator`'s
//! `AnalysisOrchestrator`/`StockScreener` (SPEC_FULL.md §4.9). Stage 1 draws
//! its universe from the metadata store; every later stage receives the
//! previous stage's winners as its universe, filters dropped.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use core_types::{MetadataFilter, StockMetadata, Strategy};
use scoring::{compute_score, MomentumWeights};
use store::{StoreError, StoreGateway};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One stage of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub strategy: Strategy,
    pub market_cap_limit: i64,
    pub output_count: usize,
    pub industry: Option<String>,
    pub sector: Option<String>,
}

/// Per-stage outcome: how many symbols went in, how many came out, and the
/// score distribution over the symbols that survived.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub strategy: Strategy,
    pub input_count: usize,
    pub output_count: usize,
    pub wall_time_ms: u64,
    pub scores: Vec<(String, f64)>,
    pub avg_score: f64,
    pub top_score: f64,
    pub bottom_score: f64,
}

/// The full run: every stage attempted before a halt, plus the final
/// surviving symbol list (the last stage's output, or the last non-empty
/// stage's output if the run halted early).
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub stages: Vec<StageResult>,
    pub final_stocks: Vec<String>,
    pub halted_early: bool,
}

/// Replaces NaN/±Inf with 0.0 before a result row crosses the process
/// boundary (§4.9's floating-point sanitation rule).
fn sanitize(score: f64) -> f64 {
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

pub struct PipelineExecutor {
    store: StoreGateway,
    weights: MomentumWeights,
}

impl PipelineExecutor {
    pub fn new(store: StoreGateway) -> Self {
        Self { store, weights: MomentumWeights::default() }
    }

    pub fn with_weights(mut self, weights: MomentumWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Runs `stages` in order against `calculation_date`. Halts (returning
    /// partial results) the moment a stage emits zero rows.
    pub async fn run(
        &self,
        stages: &[PipelineStage],
        calculation_date: NaiveDate,
    ) -> Result<PipelineResult, StoreError> {
        let mut results = Vec::with_capacity(stages.len());
        let mut universe: Option<Vec<String>> = None;
        let mut halted_early = false;

        for (idx, stage) in stages.iter().enumerate() {
            let candidates = match &universe {
                None => {
                    let filter_industry = stage.industry.as_deref();
                    let filter_sector = stage.sector.as_deref();
                    self.store
                        .get_top_stocks_by_market_cap(stage.market_cap_limit, filter_industry, filter_sector)
                        .await?
                        .into_iter()
                        .map(|m| m.symbol)
                        .collect::<Vec<_>>()
                }
                Some(prior_output) => prior_output.clone(),
            };

            let input_count = candidates.len();
            let started = Instant::now();
            let scored = self.score_universe(stage.strategy, calculation_date, &candidates).await?;
            let wall_time_ms = started.elapsed().as_millis() as u64;

            let output_count = scored.len().min(stage.output_count);
            let top = scored[..output_count].to_vec();

            let (avg_score, top_score, bottom_score) = if top.is_empty() {
                (0.0, 0.0, 0.0)
            } else {
                let sum: f64 = top.iter().map(|(_, s)| *s).sum();
                (sum / top.len() as f64, top[0].1, top[top.len() - 1].1)
            };

            let stage_result = StageResult {
                strategy: stage.strategy,
                input_count,
                output_count: top.len(),
                wall_time_ms,
                scores: top.clone(),
                avg_score,
                top_score,
                bottom_score,
            };
            results.push(stage_result);

            if top.is_empty() {
                tracing::warn!(
                    "pipeline: stage {idx} ({:?}) emitted zero rows from {input_count} candidates, halting",
                    stage.strategy
                );
                halted_early = true;
                universe = Some(Vec::new());
                break;
            }

            universe = Some(top.into_iter().map(|(symbol, _)| symbol).collect());
        }

        Ok(PipelineResult {
            stages: results,
            final_stocks: universe.unwrap_or_default(),
            halted_early,
        })
    }

    /// Scores every symbol in `candidates` concurrently, one task per symbol
    /// (bounded by the universe size itself, the same shape
    /// `StockScreener::screen` uses), dropping `insufficient_data` rows and
    /// sorting what remains descending by score.
    async fn score_universe(
        &self,
        strategy: Strategy,
        calculation_date: NaiveDate,
        candidates: &[String],
    ) -> Result<Vec<(String, f64)>, StoreError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(candidates.len()));
        let mut tasks = JoinSet::new();
        for symbol in candidates {
            let store = self.store.clone();
            let weights = self.weights.clone();
            let symbol = symbol.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let bars = store.get_price_data(&symbol, None, None).await?;
                let metadata = store
                    .get_metadata(&symbol)
                    .await?
                    .unwrap_or_else(|| StockMetadata { symbol: symbol.clone(), ..Default::default() });
                let row = compute_score(strategy, &symbol, calculation_date, &bars, &metadata, &weights);
                Ok::<_, StoreError>(row)
            });
        }

        let mut scored = Vec::with_capacity(candidates.len());
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(row)) if !row.insufficient_data => {
                    if let Some(score) = row.score {
                        scored.push((row.symbol, sanitize(score)));
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(StoreError::Validation(format!("scoring task panicked: {e}"))),
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored)
    }
}

/// A filterless snapshot of the top-`n` symbols by market cap, used by
/// `ComputeStrategyScores` (§6) when a caller wants a single-strategy ranking
/// without chaining multiple stages.
pub async fn compute_strategy_scores(
    store: &StoreGateway,
    strategy: Strategy,
    calculation_date: NaiveDate,
    filter: &MetadataFilter,
    limit: i64,
    weights: &MomentumWeights,
) -> Result<Vec<(String, f64)>, StoreError> {
    let executor = PipelineExecutor::new(store.clone()).with_weights(weights.clone());
    let stage = PipelineStage {
        strategy,
        market_cap_limit: limit,
        output_count: limit as usize,
        industry: filter.industry.clone(),
        sector: filter.sector.clone(),
    };
    let result = executor.run(std::slice::from_ref(&stage), calculation_date).await?;
    Ok(result.stages.into_iter().next().map(|s| s.scores).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Bar, MetadataPatch};
    use store::StoreGateway;

    async fn seed_symbol(store: &StoreGateway, symbol: &str, market_cap: i64, trend: f64) {
        store
            .update_metadata(
                symbol,
                &MetadataPatch { market_cap: Some(market_cap), current_price: Some(200.0), ..Default::default() },
            )
            .await
            .unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let bars: Vec<core_types::PriceBar> = (0..260)
            .map(|i| {
                let date = today - chrono::Duration::days(259 - i);
                let close = 100.0 + trend * i as f64;
                core_types::PriceBar {
                    symbol: symbol.to_string(),
                    bar: Bar { date, open: close, high: close + 1.0, low: close - 1.0, close, volume: 1000.0 },
                }
            })
            .collect();
        store.upsert_price_bars(&bars).await.unwrap();
    }

    #[tokio::test]
    async fn narrows_output_at_each_stage() {
        let store = StoreGateway::connect_in_memory().await.unwrap();
        seed_symbol(&store, "RISER", 300, 0.5).await;
        seed_symbol(&store, "FLAT", 200, 0.0).await;
        seed_symbol(&store, "FALLER", 100, -0.5).await;

        let executor = PipelineExecutor::new(store);
        let stages = vec![
            PipelineStage {
                strategy: Strategy::Momentum,
                market_cap_limit: 10,
                output_count: 2,
                industry: None,
                sector: None,
            },
            PipelineStage {
                strategy: Strategy::LowVolatility,
                market_cap_limit: 0,
                output_count: 1,
                industry: None,
                sector: None,
            },
        ];

        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let result = executor.run(&stages, date).await.unwrap();

        assert_eq!(result.stages[0].input_count, 3);
        assert_eq!(result.stages[0].output_count, 2);
        assert_eq!(result.stages[1].input_count, 2);
        assert_eq!(result.stages[1].output_count, 1);
        assert_eq!(result.final_stocks.len(), 1);
        assert!(!result.halted_early);
    }

    #[tokio::test]
    async fn halts_when_a_stage_has_no_symbols() {
        let store = StoreGateway::connect_in_memory().await.unwrap();

        let executor = PipelineExecutor::new(store);
        let stages = vec![PipelineStage {
            strategy: Strategy::Momentum,
            market_cap_limit: 10,
            output_count: 5,
            industry: None,
            sector: None,
        }];

        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let result = executor.run(&stages, date).await.unwrap();

        assert!(result.halted_early);
        assert!(result.final_stocks.is_empty());
        assert_eq!(result.stages[0].input_count, 0);
    }
}
