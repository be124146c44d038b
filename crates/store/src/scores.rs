use chrono::NaiveDate;
use core_types::{AuxiliaryDetail, MetadataFilter, MomentumDetail, ScoreDetail, ScoreRow, Strategy};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::{StoreError, StoreGateway};

/// Minimum row count for a `calculation_date` to be considered "fully scored"
/// by `GetBestScoreDate` (§4.1 rationale: avoids displaying a partially-scored day).
const FULL_SCORING_ROW_THRESHOLD: i64 = 1000;
/// How many of the most recent persisted dates `GetBestScoreDate` falls back to
/// when no date clears `FULL_SCORING_ROW_THRESHOLD`.
const FALLBACK_WINDOW_DATES: i64 = 30;

fn row_to_score_row(row: &SqliteRow) -> Result<ScoreRow, StoreError> {
    let strategy_str: String = row.try_get("strategy")?;
    let strategy = Strategy::from_str(&strategy_str)
        .ok_or_else(|| StoreError::Validation(format!("unknown strategy: {strategy_str}")))?;
    let insufficient_data: bool = row.try_get("insufficient_data")?;

    let detail = if insufficient_data {
        None
    } else if strategy == Strategy::Momentum {
        Some(ScoreDetail::Momentum(MomentumDetail {
            fip_quality: row.try_get("fip_quality")?,
            raw_momentum_12_2: row.try_get("raw_momentum_12_2")?,
            true_momentum_6m: row.try_get("true_momentum_6m")?,
            true_momentum_3m: row.try_get("true_momentum_3m")?,
            true_momentum_1m: row.try_get("true_momentum_1m")?,
            raw_return_6m: row.try_get("raw_return_6m")?,
            raw_return_3m: row.try_get("raw_return_3m")?,
            raw_return_1m: row.try_get("raw_return_1m")?,
            raw_momentum_6m: row.try_get("raw_momentum_6m")?,
            raw_momentum_3m: row.try_get("raw_momentum_3m")?,
            raw_momentum_1m: row.try_get("raw_momentum_1m")?,
            vol_adj_momentum: row.try_get("vol_adj_momentum")?,
            consistency_score: row.try_get("consistency_score")?,
            trend_strength: row.try_get("trend_strength")?,
        }))
    } else {
        Some(ScoreDetail::Auxiliary(AuxiliaryDetail {
            ma_50: row.try_get("ma_50")?,
            ma_200: row.try_get("ma_200")?,
            z_score: row.try_get("z_score")?,
            breakout_ratio: row.try_get("breakout_ratio")?,
            daily_volatility: row.try_get("daily_volatility")?,
        }))
    };

    Ok(ScoreRow {
        symbol: row.try_get("symbol")?,
        calculation_date: row.try_get("calculation_date")?,
        strategy,
        score: row.try_get("score")?,
        insufficient_data,
        detail,
    })
}

impl StoreGateway {
    /// `UpsertScoreRow(row)` (§4.1, §4.8). Idempotent upsert on
    /// `(symbol, calculation_date, strategy)`.
    pub async fn upsert_score_row(&self, row: &ScoreRow) -> Result<(), StoreError> {
        let momentum = match &row.detail {
            Some(ScoreDetail::Momentum(m)) => Some(*m),
            _ => None,
        };
        let aux = match &row.detail {
            Some(ScoreDetail::Auxiliary(a)) => Some(*a),
            _ => None,
        };

        sqlx::query(
            "INSERT INTO score_row (
                symbol, calculation_date, strategy, score, insufficient_data,
                fip_quality, raw_momentum_12_2,
                true_momentum_6m, true_momentum_3m, true_momentum_1m,
                raw_return_6m, raw_return_3m, raw_return_1m,
                raw_momentum_6m, raw_momentum_3m, raw_momentum_1m,
                vol_adj_momentum, consistency_score, trend_strength,
                ma_50, ma_200, z_score, breakout_ratio, daily_volatility
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, calculation_date, strategy) DO UPDATE SET
                score = excluded.score,
                insufficient_data = excluded.insufficient_data,
                fip_quality = excluded.fip_quality,
                raw_momentum_12_2 = excluded.raw_momentum_12_2,
                true_momentum_6m = excluded.true_momentum_6m,
                true_momentum_3m = excluded.true_momentum_3m,
                true_momentum_1m = excluded.true_momentum_1m,
                raw_return_6m = excluded.raw_return_6m,
                raw_return_3m = excluded.raw_return_3m,
                raw_return_1m = excluded.raw_return_1m,
                raw_momentum_6m = excluded.raw_momentum_6m,
                raw_momentum_3m = excluded.raw_momentum_3m,
                raw_momentum_1m = excluded.raw_momentum_1m,
                vol_adj_momentum = excluded.vol_adj_momentum,
                consistency_score = excluded.consistency_score,
                trend_strength = excluded.trend_strength,
                ma_50 = excluded.ma_50,
                ma_200 = excluded.ma_200,
                z_score = excluded.z_score,
                breakout_ratio = excluded.breakout_ratio,
                daily_volatility = excluded.daily_volatility",
        )
        .bind(&row.symbol)
        .bind(row.calculation_date)
        .bind(row.strategy.as_str())
        .bind(row.score)
        .bind(row.insufficient_data)
        .bind(momentum.and_then(|m| m.fip_quality))
        .bind(momentum.and_then(|m| m.raw_momentum_12_2))
        .bind(momentum.and_then(|m| m.true_momentum_6m))
        .bind(momentum.and_then(|m| m.true_momentum_3m))
        .bind(momentum.and_then(|m| m.true_momentum_1m))
        .bind(momentum.and_then(|m| m.raw_return_6m))
        .bind(momentum.and_then(|m| m.raw_return_3m))
        .bind(momentum.and_then(|m| m.raw_return_1m))
        .bind(momentum.and_then(|m| m.raw_momentum_6m))
        .bind(momentum.and_then(|m| m.raw_momentum_3m))
        .bind(momentum.and_then(|m| m.raw_momentum_1m))
        .bind(momentum.and_then(|m| m.vol_adj_momentum))
        .bind(momentum.and_then(|m| m.consistency_score))
        .bind(momentum.and_then(|m| m.trend_strength))
        .bind(aux.and_then(|a| a.ma_50))
        .bind(aux.and_then(|a| a.ma_200))
        .bind(aux.and_then(|a| a.z_score))
        .bind(aux.and_then(|a| a.breakout_ratio))
        .bind(aux.and_then(|a| a.daily_volatility))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// `GetScoreRowsForDate(date, filter, limit)` (§4.1). Joins with metadata,
    /// applies `industry`/`sector` filters, orders `market_cap desc, score desc`.
    pub async fn get_score_rows_for_date(
        &self,
        date: NaiveDate,
        strategy: Strategy,
        filter: &MetadataFilter,
        limit: i64,
    ) -> Result<Vec<ScoreRow>, StoreError> {
        let mut sql = String::from(
            "SELECT s.* FROM score_row s
             JOIN stock_metadata m ON m.symbol = s.symbol
             WHERE s.calculation_date = ? AND s.strategy = ? AND s.insufficient_data = 0",
        );
        if filter.industry.is_some() {
            sql.push_str(" AND m.industry = ?");
        }
        if filter.sector.is_some() {
            sql.push_str(" AND m.sector = ?");
        }
        sql.push_str(" ORDER BY m.market_cap DESC, s.score DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(date).bind(strategy.as_str());
        if let Some(industry) = &filter.industry {
            query = query.bind(industry);
        }
        if let Some(sector) = &filter.sector {
            query = query.bind(sector);
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_score_row).collect()
    }

    /// `GetLatestScoreDate()` (§4.1).
    pub async fn get_latest_score_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        let row = sqlx::query("SELECT MAX(calculation_date) as d FROM score_row")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<NaiveDate>, _>("d")?)
    }

    /// `GetBestScoreDate()` (§4.1): the most recent date whose row-count exceeds
    /// `FULL_SCORING_ROW_THRESHOLD`, else the date with the highest row-count
    /// among the last `FALLBACK_WINDOW_DATES` persisted dates.
    pub async fn get_best_score_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        let row = sqlx::query(
            "SELECT calculation_date FROM score_row
             GROUP BY calculation_date
             HAVING COUNT(*) > ?
             ORDER BY calculation_date DESC
             LIMIT 1",
        )
        .bind(FULL_SCORING_ROW_THRESHOLD)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Some(row.try_get::<NaiveDate, _>("calculation_date")?));
        }

        let row = sqlx::query(
            "SELECT calculation_date, COUNT(*) as n FROM score_row
             GROUP BY calculation_date
             ORDER BY calculation_date DESC
             LIMIT ?",
        )
        .bind(FALLBACK_WINDOW_DATES)
        .fetch_all(&self.pool)
        .await?;

        Ok(row
            .iter()
            .max_by_key(|r| r.try_get::<i64, _>("n").unwrap_or(0))
            .map(|r| r.try_get::<NaiveDate, _>("calculation_date"))
            .transpose()?)
    }

    /// `GetStocksNeedingScoring(date, limit)` (§4.8): symbols ordered by market
    /// cap that lack a score row for `strategy` on `date`.
    pub async fn get_stocks_needing_scoring(
        &self,
        date: NaiveDate,
        strategy: Strategy,
        limit: i64,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT m.symbol FROM stock_metadata m
             WHERE NOT EXISTS (
                SELECT 1 FROM score_row s
                WHERE s.symbol = m.symbol AND s.calculation_date = ? AND s.strategy = ?
             )
             ORDER BY m.market_cap DESC, m.symbol ASC
             LIMIT ?",
        )
        .bind(date)
        .bind(strategy.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get("symbol").map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory;

    fn momentum_row(symbol: &str, date: NaiveDate, score: f64) -> ScoreRow {
        ScoreRow {
            symbol: symbol.into(),
            calculation_date: date,
            strategy: Strategy::Momentum,
            score: Some(score),
            insufficient_data: false,
            detail: Some(ScoreDetail::Momentum(MomentumDetail {
                fip_quality: Some(0.4),
                ..Default::default()
            })),
        }
    }

    #[tokio::test]
    async fn upsert_then_read_round_trips_detail() {
        let store = in_memory().await;
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        store
            .update_metadata(
                "RELIANCE",
                &core_types::MetadataPatch {
                    market_cap: Some(100),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.upsert_score_row(&momentum_row("RELIANCE", date, 0.8)).await.unwrap();

        let rows = store
            .get_score_rows_for_date(date, Strategy::Momentum, &MetadataFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, Some(0.8));
        match rows[0].detail {
            Some(ScoreDetail::Momentum(m)) => assert_eq!(m.fip_quality, Some(0.4)),
            _ => panic!("expected momentum detail"),
        }
    }

    #[tokio::test]
    async fn best_score_date_falls_back_to_highest_count_in_window() {
        let store = in_memory().await;
        let d1 = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();

        for i in 0..5 {
            store
                .upsert_score_row(&momentum_row(&format!("S{i}"), d1, 0.1))
                .await
                .unwrap();
        }
        for i in 0..2 {
            store
                .upsert_score_row(&momentum_row(&format!("T{i}"), d2, 0.1))
                .await
                .unwrap();
        }

        let best = store.get_best_score_date().await.unwrap();
        assert_eq!(best, Some(d1));
    }
}
