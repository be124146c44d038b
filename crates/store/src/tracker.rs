use chrono::NaiveDate;
use core_types::{UpdateState, UpdateStatus};
use sqlx::Row;

use crate::{StoreError, StoreGateway};

impl StoreGateway {
    /// `MarkStarted(symbol)` (§4.4): sets `in_progress`.
    pub async fn mark_update_started(&self, symbol: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO update_status (symbol, update_status) VALUES (?, 'in_progress')
             ON CONFLICT(symbol) DO UPDATE SET update_status = 'in_progress'",
        )
        .bind(symbol)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `MarkCompleted(symbol, total_records, last_price_date)` (§4.4): sets
    /// `completed` and stamps `last_updated = today`.
    pub async fn mark_update_completed(
        &self,
        symbol: &str,
        today: NaiveDate,
        total_records: i64,
        last_price_date: NaiveDate,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO update_status (symbol, update_status, last_updated, total_records, last_price_date)
             VALUES (?, 'completed', ?, ?, ?)
             ON CONFLICT(symbol) DO UPDATE SET
                update_status = 'completed',
                last_updated = excluded.last_updated,
                total_records = excluded.total_records,
                last_price_date = excluded.last_price_date",
        )
        .bind(symbol)
        .bind(today)
        .bind(total_records)
        .bind(last_price_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `MarkFailed(symbol)` (§4.4): sets `failed`.
    pub async fn mark_update_failed(&self, symbol: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO update_status (symbol, update_status) VALUES (?, 'failed')
             ON CONFLICT(symbol) DO UPDATE SET update_status = 'failed'",
        )
        .bind(symbol)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_update_status(&self, symbol: &str) -> Result<Option<UpdateStatus>, StoreError> {
        let row = sqlx::query("SELECT * FROM update_status WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_update_status).transpose()
    }

    /// `StocksNeedingUpdate()` (§4.4): symbols with no tracker row, or
    /// `last_updated < today`, or `update_status = failed`, ordered by
    /// `market_cap desc`.
    pub async fn stocks_needing_update(&self, today: NaiveDate) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT m.symbol FROM stock_metadata m
             LEFT JOIN update_status u ON u.symbol = m.symbol
             WHERE u.symbol IS NULL OR u.last_updated < ? OR u.update_status = 'failed'
             ORDER BY m.market_cap DESC, m.symbol ASC",
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("symbol").map_err(Into::into))
            .collect()
    }
}

fn row_to_update_status(row: &sqlx::sqlite::SqliteRow) -> Result<UpdateStatus, StoreError> {
    let status_str: String = row.try_get("update_status")?;
    Ok(UpdateStatus {
        symbol: row.try_get("symbol")?,
        last_updated: row.try_get("last_updated")?,
        update_status: UpdateState::from_str(&status_str),
        total_records: row.try_get("total_records")?,
        last_price_date: row.try_get("last_price_date")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory;
    use core_types::MetadataPatch;

    #[tokio::test]
    async fn lifecycle_transitions_match_state_machine() {
        let store = in_memory().await;
        store.mark_update_started("RELIANCE").await.unwrap();
        let status = store.get_update_status("RELIANCE").await.unwrap().unwrap();
        assert_eq!(status.update_status, UpdateState::InProgress);

        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        store
            .mark_update_completed("RELIANCE", today, 250, today)
            .await
            .unwrap();
        let status = store.get_update_status("RELIANCE").await.unwrap().unwrap();
        assert_eq!(status.update_status, UpdateState::Completed);
        assert_eq!(status.total_records, 250);
    }

    #[tokio::test]
    async fn needing_update_includes_absent_stale_and_failed() {
        let store = in_memory().await;
        store.update_metadata("A", &MetadataPatch { market_cap: Some(3), ..Default::default() }).await.unwrap();
        store.update_metadata("B", &MetadataPatch { market_cap: Some(2), ..Default::default() }).await.unwrap();
        store.update_metadata("C", &MetadataPatch { market_cap: Some(1), ..Default::default() }).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        // A: completed today -> not needing update.
        store.mark_update_completed("A", today, 10, today).await.unwrap();
        // B: completed yesterday -> stale, needs update.
        store.mark_update_completed("B", yesterday, 10, yesterday).await.unwrap();
        // C: never touched -> needs update.

        let needing = store.stocks_needing_update(today).await.unwrap();
        assert_eq!(needing, vec!["B".to_string(), "C".to_string()]);
    }
}
