use chrono::{DateTime, NaiveDate, Utc};
use core_types::{OpKind, PendingOp, MAX_RETRIES};
use sqlx::Row;

use crate::{StoreError, StoreGateway};

impl StoreGateway {
    /// `Enqueue(symbol, kind, reason, target_date?)` (§4.3). Upserts: increments
    /// `retry_count` if a row already exists for `(symbol, kind)`, else inserts
    /// with `retry_count = 1` — each enqueue records one failed attempt, so
    /// `MAX_RETRIES` enqueues of the same `(symbol, kind)` leave `retry_count ==
    /// MAX_RETRIES` and the op is exhausted.
    pub async fn enqueue_pending_op(
        &self,
        symbol: &str,
        kind: OpKind,
        reason: &str,
        target_date: Option<NaiveDate>,
    ) -> Result<(), StoreError> {
        let now: DateTime<Utc> = Utc::now();
        sqlx::query(
            "INSERT INTO pending_op (symbol, op_kind, retry_count, last_attempt, error_message, target_date, created_at)
             VALUES (?, ?, 1, ?, ?, ?, ?)
             ON CONFLICT(symbol, op_kind) DO UPDATE SET
                retry_count = retry_count + 1,
                last_attempt = excluded.last_attempt,
                error_message = excluded.error_message,
                target_date = COALESCE(excluded.target_date, pending_op.target_date)",
        )
        .bind(symbol)
        .bind(kind.as_str())
        .bind(now)
        .bind(reason)
        .bind(target_date)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `Dequeue(kind, max_retries) -> symbols[]` (§4.3): rows with
    /// `retry_count < max_retries`, ordered by `created_at` asc.
    pub async fn dequeue_pending_ops(
        &self,
        kind: OpKind,
        max_retries: i64,
    ) -> Result<Vec<PendingOp>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM pending_op WHERE op_kind = ? AND retry_count < ? ORDER BY created_at ASC",
        )
        .bind(kind.as_str())
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_pending_op).collect()
    }

    /// `Exhausted(kind) -> symbols[]` (§4.3): rows at or past `MAX_RETRIES`.
    pub async fn exhausted_pending_ops(&self, kind: OpKind) -> Result<Vec<PendingOp>, StoreError> {
        let rows = sqlx::query("SELECT * FROM pending_op WHERE op_kind = ? AND retry_count >= ?")
            .bind(kind.as_str())
            .bind(MAX_RETRIES)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_pending_op).collect()
    }

    /// `Remove(symbol, kind)` (§4.3): called on success.
    pub async fn remove_pending_op(&self, symbol: &str, kind: OpKind) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_op WHERE symbol = ? AND op_kind = ?")
            .bind(symbol)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `ResetRetries(kind)` (§4.3): admin operation, zeroes every row's
    /// `retry_count` for the given kind.
    pub async fn reset_retries(&self, kind: OpKind) -> Result<(), StoreError> {
        sqlx::query("UPDATE pending_op SET retry_count = 0 WHERE op_kind = ?")
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_pending_op(row: &sqlx::sqlite::SqliteRow) -> Result<PendingOp, StoreError> {
    let op_kind_str: String = row.try_get("op_kind")?;
    let op_kind = OpKind::from_str(&op_kind_str)
        .ok_or_else(|| StoreError::Validation(format!("unknown op_kind: {op_kind_str}")))?;
    Ok(PendingOp {
        symbol: row.try_get("symbol")?,
        op_kind,
        retry_count: row.try_get("retry_count")?,
        last_attempt: row.try_get("last_attempt")?,
        error_message: row.try_get("error_message")?,
        target_date: row.try_get("target_date")?,
        created_at: row.try_get("created_at")?,
    })
}
