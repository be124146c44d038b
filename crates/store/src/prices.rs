use chrono::NaiveDate;
use core_types::{Bar, PriceBar};
use sqlx::Row;

use crate::{StoreError, StoreGateway};

impl StoreGateway {
    /// `GetPriceData(symbol, from?, to?)` (§4.1). Ascending by date.
    pub async fn get_price_data(
        &self,
        symbol: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, StoreError> {
        let mut sql = String::from("SELECT date, open, high, low, close, volume FROM price_bar WHERE symbol = ?");
        if from.is_some() {
            sql.push_str(" AND date >= ?");
        }
        if to.is_some() {
            sql.push_str(" AND date <= ?");
        }
        sql.push_str(" ORDER BY date ASC");

        let mut query = sqlx::query(&sql).bind(symbol);
        if let Some(from) = from {
            query = query.bind(from);
        }
        if let Some(to) = to {
            query = query.bind(to);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(Bar {
                    date: row.try_get("date")?,
                    open: row.try_get("open")?,
                    high: row.try_get("high")?,
                    low: row.try_get("low")?,
                    close: row.try_get("close")?,
                    volume: row.try_get("volume")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(Into::into)
    }

    /// Dates already persisted for `symbol`. Used by pollers to compute
    /// `new_bars = returned_bars - existing_bar_dates` (§4.5).
    pub async fn get_existing_bar_dates(
        &self,
        symbol: &str,
    ) -> Result<std::collections::HashSet<NaiveDate>, StoreError> {
        let rows = sqlx::query("SELECT date FROM price_bar WHERE symbol = ?")
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<NaiveDate, _>("date").map_err(Into::into))
            .collect()
    }

    /// Whether any symbol already has a bar dated `date` (§4.5's "no bar exists for
    /// today yet" run-once check).
    pub async fn has_bars_for_date(&self, date: NaiveDate) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM price_bar WHERE date = ? LIMIT 1")
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Symbols lacking a bar for `today` or `yesterday`, ordered by market cap
    /// descending (§4.5 step 1).
    pub async fn symbols_needing_price_update(
        &self,
        today: NaiveDate,
        yesterday: NaiveDate,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT m.symbol FROM stock_metadata m
             WHERE NOT EXISTS (
                SELECT 1 FROM price_bar p WHERE p.symbol = m.symbol AND p.date IN (?, ?)
             )
             ORDER BY m.market_cap DESC, m.symbol ASC",
        )
        .bind(today)
        .bind(yesterday)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("symbol").map_err(Into::into))
            .collect()
    }

    /// `UpsertPriceBars(bars)` (§4.1). Overwrite-on-conflict, transactional.
    pub async fn upsert_price_bars(&self, bars: &[PriceBar]) -> Result<(), StoreError> {
        if bars.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for price_bar in bars {
            sqlx::query(
                "INSERT INTO price_bar (symbol, date, open, high, low, close, volume)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(symbol, date) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume",
            )
            .bind(&price_bar.symbol)
            .bind(price_bar.bar.date)
            .bind(price_bar.bar.open)
            .bind(price_bar.bar.high)
            .bind(price_bar.bar.low)
            .bind(price_bar.bar.close)
            .bind(price_bar.bar.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory;

    fn bar(date: &str, close: f64) -> Bar {
        Bar {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_overwrites_on_conflict() {
        let store = in_memory().await;
        let bars = vec![PriceBar {
            symbol: "TCS".into(),
            bar: bar("2024-01-02", 100.0),
        }];
        store.upsert_price_bars(&bars).await.unwrap();
        store.upsert_price_bars(&bars).await.unwrap();

        let updated = vec![PriceBar {
            symbol: "TCS".into(),
            bar: bar("2024-01-02", 105.0),
        }];
        store.upsert_price_bars(&updated).await.unwrap();

        let rows = store.get_price_data("TCS", None, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, 105.0);
    }

    #[tokio::test]
    async fn get_price_data_is_ascending_and_range_filtered() {
        let store = in_memory().await;
        let bars = vec![
            PriceBar { symbol: "TCS".into(), bar: bar("2024-01-03", 3.0) },
            PriceBar { symbol: "TCS".into(), bar: bar("2024-01-01", 1.0) },
            PriceBar { symbol: "TCS".into(), bar: bar("2024-01-02", 2.0) },
        ];
        store.upsert_price_bars(&bars).await.unwrap();

        let all = store.get_price_data("TCS", None, None).await.unwrap();
        assert_eq!(all.iter().map(|b| b.close).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);

        let ranged = store
            .get_price_data(
                "TCS",
                Some(NaiveDate::parse_from_str("2024-01-02", "%Y-%m-%d").unwrap()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(ranged.iter().map(|b| b.close).collect::<Vec<_>>(), vec![2.0, 3.0]);
    }

    #[tokio::test]
    async fn symbols_needing_price_update_excludes_today_and_yesterday() {
        let store = in_memory().await;
        let today = NaiveDate::parse_from_str("2024-06-03", "%Y-%m-%d").unwrap();
        let yesterday = NaiveDate::parse_from_str("2024-06-02", "%Y-%m-%d").unwrap();

        store
            .update_metadata(
                "A",
                &core_types::MetadataPatch { market_cap: Some(2), ..Default::default() },
            )
            .await
            .unwrap();
        store
            .update_metadata(
                "B",
                &core_types::MetadataPatch { market_cap: Some(1), ..Default::default() },
            )
            .await
            .unwrap();

        store.upsert_price_bars(&[PriceBar { symbol: "A".into(), bar: bar("2024-06-03", 10.0) }]).await.unwrap();

        assert!(store.has_bars_for_date(today).await.unwrap());
        assert!(!store.has_bars_for_date(NaiveDate::parse_from_str("2024-06-01", "%Y-%m-%d").unwrap()).await.unwrap());

        let needing = store.symbols_needing_price_update(today, yesterday).await.unwrap();
        assert_eq!(needing, vec!["B".to_string()]);
    }
}
