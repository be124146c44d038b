use core_types::{MetadataFilter, MetadataPatch, StockMetadata};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::{StoreError, StoreGateway};

fn row_to_metadata(row: &SqliteRow) -> Result<StockMetadata, sqlx::Error> {
    Ok(StockMetadata {
        symbol: row.try_get("symbol")?,
        company_name: row.try_get("company_name")?,
        sector: row.try_get("sector")?,
        industry: row.try_get("industry")?,
        exchange: row.try_get("exchange")?,
        market_cap: row.try_get("market_cap")?,
        market_cap_rank: row.try_get("market_cap_rank")?,
        current_price: row.try_get("current_price")?,
        last_price_date: row.try_get("last_price_date")?,
        pe_ratio: row.try_get("pe_ratio")?,
        pb_ratio: row.try_get("pb_ratio")?,
        beta: row.try_get("beta")?,
        roe: row.try_get("roe")?,
        roa: row.try_get("roa")?,
        gross_margin: row.try_get("gross_margin")?,
        operating_margin: row.try_get("operating_margin")?,
        profit_margin: row.try_get("profit_margin")?,
        dividend_yield: row.try_get("dividend_yield")?,
        debt_to_equity: row.try_get("debt_to_equity")?,
        current_ratio: row.try_get("current_ratio")?,
        week52_high: row.try_get("week52_high")?,
        week52_low: row.try_get("week52_low")?,
        volume: row.try_get("volume")?,
        shares_outstanding: row.try_get("shares_outstanding")?,
    })
}

impl StoreGateway {
    /// `GetStockMetadata(filter)` (§4.1). Ordered by `market_cap_rank` asc, ties
    /// broken by symbol.
    pub async fn get_stock_metadata(
        &self,
        filter: &MetadataFilter,
    ) -> Result<Vec<StockMetadata>, StoreError> {
        let mut sql = String::from("SELECT * FROM stock_metadata WHERE 1=1");
        if filter.industry.is_some() {
            sql.push_str(" AND industry = ?");
        }
        if filter.sector.is_some() {
            sql.push_str(" AND sector = ?");
        }
        sql.push_str(" ORDER BY market_cap_rank ASC, symbol ASC");

        let mut query = sqlx::query(&sql);
        if let Some(industry) = &filter.industry {
            query = query.bind(industry);
        }
        if let Some(sector) = &filter.sector {
            query = query.bind(sector);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_metadata).collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Single-symbol lookup, used by the pollers and the pipeline to fetch the
    /// metadata snapshot a scoring call needs (`current_price`, filters).
    pub async fn get_metadata(&self, symbol: &str) -> Result<Option<StockMetadata>, StoreError> {
        let row = sqlx::query("SELECT * FROM stock_metadata WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_metadata).transpose().map_err(Into::into)
    }

    /// Symbols with any of `{sector, industry, current_price, market_cap}` null
    /// (§4.6 step 2's "missing" predicate), ordered by market cap descending.
    pub async fn symbols_missing_core_attributes(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT symbol FROM stock_metadata
             WHERE sector IS NULL OR industry IS NULL OR current_price IS NULL OR market_cap IS NULL
             ORDER BY market_cap DESC, symbol ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("symbol").map_err(Into::into))
            .collect()
    }

    /// `GetTopStocksByMarketCap(n, industry?, sector?)` (§4.1).
    pub async fn get_top_stocks_by_market_cap(
        &self,
        n: i64,
        industry: Option<&str>,
        sector: Option<&str>,
    ) -> Result<Vec<StockMetadata>, StoreError> {
        let mut sql = String::from(
            "SELECT * FROM stock_metadata WHERE market_cap IS NOT NULL",
        );
        if industry.is_some() {
            sql.push_str(" AND industry = ?");
        }
        if sector.is_some() {
            sql.push_str(" AND sector = ?");
        }
        sql.push_str(" ORDER BY market_cap DESC, symbol ASC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(industry) = industry {
            query = query.bind(industry);
        }
        if let Some(sector) = sector {
            query = query.bind(sector);
        }
        query = query.bind(n);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_metadata).collect::<Result<_, _>>().map_err(Into::into)
    }

    /// `UpdateMetadata(symbol, patch)` (§4.1). Only patched (`Some`) fields are
    /// overwritten; `None` fields are left unchanged. Inserts the row if absent.
    pub async fn update_metadata(
        &self,
        symbol: &str,
        patch: &MetadataPatch,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO stock_metadata (symbol) VALUES (?)")
            .bind(symbol)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "UPDATE stock_metadata SET
                company_name = COALESCE(?, company_name),
                sector = COALESCE(?, sector),
                industry = COALESCE(?, industry),
                exchange = COALESCE(?, exchange),
                market_cap = COALESCE(?, market_cap),
                current_price = COALESCE(?, current_price),
                last_price_date = COALESCE(?, last_price_date),
                pe_ratio = COALESCE(?, pe_ratio),
                pb_ratio = COALESCE(?, pb_ratio),
                beta = COALESCE(?, beta),
                roe = COALESCE(?, roe),
                roa = COALESCE(?, roa),
                gross_margin = COALESCE(?, gross_margin),
                operating_margin = COALESCE(?, operating_margin),
                profit_margin = COALESCE(?, profit_margin),
                dividend_yield = COALESCE(?, dividend_yield),
                debt_to_equity = COALESCE(?, debt_to_equity),
                current_ratio = COALESCE(?, current_ratio),
                week52_high = COALESCE(?, week52_high),
                week52_low = COALESCE(?, week52_low),
                volume = COALESCE(?, volume),
                shares_outstanding = COALESCE(?, shares_outstanding)
            WHERE symbol = ?",
        )
        .bind(&patch.company_name)
        .bind(&patch.sector)
        .bind(&patch.industry)
        .bind(&patch.exchange)
        .bind(patch.market_cap)
        .bind(patch.current_price)
        .bind(patch.last_price_date)
        .bind(patch.pe_ratio)
        .bind(patch.pb_ratio)
        .bind(patch.beta)
        .bind(patch.roe)
        .bind(patch.roa)
        .bind(patch.gross_margin)
        .bind(patch.operating_margin)
        .bind(patch.profit_margin)
        .bind(patch.dividend_yield)
        .bind(patch.debt_to_equity)
        .bind(patch.current_ratio)
        .bind(patch.week52_high)
        .bind(patch.week52_low)
        .bind(patch.volume)
        .bind(patch.shares_outstanding)
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Recomputes `market_cap_rank` for every row with a non-null `market_cap`,
    /// 1-based dense rank descending (§3 invariant).
    pub async fn recompute_market_cap_ranks(&self) -> Result<(), StoreError> {
        let rows = sqlx::query("SELECT symbol FROM stock_metadata WHERE market_cap IS NOT NULL ORDER BY market_cap DESC, symbol ASC")
            .fetch_all(&self.pool)
            .await?;
        let mut tx = self.pool.begin().await?;
        for (idx, row) in rows.iter().enumerate() {
            let symbol: String = row.try_get("symbol")?;
            sqlx::query("UPDATE stock_metadata SET market_cap_rank = ? WHERE symbol = ?")
                .bind(idx as i64 + 1)
                .bind(symbol)
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

    #[tokio::test]
    async fn update_then_get_round_trips_patched_fields() {
        let store = in_memory().await;
        store
            .update_metadata(
                "RELIANCE",
                &MetadataPatch {
                    sector: Some("Energy".into()),
                    industry: Some("Oil & Gas".into()),
                    market_cap: Some(1_000_000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let rows = store.get_stock_metadata(&MetadataFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "RELIANCE");
        assert_eq!(rows[0].sector.as_deref(), Some("Energy"));
        assert_eq!(rows[0].market_cap, Some(1_000_000));
    }

    #[tokio::test]
    async fn filter_by_industry_excludes_non_matching_rows() {
        let store = in_memory().await;
        store
            .update_metadata(
                "A",
                &MetadataPatch {
                    industry: Some("Pharma".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update_metadata(
                "B",
                &MetadataPatch {
                    industry: Some("Banking".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let filter = MetadataFilter {
            industry: Some("Pharma".into()),
            sector: None,
        };
        let rows = store.get_stock_metadata(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "A");
    }

    #[tokio::test]
    async fn missing_core_attributes_excludes_fully_populated_rows() {
        let store = in_memory().await;
        store
            .update_metadata(
                "COMPLETE",
                &MetadataPatch {
                    sector: Some("IT".into()),
                    industry: Some("Software".into()),
                    current_price: Some(100.0),
                    market_cap: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update_metadata("PARTIAL", &MetadataPatch { market_cap: Some(2), ..Default::default() })
            .await
            .unwrap();

        let missing = store.symbols_missing_core_attributes().await.unwrap();
        assert_eq!(missing, vec!["PARTIAL".to_string()]);

        let fetched = store.get_metadata("COMPLETE").await.unwrap().unwrap();
        assert_eq!(fetched.sector.as_deref(), Some("IT"));
        assert!(store.get_metadata("NOPE").await.unwrap().is_none());
    }
}
