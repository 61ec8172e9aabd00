//! Trade repository.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::portfolio::save_portfolio;
use super::{get_dec, get_enum, get_ts, to_millis, DbResult};
use crate::types::{Portfolio, Trade, TradeSource};

pub struct TradeRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TradeRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, trade: &Trade) -> DbResult<i64> {
        insert_trade(self.pool, trade).await
    }

    /// Insert a fill and the resulting portfolio in one transaction.
    pub async fn record_fill(&self, trade: &Trade, portfolio: &Portfolio) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;
        let id = insert_trade(&mut *tx, trade).await?;
        save_portfolio(&mut *tx, portfolio).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Newest first, optionally filtered by source.
    pub async fn recent(&self, limit: i64, source: Option<TradeSource>) -> DbResult<Vec<Trade>> {
        let rows = match source {
            Some(source) => {
                sqlx::query(
                    "SELECT * FROM trades WHERE source = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
                )
                .bind(source.as_str())
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM trades ORDER BY timestamp DESC, id DESC LIMIT ?1")
                    .bind(limit)
                    .fetch_all(self.pool)
                    .await?
            }
        };
        rows.iter().map(trade_from_row).collect()
    }

    /// Every trade, oldest first.
    pub async fn all(&self) -> DbResult<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY timestamp ASC, id ASC")
            .fetch_all(self.pool)
            .await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// Number of trades from `source` at or after `since`.
    pub async fn count_since(&self, source: TradeSource, since: DateTime<Utc>) -> DbResult<u32> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trades WHERE source = ?1 AND timestamp >= ?2")
                .bind(source.as_str())
                .bind(to_millis(since))
                .fetch_one(self.pool)
                .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

async fn insert_trade<'e, E>(executor: E, trade: &Trade) -> DbResult<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        r#"INSERT INTO trades
            (timestamp, asset, side, quantity, price, notional, fee, source, decision_id, note)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
    )
    .bind(to_millis(trade.timestamp))
    .bind(trade.asset.as_str())
    .bind(trade.side.as_str())
    .bind(trade.quantity.to_string())
    .bind(trade.price.to_string())
    .bind(trade.notional.to_string())
    .bind(trade.fee.to_string())
    .bind(trade.source.as_str())
    .bind(trade.decision_id)
    .bind(&trade.note)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

fn trade_from_row(row: &SqliteRow) -> DbResult<Trade> {
    Ok(Trade {
        id: row.try_get("id")?,
        timestamp: get_ts(row, "timestamp")?,
        asset: get_enum(row, "asset")?,
        side: get_enum(row, "side")?,
        quantity: get_dec(row, "quantity")?,
        price: get_dec(row, "price")?,
        notional: get_dec(row, "notional")?,
        fee: get_dec(row, "fee")?,
        source: get_enum(row, "source")?,
        decision_id: row.try_get("decision_id")?,
        note: row.try_get("note")?,
    })
}
