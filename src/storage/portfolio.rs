//! Portfolio repository: the singleton row plus equity snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;

use super::{get_dec, get_ts, to_millis, DbResult};
use crate::types::{Portfolio, PortfolioSnapshot};

pub struct PortfolioRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PortfolioRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the portfolio, seeding it with `initial_cash` on first use.
    pub async fn load_or_init(&self, initial_cash: Decimal) -> DbResult<Portfolio> {
        sqlx::query(
            "INSERT OR IGNORE INTO portfolio (id, cash_usd, btc_qty, eth_qty, updated_at)
             VALUES (1, ?1, '0', '0', ?2)",
        )
        .bind(initial_cash.to_string())
        .bind(to_millis(Utc::now()))
        .execute(self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM portfolio WHERE id = 1")
            .fetch_one(self.pool)
            .await?;
        Ok(Portfolio {
            cash_usd: get_dec(&row, "cash_usd")?,
            btc_qty: get_dec(&row, "btc_qty")?,
            eth_qty: get_dec(&row, "eth_qty")?,
            updated_at: get_ts(&row, "updated_at")?,
        })
    }

    pub async fn save(&self, portfolio: &Portfolio) -> DbResult<()> {
        save_portfolio(self.pool, portfolio).await
    }

    pub async fn insert_snapshot(&self, snap: &PortfolioSnapshot) -> DbResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO portfolio_snapshots
                (timestamp, cash_usd, btc_qty, eth_qty, btc_price, eth_price, total_value)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        )
        .bind(to_millis(snap.timestamp))
        .bind(snap.cash_usd.to_string())
        .bind(snap.btc_qty.to_string())
        .bind(snap.eth_qty.to_string())
        .bind(snap.btc_price.to_string())
        .bind(snap.eth_price.to_string())
        .bind(snap.total_value.to_string())
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Snapshots at or after `since`, oldest first.
    pub async fn snapshots_since(&self, since: DateTime<Utc>) -> DbResult<Vec<PortfolioSnapshot>> {
        self.snapshots_from_millis(to_millis(since)).await
    }

    /// Every snapshot, oldest first.
    pub async fn all_snapshots(&self) -> DbResult<Vec<PortfolioSnapshot>> {
        self.snapshots_from_millis(i64::MIN).await
    }

    async fn snapshots_from_millis(&self, since_ms: i64) -> DbResult<Vec<PortfolioSnapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM portfolio_snapshots WHERE timestamp >= ?1 ORDER BY timestamp ASC, id ASC",
        )
        .bind(since_ms)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }
}

/// Shared by the trade repository so a fill and its portfolio update can
/// share a transaction.
pub(crate) async fn save_portfolio<'e, E>(executor: E, portfolio: &Portfolio) -> DbResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO portfolio (id, cash_usd, btc_qty, eth_qty, updated_at)
           VALUES (1, ?1, ?2, ?3, ?4)
           ON CONFLICT(id) DO UPDATE SET
             cash_usd = excluded.cash_usd,
             btc_qty = excluded.btc_qty,
             eth_qty = excluded.eth_qty,
             updated_at = excluded.updated_at"#,
    )
    .bind(portfolio.cash_usd.to_string())
    .bind(portfolio.btc_qty.to_string())
    .bind(portfolio.eth_qty.to_string())
    .bind(to_millis(portfolio.updated_at))
    .execute(executor)
    .await?;
    Ok(())
}

fn snapshot_from_row(row: &SqliteRow) -> DbResult<PortfolioSnapshot> {
    use sqlx::Row;
    Ok(PortfolioSnapshot {
        id: row.try_get("id")?,
        timestamp: get_ts(row, "timestamp")?,
        cash_usd: get_dec(row, "cash_usd")?,
        btc_qty: get_dec(row, "btc_qty")?,
        eth_qty: get_dec(row, "eth_qty")?,
        btc_price: get_dec(row, "btc_price")?,
        eth_price: get_dec(row, "eth_price")?,
        total_value: get_dec(row, "total_value")?,
    })
}
