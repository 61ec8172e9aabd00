//! Persistence layer.
//!
//! SQLite via sqlx. Decimals are stored as TEXT so `rust_decimal` values
//! round-trip exactly; timestamps are INTEGER unix milliseconds. Each
//! repository borrows the pool and maps rows to the domain types.

pub mod backtest;
pub mod decisions;
pub mod exogenous;
pub mod market;
pub mod portfolio;
pub mod schema;
pub mod trades;

pub use backtest::BacktestRepository;
pub use decisions::DecisionRepository;
pub use exogenous::ExogenousRepository;
pub use market::MarketRepository;
pub use portfolio::PortfolioRepository;
pub use trades::TradeRepository;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
pub use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        db.configure_pragmas().await?;

        info!(path = %path.display(), "Database ready");
        Ok(db)
    }

    /// In-memory database (for testing).
    pub async fn in_memory() -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        db.configure_pragmas().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> DbResult<()> {
        for statement in schema::CREATE_TABLES.split(';') {
            let sql: String = statement
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");
            let sql = sql.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Migration(format!("{e}: {sql}")))?;
        }
        Ok(())
    }

    async fn configure_pragmas(&self) -> DbResult<()> {
        for pragma in [
            "PRAGMA journal_mode=WAL",
            "PRAGMA synchronous=NORMAL",
            "PRAGMA foreign_keys=ON",
        ] {
            sqlx::query(pragma)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Connection(format!("{pragma} failed: {e}")))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn portfolio(&self) -> PortfolioRepository<'_> {
        PortfolioRepository::new(&self.pool)
    }

    pub fn trades(&self) -> TradeRepository<'_> {
        TradeRepository::new(&self.pool)
    }

    pub fn decisions(&self) -> DecisionRepository<'_> {
        DecisionRepository::new(&self.pool)
    }

    pub fn exogenous(&self) -> ExogenousRepository<'_> {
        ExogenousRepository::new(&self.pool)
    }

    pub fn market(&self) -> MarketRepository<'_> {
        MarketRepository::new(&self.pool)
    }

    pub fn backtests(&self) -> BacktestRepository<'_> {
        BacktestRepository::new(&self.pool)
    }
}

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn get_ts(row: &SqliteRow, col: &str) -> DbResult<DateTime<Utc>> {
    let ms: i64 = row.try_get(col)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::Decode(format!("{col}: timestamp {ms} out of range")))
}

pub(crate) fn get_opt_ts(row: &SqliteRow, col: &str) -> DbResult<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.try_get(col)?;
    ms.map(|ms| {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| DbError::Decode(format!("{col}: timestamp {ms} out of range")))
    })
    .transpose()
}

pub(crate) fn get_dec(row: &SqliteRow, col: &str) -> DbResult<Decimal> {
    let s: String = row.try_get(col)?;
    Decimal::from_str(&s).map_err(|e| DbError::Decode(format!("{col}: {e} ({s})")))
}

pub(crate) fn get_opt_dec(row: &SqliteRow, col: &str) -> DbResult<Option<Decimal>> {
    let s: Option<String> = row.try_get(col)?;
    s.map(|s| Decimal::from_str(&s).map_err(|e| DbError::Decode(format!("{col}: {e} ({s})"))))
        .transpose()
}

/// Parse a string-backed enum column.
pub(crate) fn get_enum<T: FromStr>(row: &SqliteRow, col: &str) -> DbResult<T>
where
    T::Err: std::fmt::Display,
{
    let s: String = row.try_get(col)?;
    s.parse::<T>()
        .map_err(|e| DbError::Decode(format!("{col}: {e}")))
}

pub(crate) fn get_opt_enum<T: FromStr>(row: &SqliteRow, col: &str) -> DbResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let s: Option<String> = row.try_get(col)?;
    s.map(|s| s.parse::<T>().map_err(|e| DbError::Decode(format!("{col}: {e}"))))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_schema_applies() {
        let db = Database::in_memory().await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let names: Vec<String> = tables.into_iter().map(|(n,)| n).collect();
        for expected in [
            "backtest_runs",
            "decision_logs",
            "exogenous_items",
            "hourly_candles",
            "narratives",
            "portfolio",
            "strategy_signals",
            "trades",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_migrations_are_rerunnable() {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
    }

    #[test]
    fn test_millis_round_trip() {
        let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        assert_eq!(DateTime::from_timestamp_millis(to_millis(now)).unwrap(), now);
    }
}
