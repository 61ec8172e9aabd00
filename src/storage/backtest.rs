//! Backtest runs, steps, fills and metrics.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{get_dec, get_enum, get_opt_dec, get_opt_ts, get_ts, to_millis, DbError, DbResult};
use crate::backtest::{
    BacktestMetric, BacktestReport, BacktestRun, BacktestStatus, BacktestStep, BacktestTrade,
};

pub struct BacktestRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BacktestRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_run(&self, run: &BacktestRun) -> DbResult<()> {
        sqlx::query(
            r#"INSERT INTO backtest_runs
                (id, started_at, finished_at, asset, strategy, status, initial_cash,
                 final_value, params, error)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
        )
        .bind(&run.id)
        .bind(to_millis(run.started_at))
        .bind(run.finished_at.map(to_millis))
        .bind(run.asset.as_str())
        .bind(&run.strategy)
        .bind(run.status.as_str())
        .bind(run.initial_cash.to_string())
        .bind(run.final_value.map(|v| v.to_string()))
        .bind(run.params.to_string())
        .bind(&run.error)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish_run(
        &self,
        id: &str,
        status: BacktestStatus,
        final_value: Option<Decimal>,
        error: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE backtest_runs SET status = ?1, final_value = ?2, error = ?3, finished_at = ?4
             WHERE id = ?5",
        )
        .bind(status.as_str())
        .bind(final_value.map(|v| v.to_string()))
        .bind(error)
        .bind(to_millis(Utc::now()))
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Upsert by (run_id, step).
    pub async fn insert_steps(&self, run_id: &str, steps: &[BacktestStep]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        for s in steps {
            sqlx::query(
                r#"INSERT INTO backtest_steps
                    (run_id, step, timestamp, price, signal, cash, qty, total_value)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                   ON CONFLICT(run_id, step) DO UPDATE SET
                     timestamp = excluded.timestamp,
                     price = excluded.price,
                     signal = excluded.signal,
                     cash = excluded.cash,
                     qty = excluded.qty,
                     total_value = excluded.total_value"#,
            )
            .bind(run_id)
            .bind(s.step)
            .bind(to_millis(s.timestamp))
            .bind(s.price.to_string())
            .bind(s.signal.as_str())
            .bind(s.cash.to_string())
            .bind(s.qty.to_string())
            .bind(s.total_value.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_trades(&self, run_id: &str, trades: &[BacktestTrade]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        for t in trades {
            sqlx::query(
                r#"INSERT INTO backtest_trades (run_id, timestamp, side, quantity, price, fee)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            )
            .bind(run_id)
            .bind(to_millis(t.timestamp))
            .bind(t.side.as_str())
            .bind(t.quantity.to_string())
            .bind(t.price.to_string())
            .bind(t.fee.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Upsert by (run_id, name).
    pub async fn upsert_metrics(&self, run_id: &str, metrics: &[BacktestMetric]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        for m in metrics {
            sqlx::query(
                r#"INSERT INTO backtest_metrics (run_id, name, value) VALUES (?1, ?2, ?3)
                   ON CONFLICT(run_id, name) DO UPDATE SET value = excluded.value"#,
            )
            .bind(run_id)
            .bind(&m.name)
            .bind(m.value.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_run(&self, id: &str) -> DbResult<BacktestRun> {
        let row = sqlx::query("SELECT * FROM backtest_runs WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("backtest {id}")))?;
        run_from_row(&row)
    }

    /// Run plus steps, fills and metrics.
    pub async fn report(&self, id: &str) -> DbResult<BacktestReport> {
        let run = self.get_run(id).await?;

        let steps = sqlx::query("SELECT * FROM backtest_steps WHERE run_id = ?1 ORDER BY step")
            .bind(id)
            .fetch_all(self.pool)
            .await?
            .iter()
            .map(step_from_row)
            .collect::<DbResult<Vec<_>>>()?;

        let trades = sqlx::query("SELECT * FROM backtest_trades WHERE run_id = ?1 ORDER BY timestamp, id")
            .bind(id)
            .fetch_all(self.pool)
            .await?
            .iter()
            .map(trade_from_row)
            .collect::<DbResult<Vec<_>>>()?;

        let metrics = sqlx::query("SELECT * FROM backtest_metrics WHERE run_id = ?1 ORDER BY name")
            .bind(id)
            .fetch_all(self.pool)
            .await?
            .iter()
            .map(|row| -> DbResult<BacktestMetric> {
                Ok(BacktestMetric {
                    name: row.try_get("name")?,
                    value: get_dec(row, "value")?,
                })
            })
            .collect::<DbResult<Vec<_>>>()?;

        Ok(BacktestReport {
            run,
            metrics,
            trades,
            steps,
        })
    }
}

fn run_from_row(row: &SqliteRow) -> DbResult<BacktestRun> {
    let params: String = row.try_get("params")?;
    Ok(BacktestRun {
        id: row.try_get("id")?,
        started_at: get_ts(row, "started_at")?,
        finished_at: get_opt_ts(row, "finished_at")?,
        asset: get_enum(row, "asset")?,
        strategy: row.try_get("strategy")?,
        status: get_enum(row, "status")?,
        initial_cash: get_dec(row, "initial_cash")?,
        final_value: get_opt_dec(row, "final_value")?,
        params: serde_json::from_str(&params)
            .map_err(|e| DbError::Decode(format!("params: {e}")))?,
        error: row.try_get("error")?,
    })
}

fn step_from_row(row: &SqliteRow) -> DbResult<BacktestStep> {
    Ok(BacktestStep {
        step: row.try_get("step")?,
        timestamp: get_ts(row, "timestamp")?,
        price: get_dec(row, "price")?,
        signal: get_enum(row, "signal")?,
        cash: get_dec(row, "cash")?,
        qty: get_dec(row, "qty")?,
        total_value: get_dec(row, "total_value")?,
    })
}

fn trade_from_row(row: &SqliteRow) -> DbResult<BacktestTrade> {
    Ok(BacktestTrade {
        id: row.try_get("id")?,
        timestamp: get_ts(row, "timestamp")?,
        side: get_enum(row, "side")?,
        quantity: get_dec(row, "quantity")?,
        price: get_dec(row, "price")?,
        fee: get_dec(row, "fee")?,
    })
}
