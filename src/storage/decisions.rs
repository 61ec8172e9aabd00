//! Decision log repository.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{get_dec, get_enum, get_opt_enum, get_ts, to_millis, DbError, DbResult};
use crate::types::DecisionLog;

pub struct DecisionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DecisionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, d: &DecisionLog) -> DbResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO decision_logs
                (timestamp, run_id, model, status, action, asset, size_usd, confidence,
                 rationale, approved, risk_reason, error, btc_price, eth_price,
                 exogenous_score, exogenous_bias, trade_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"#,
        )
        .bind(to_millis(d.timestamp))
        .bind(&d.run_id)
        .bind(&d.model)
        .bind(d.status.as_str())
        .bind(d.action.as_str())
        .bind(d.asset.map(|a| a.as_str()))
        .bind(d.size_usd.to_string())
        .bind(d.confidence.to_string())
        .bind(&d.rationale)
        .bind(d.approved)
        .bind(&d.risk_reason)
        .bind(&d.error)
        .bind(d.btc_price.to_string())
        .bind(d.eth_price.to_string())
        .bind(d.exogenous_score.to_string())
        .bind(d.exogenous_bias.as_str())
        .bind(d.trade_id)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Link an executed trade to its decision.
    pub async fn set_trade(&self, decision_id: i64, trade_id: i64) -> DbResult<()> {
        sqlx::query("UPDATE decision_logs SET trade_id = ?1 WHERE id = ?2")
            .bind(trade_id)
            .bind(decision_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> DbResult<DecisionLog> {
        let row = sqlx::query("SELECT * FROM decision_logs WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("decision {id}")))?;
        decision_from_row(&row)
    }

    /// Newest first.
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<DecisionLog>> {
        let rows =
            sqlx::query("SELECT * FROM decision_logs ORDER BY timestamp DESC, id DESC LIMIT ?1")
                .bind(limit)
                .fetch_all(self.pool)
                .await?;
        rows.iter().map(decision_from_row).collect()
    }
}

fn decision_from_row(row: &SqliteRow) -> DbResult<DecisionLog> {
    Ok(DecisionLog {
        id: row.try_get("id")?,
        timestamp: get_ts(row, "timestamp")?,
        run_id: row.try_get("run_id")?,
        model: row.try_get("model")?,
        status: get_enum(row, "status")?,
        action: get_enum(row, "action")?,
        asset: get_opt_enum(row, "asset")?,
        size_usd: get_dec(row, "size_usd")?,
        confidence: get_dec(row, "confidence")?,
        rationale: row.try_get("rationale")?,
        approved: row.try_get("approved")?,
        risk_reason: row.try_get("risk_reason")?,
        error: row.try_get("error")?,
        btc_price: get_dec(row, "btc_price")?,
        eth_price: get_dec(row, "eth_price")?,
        exogenous_score: get_dec(row, "exogenous_score")?,
        exogenous_bias: get_enum(row, "exogenous_bias")?,
        trade_id: row.try_get("trade_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::types::{Asset, Bias, DecisionStatus, SuggestedAction};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn decision(status: DecisionStatus) -> DecisionLog {
        DecisionLog {
            id: None,
            timestamp: Utc::now(),
            run_id: "run-1".to_string(),
            model: "test-model".to_string(),
            status,
            action: SuggestedAction::Buy,
            asset: Some(Asset::Eth),
            size_usd: dec!(500),
            confidence: dec!(0.7),
            rationale: "momentum".to_string(),
            approved: true,
            risk_reason: "approved".to_string(),
            error: None,
            btc_price: dec!(60000),
            eth_price: dec!(3000),
            exogenous_score: dec!(-0.25),
            exogenous_bias: Bias::RiskOff,
            trade_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_get_and_link_trade() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.decisions();
        let id = repo.insert(&decision(DecisionStatus::Ok)).await.unwrap();
        repo.set_trade(id, 42).await.unwrap();

        let d = repo.get(id).await.unwrap();
        assert_eq!(d.trade_id, Some(42));
        assert_eq!(d.asset, Some(Asset::Eth));
        assert_eq!(d.exogenous_bias, Bias::RiskOff);
        assert_eq!(d.exogenous_score, dec!(-0.25));
        assert!(d.approved);
    }

    #[tokio::test]
    async fn test_failed_decision_keeps_error() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.decisions();
        let mut d = decision(DecisionStatus::Failed);
        d.asset = None;
        d.approved = false;
        d.error = Some("LLM error (m): timeout".to_string());
        let id = repo.insert(&d).await.unwrap();

        let loaded = repo.get(id).await.unwrap();
        assert_eq!(loaded.status, DecisionStatus::Failed);
        assert!(loaded.asset.is_none());
        assert_eq!(loaded.error.as_deref(), Some("LLM error (m): timeout"));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let db = Database::in_memory().await.unwrap();
        assert!(matches!(db.decisions().get(99).await, Err(DbError::NotFound(_))));
    }
}
