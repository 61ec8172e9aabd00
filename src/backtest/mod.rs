//! Strategy backtesting over stored hourly candles.
//!
//! A run replays one asset's candles and a rule-based signal through the
//! same `RiskEngine` the live agent uses, with a fixed notional per buy,
//! and persists every step, fill and summary metric.

pub mod runner;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{string_enum, Asset, SuggestedAction, TradeSide};

pub use runner::{run_backtest, Backtester, Simulation};

/// Metric names written for every completed run.
pub mod metrics {
    pub const FINAL_VALUE: &str = "final_value";
    pub const TOTAL_RETURN_PCT: &str = "total_return_pct";
    pub const MAX_DRAWDOWN_PCT: &str = "max_drawdown_pct";
    pub const TRADE_COUNT: &str = "trade_count";
    pub const TOTAL_FEES: &str = "total_fees";
    pub const SHARPE: &str = "sharpe";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BacktestStatus {
    Running,
    Completed,
    Failed,
}

string_enum!(BacktestStatus {
    Running => "RUNNING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

/// Body of `POST /api/backtests`. Omitted fields fall back to config.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    pub asset: Asset,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub initial_cash_usd: Option<Decimal>,
    #[serde(default)]
    pub trade_size_usd: Option<Decimal>,
    /// How many of the most recent hourly candles to replay.
    #[serde(default)]
    pub hours: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub asset: Asset,
    pub strategy: String,
    pub status: BacktestStatus,
    pub initial_cash: Decimal,
    pub final_value: Option<Decimal>,
    pub params: serde_json::Value,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestStep {
    pub step: i64,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub signal: SuggestedAction,
    pub cash: Decimal,
    pub qty: Decimal,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestTrade {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestMetric {
    pub name: String,
    pub value: Decimal,
}

/// A run with everything it produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub run: BacktestRun,
    pub metrics: Vec<BacktestMetric>,
    pub trades: Vec<BacktestTrade>,
    pub steps: Vec<BacktestStep>,
}

impl BacktestReport {
    pub fn metric(&self, name: &str) -> Option<Decimal> {
        self.metrics.iter().find(|m| m.name == name).map(|m| m.value)
    }
}
