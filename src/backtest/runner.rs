//! Backtest runner.
//!
//! `Backtester::simulate` is pure; `run_backtest` loads candles and signals
//! from storage, runs the simulation and persists the results.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::info;

use super::{
    metrics, BacktestMetric, BacktestReport, BacktestRequest, BacktestRun, BacktestStatus,
    BacktestStep, BacktestTrade,
};
use crate::config::{BacktestConfig, RiskConfig};
use crate::market::{pct_change, HourlyCandle};
use crate::storage::Database;
use crate::strategy::features::{self, MOMENTUM_24H, SMA_CROSSOVER};
use crate::strategy::{PortfolioValuationService, RiskEngine};
use crate::types::{AgentError, Asset, MarketSnapshot, Portfolio, SuggestedAction, TradeSuggestion};

/// Candles in the 7-day lookback used for the rally cap.
const WEEK_HOURS: usize = 168;
/// Hourly steps per year, for annualising the Sharpe ratio.
const HOURS_PER_YEAR: f64 = 24.0 * 365.0;

/// Result of one simulation.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub steps: Vec<BacktestStep>,
    pub trades: Vec<BacktestTrade>,
    pub metrics: Vec<BacktestMetric>,
    pub final_value: Decimal,
}

pub struct Backtester {
    risk: RiskConfig,
}

impl Backtester {
    pub fn new(risk: RiskConfig) -> Self {
        Self { risk }
    }

    /// Replay `candles` (one asset) against `signals` keyed by candle open
    /// time. Missing signals count as HOLD. Buys use `trade_size`; sells
    /// close the whole position.
    pub fn simulate(
        &self,
        asset: Asset,
        candles: &[HourlyCandle],
        signals: &HashMap<DateTime<Utc>, SuggestedAction>,
        initial_cash: Decimal,
        trade_size: Decimal,
    ) -> Simulation {
        let mut sorted: Vec<&HourlyCandle> = candles.iter().collect();
        sorted.sort_by_key(|c| c.open_time);

        let mut portfolio = Portfolio::new(initial_cash);
        let mut steps = Vec::with_capacity(sorted.len());
        let mut trades = Vec::new();
        let mut day: Option<NaiveDate> = None;
        let mut trades_today = 0u32;
        let mut total_fees = Decimal::ZERO;
        let mut peak = initial_cash;
        let mut max_dd = Decimal::ZERO;

        for (i, candle) in sorted.iter().enumerate() {
            let date = candle.open_time.date_naive();
            if day != Some(date) {
                day = Some(date);
                trades_today = 0;
            }

            let change_7d = if i >= WEEK_HOURS {
                pct_change(sorted[i - WEEK_HOURS].close, candle.close)
            } else {
                Decimal::ZERO
            };
            let snapshot = snapshot_for(asset, candle, change_7d);
            let signal = signals
                .get(&candle.open_time)
                .copied()
                .unwrap_or(SuggestedAction::Hold);

            if signal.side().is_some() {
                let size_usd = match signal {
                    SuggestedAction::Buy => trade_size,
                    _ => (portfolio.quantity(asset) * candle.close).round_dp(2),
                };
                let suggestion = TradeSuggestion {
                    action: signal,
                    asset: Some(asset),
                    size_usd,
                    confidence: Decimal::ONE,
                    rationale: "backtest signal".to_string(),
                };
                let outcome =
                    RiskEngine::apply(&suggestion, &portfolio, &snapshot, trades_today, &self.risk);
                if let Some(fill) = outcome.trade {
                    trades_today += 1;
                    total_fees += fill.fee;
                    portfolio = outcome.portfolio;
                    trades.push(BacktestTrade {
                        id: None,
                        timestamp: candle.open_time,
                        side: fill.side,
                        quantity: fill.quantity,
                        price: fill.price,
                        fee: fill.fee,
                    });
                }
            }

            let value = PortfolioValuationService::value(&portfolio, &snapshot).total;
            if value > peak {
                peak = value;
            }
            if peak > Decimal::ZERO {
                max_dd = max_dd.max((peak - value) / peak);
            }

            steps.push(BacktestStep {
                step: i as i64,
                timestamp: candle.open_time,
                price: candle.close,
                signal,
                cash: portfolio.cash_usd,
                qty: portfolio.quantity(asset),
                total_value: value.round_dp(2),
            });
        }

        let final_value = steps
            .last()
            .map(|s| s.total_value)
            .unwrap_or(initial_cash);
        let values: Vec<Decimal> = steps.iter().map(|s| s.total_value).collect();

        let metrics = vec![
            metric(metrics::FINAL_VALUE, final_value),
            metric(metrics::TOTAL_RETURN_PCT, pct_change(initial_cash, final_value)),
            metric(metrics::MAX_DRAWDOWN_PCT, (max_dd * dec!(100)).round_dp(4)),
            metric(metrics::TRADE_COUNT, Decimal::from(trades.len())),
            metric(metrics::TOTAL_FEES, total_fees.round_dp(4)),
            metric(metrics::SHARPE, compute_sharpe(&values)),
        ];

        Simulation {
            steps,
            trades,
            metrics,
            final_value,
        }
    }
}

fn metric(name: &str, value: Decimal) -> BacktestMetric {
    BacktestMetric {
        name: name.to_string(),
        value,
    }
}

fn snapshot_for(asset: Asset, candle: &HourlyCandle, change_7d: Decimal) -> MarketSnapshot {
    let mut snapshot = MarketSnapshot {
        timestamp: candle.open_time,
        btc_price: Decimal::ZERO,
        eth_price: Decimal::ZERO,
        btc_change_7d_pct: Decimal::ZERO,
        eth_change_7d_pct: Decimal::ZERO,
    };
    match asset {
        Asset::Btc => {
            snapshot.btc_price = candle.close;
            snapshot.btc_change_7d_pct = change_7d;
        }
        Asset::Eth => {
            snapshot.eth_price = candle.close;
            snapshot.eth_change_7d_pct = change_7d;
        }
    }
    snapshot
}

/// Annualised Sharpe ratio of step-to-step equity returns.
fn compute_sharpe(values: &[Decimal]) -> Decimal {
    let returns: Vec<f64> = values
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].to_f64()?;
            let next = w[1].to_f64()?;
            (prev > 0.0).then(|| next / prev - 1.0)
        })
        .collect();
    if returns.len() < 2 {
        return Decimal::ZERO;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev < 1e-12 {
        return Decimal::ZERO;
    }

    Decimal::from_f64(mean / std_dev * HOURS_PER_YEAR.sqrt())
        .unwrap_or(Decimal::ZERO)
        .round_dp(4)
}

// ---------------------------------------------------------------------------
// Stored runs
// ---------------------------------------------------------------------------

/// Run a backtest over stored candles and persist it.
///
/// Signals come from the `strategy_signals` table when the market worker
/// has produced them, otherwise they are computed from the candles.
pub async fn run_backtest(
    db: &Database,
    risk: &RiskConfig,
    defaults: &BacktestConfig,
    req: &BacktestRequest,
) -> Result<BacktestReport> {
    let strategy = req
        .strategy
        .clone()
        .unwrap_or_else(|| SMA_CROSSOVER.to_string());
    if strategy != SMA_CROSSOVER && strategy != MOMENTUM_24H {
        return Err(AgentError::InvalidInput(format!("unknown strategy: {strategy}")).into());
    }
    let initial_cash = req.initial_cash_usd.unwrap_or(defaults.initial_cash_usd);
    let trade_size = req.trade_size_usd.unwrap_or(defaults.trade_size_usd);
    let hours = req.hours.unwrap_or(defaults.default_hours);
    if initial_cash <= Decimal::ZERO || trade_size <= Decimal::ZERO || hours <= 0 {
        return Err(AgentError::InvalidInput(
            "initial cash, trade size and hours must be positive".to_string(),
        )
        .into());
    }

    let candles = db.market().candles(req.asset, hours).await?;
    if candles.is_empty() {
        return Err(AgentError::InvalidInput(format!(
            "no stored candles for {}; run the market-data worker first",
            req.asset
        ))
        .into());
    }

    let stored = db.market().signals(req.asset, &strategy).await?;
    let signal_rows = if stored.is_empty() {
        features::generate_signals(&features::compute_features(&candles))
            .into_iter()
            .filter(|s| s.strategy == strategy)
            .collect()
    } else {
        stored
    };
    let signals: HashMap<DateTime<Utc>, SuggestedAction> = signal_rows
        .into_iter()
        .map(|s| (s.open_time, s.signal))
        .collect();

    let run = BacktestRun {
        id: uuid::Uuid::new_v4().to_string(),
        started_at: Utc::now(),
        finished_at: None,
        asset: req.asset,
        strategy: strategy.clone(),
        status: BacktestStatus::Running,
        initial_cash,
        final_value: None,
        params: serde_json::json!({
            "tradeSizeUsd": trade_size,
            "hours": hours,
            "maxTradesPerDay": risk.max_trades_per_day,
            "feeBps": risk.fee_bps,
        }),
        error: None,
    };
    let repo = db.backtests();
    repo.insert_run(&run).await.context("Failed to create backtest run")?;

    let sim = Backtester::new(risk.clone()).simulate(
        req.asset,
        &candles,
        &signals,
        initial_cash,
        trade_size,
    );

    repo.insert_steps(&run.id, &sim.steps).await?;
    repo.insert_trades(&run.id, &sim.trades).await?;
    repo.upsert_metrics(&run.id, &sim.metrics).await?;
    repo.finish_run(&run.id, BacktestStatus::Completed, Some(sim.final_value), None)
        .await?;

    info!(
        run_id = %run.id,
        asset = %req.asset,
        strategy = %strategy,
        steps = sim.steps.len(),
        trades = sim.trades.len(),
        final_value = %format!("${:.2}", sim.final_value),
        "Backtest complete"
    );

    Ok(repo.report(&run.id).await?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
