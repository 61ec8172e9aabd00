//! Dashboard API route handlers.
//!
//! All endpoints return camelCase JSON. Decimals serialize as numbers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ApiError, ApiJson, AppState};
use crate::backtest::{run_backtest, BacktestReport, BacktestRequest};
use crate::engine::{monthly, ManualTradeRequest, ManualTradeResult, MonthlyPerformance};
use crate::exogenous::{ExogenousItem, ExogenousModifiers, Narrative, RefreshReport};
use crate::strategy::valuation::PositionPnl;
use crate::strategy::{PortfolioValuationService, Valuation};
use crate::types::{
    DecisionLog, MarketSnapshot, Portfolio, PortfolioSnapshot, Trade, TradeSource,
};

type ApiResult<T> = Result<Json<T>, ApiError>;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;
/// Rows of each kind embedded in the dashboard payload.
const DASHBOARD_ROWS: i64 = 20;
/// Equity history window shown on the dashboard.
const EQUITY_DAYS: i64 = 90;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    fn get(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub generated_at: DateTime<Utc>,
    pub portfolio: Portfolio,
    /// None when no prices are available at all.
    pub valuation: Option<Valuation>,
    pub market: Option<MarketSnapshot>,
    pub market_error: Option<String>,
    pub positions: Vec<PositionPnl>,
    pub recent_trades: Vec<Trade>,
    pub recent_decisions: Vec<DecisionLog>,
    pub exogenous: ExogenousModifiers,
    pub equity_history: Vec<PortfolioSnapshot>,
    pub llm_enabled: bool,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/dashboard
pub async fn get_dashboard(State(state): State<AppState>) -> ApiResult<DashboardResponse> {
    let db = &state.db;
    let portfolio = db
        .portfolio()
        .load_or_init(state.config.agent.initial_cash_usd)
        .await?;
    let equity_history = db
        .portfolio()
        .snapshots_since(Utc::now() - Duration::days(EQUITY_DAYS))
        .await?;

    let (market, market_error) = match state.market.snapshot().await {
        Ok(s) => (Some(s), None),
        Err(e) => {
            warn!(error = %e, "Live prices unavailable, valuing at last snapshot");
            (None, Some(format!("{e:#}")))
        }
    };

    // Fall back to the prices of the last equity snapshot.
    let pricing = market.clone().or_else(|| {
        equity_history.last().map(|s| MarketSnapshot {
            timestamp: s.timestamp,
            btc_price: s.btc_price,
            eth_price: s.eth_price,
            btc_change_7d_pct: rust_decimal::Decimal::ZERO,
            eth_change_7d_pct: rust_decimal::Decimal::ZERO,
        })
    });
    let valuation = pricing
        .as_ref()
        .map(|s| PortfolioValuationService::value(&portfolio, s));
    let positions = match &pricing {
        Some(s) => PortfolioValuationService::position_pnl(&db.trades().all().await?, s),
        None => Vec::new(),
    };

    let exogenous = state.exogenous.current_modifiers().await?;

    Ok(Json(DashboardResponse {
        generated_at: Utc::now(),
        portfolio,
        valuation,
        market,
        market_error,
        positions,
        recent_trades: db.trades().recent(DASHBOARD_ROWS, None).await?,
        recent_decisions: db.decisions().recent(DASHBOARD_ROWS).await?,
        exogenous,
        equity_history,
        llm_enabled: state.agent.llm_enabled(),
    }))
}

/// POST /api/agent/run-once
pub async fn run_agent_once(State(state): State<AppState>) -> ApiResult<DecisionLog> {
    Ok(Json(state.agent.run_once().await?))
}

/// GET /api/trades?limit=
pub async fn get_trades(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<Trade>> {
    Ok(Json(state.db.trades().recent(q.get(), None).await?))
}

/// GET /api/decisions?limit=
pub async fn get_decisions(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<DecisionLog>> {
    Ok(Json(state.db.decisions().recent(q.get()).await?))
}

/// GET /api/manual-trades?limit=
pub async fn get_manual_trades(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<Trade>> {
    Ok(Json(
        state
            .db
            .trades()
            .recent(q.get(), Some(TradeSource::Manual))
            .await?,
    ))
}

/// POST /api/manual-trades
pub async fn post_manual_trade(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ManualTradeRequest>,
) -> ApiResult<ManualTradeResult> {
    Ok(Json(state.agent.manual_trade(&req).await?))
}

/// GET /api/exogenous/items?limit=
pub async fn get_exogenous_items(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<ExogenousItem>> {
    Ok(Json(state.db.exogenous().recent_items(q.get()).await?))
}

/// GET /api/exogenous/narratives
pub async fn get_narratives(State(state): State<AppState>) -> ApiResult<Vec<Narrative>> {
    Ok(Json(state.db.exogenous().narratives().await?))
}

/// GET /api/exogenous/modifiers
pub async fn get_modifiers(State(state): State<AppState>) -> ApiResult<ExogenousModifiers> {
    Ok(Json(state.exogenous.current_modifiers().await?))
}

/// POST /api/exogenous/refresh. 429 while busy or cooling down.
pub async fn refresh_exogenous(State(state): State<AppState>) -> ApiResult<RefreshReport> {
    let _permit = state.exogenous.gate().try_begin()?;
    Ok(Json(state.exogenous.refresh().await?))
}

/// GET /api/performance/monthly
pub async fn get_monthly_performance(
    State(state): State<AppState>,
) -> ApiResult<Vec<MonthlyPerformance>> {
    let snapshots = state.db.portfolio().all_snapshots().await?;
    let trades = state.db.trades().all().await?;
    Ok(Json(monthly(&snapshots, &trades)))
}

/// POST /api/backtests
pub async fn post_backtest(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BacktestRequest>,
) -> ApiResult<BacktestReport> {
    let report =
        run_backtest(&state.db, &state.config.risk, &state.config.backtest, &req).await?;
    Ok(Json(report))
}

/// GET /api/backtests/:id
pub async fn get_backtest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<BacktestReport> {
    Ok(Json(state.db.backtests().report(&id).await?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
