//! Manual paper trades entered from the dashboard.
//!
//! Filled at the current snapshot price. Only cash and holdings are
//! checked; the agent's daily limit and allocation caps do not apply.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::record_equity;
use crate::config::RiskConfig;
use crate::market::MarketDataSource;
use crate::storage::Database;
use crate::strategy::RiskEngine;
use crate::types::{AgentError, Asset, Portfolio, Trade, TradeSide, TradeSource};

const QTY_DP: u32 = 8;

/// Body of `POST /api/manual-trades`. Exactly one of `quantity` or `usd`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualTradeRequest {
    pub asset: Asset,
    pub side: TradeSide,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub usd: Option<Decimal>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualTradeResult {
    pub trade: Trade,
    pub portfolio: Portfolio,
}

fn too_large() -> AgentError {
    AgentError::InvalidInput("trade size too large".to_string())
}

/// Validate, fill and persist one manual trade.
pub async fn execute_manual(
    db: &Database,
    market: &dyn MarketDataSource,
    limits: &RiskConfig,
    initial_cash: Decimal,
    req: &ManualTradeRequest,
) -> Result<ManualTradeResult> {
    let snapshot = market
        .snapshot()
        .await
        .context("Failed to fetch market snapshot")?;
    let price = snapshot.price(req.asset);
    if price <= Decimal::ZERO {
        return Err(AgentError::MarketData(format!("no {} price", req.asset)).into());
    }

    let quantity = match (req.quantity, req.usd) {
        (Some(q), None) => q,
        (None, Some(usd)) => {
            if usd <= Decimal::ZERO {
                return Err(AgentError::InvalidInput("usd must be positive".to_string()).into());
            }
            usd.checked_div(price).ok_or_else(too_large)?
        }
        _ => {
            return Err(AgentError::InvalidInput(
                "give exactly one of quantity or usd".to_string(),
            )
            .into())
        }
    }
    .round_dp(QTY_DP);
    if quantity <= Decimal::ZERO {
        return Err(AgentError::InvalidInput("quantity must be positive".to_string()).into());
    }

    let portfolio = db
        .portfolio()
        .load_or_init(initial_cash)
        .await
        .context("Failed to load portfolio")?;
    let (notional, fee) =
        RiskEngine::fill_amounts(quantity, price, limits).ok_or_else(too_large)?;

    let mut next = portfolio.clone();
    match req.side {
        TradeSide::Buy => {
            let needed = notional.checked_add(fee).ok_or_else(too_large)?;
            if needed > portfolio.cash_usd {
                return Err(AgentError::InsufficientCash {
                    needed,
                    available: portfolio.cash_usd,
                }
                .into());
            }
            next.cash_usd -= needed;
            next.set_quantity(req.asset, portfolio.quantity(req.asset) + quantity);
        }
        TradeSide::Sell => {
            let held = portfolio.quantity(req.asset);
            if held <= Decimal::ZERO {
                return Err(AgentError::NoHoldings(req.asset).into());
            }
            if quantity > held {
                return Err(AgentError::InvalidInput(format!(
                    "sell of {quantity} {} exceeds holdings of {held}",
                    req.asset
                ))
                .into());
            }
            next.cash_usd += notional - fee;
            next.set_quantity(req.asset, held - quantity);
        }
    }
    next.updated_at = Utc::now();

    let mut trade = Trade {
        id: None,
        timestamp: Utc::now(),
        asset: req.asset,
        side: req.side,
        quantity,
        price,
        notional,
        fee,
        source: TradeSource::Manual,
        decision_id: None,
        note: req.note.clone().unwrap_or_else(|| "manual".to_string()),
    };
    trade.id = Some(
        db.trades()
            .record_fill(&trade, &next)
            .await
            .context("Failed to record manual trade")?,
    );
    record_equity(db, &next, &snapshot)
        .await
        .context("Failed to record portfolio snapshot")?;

    info!(%trade, portfolio = %next, "Manual trade executed");
    Ok(ManualTradeResult {
        trade,
        portfolio: next,
    })
}
