//! Portfolio valuation.
//!
//! Marks the paper portfolio to market and reports per-asset allocation.
//! Used by the risk engine (allocation caps), the dashboard, and the
//! equity snapshots behind monthly performance.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::types::{Asset, MarketSnapshot, Portfolio, Trade, TradeSide};

/// Mark-to-market view of a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Valuation {
    pub cash: Decimal,
    pub btc_value: Decimal,
    pub eth_value: Decimal,
    pub total: Decimal,
    /// Fractions of `total` (0–1). All zero when `total` is zero.
    pub btc_alloc: Decimal,
    pub eth_alloc: Decimal,
    pub cash_alloc: Decimal,
}

/// Average-cost position summary for one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPnl {
    pub asset: Asset,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

pub struct PortfolioValuationService;

impl PortfolioValuationService {
    /// Value a portfolio at snapshot prices.
    pub fn value(portfolio: &Portfolio, snapshot: &MarketSnapshot) -> Valuation {
        let btc_value = portfolio.btc_qty * snapshot.btc_price;
        let eth_value = portfolio.eth_qty * snapshot.eth_price;
        let total = portfolio.cash_usd + btc_value + eth_value;

        let frac = |v: Decimal| {
            if total.is_zero() {
                Decimal::ZERO
            } else {
                v / total
            }
        };

        Valuation {
            cash: portfolio.cash_usd,
            btc_value,
            eth_value,
            total,
            btc_alloc: frac(btc_value),
            eth_alloc: frac(eth_value),
            cash_alloc: frac(portfolio.cash_usd),
        }
    }

    /// Valuation of the portfolio as it would be after a fill of `qty`
    /// at the snapshot price, paying `fee` in cash.
    pub fn value_after(
        portfolio: &Portfolio,
        snapshot: &MarketSnapshot,
        asset: Asset,
        side: TradeSide,
        qty: Decimal,
        fee: Decimal,
    ) -> Valuation {
        let mut next = portfolio.clone();
        let notional = qty * snapshot.price(asset);
        match side {
            TradeSide::Buy => {
                next.cash_usd -= notional + fee;
                next.set_quantity(asset, portfolio.quantity(asset) + qty);
            }
            TradeSide::Sell => {
                next.cash_usd += notional - fee;
                next.set_quantity(asset, portfolio.quantity(asset) - qty);
            }
        }
        Self::value(&next, snapshot)
    }

    /// Average-cost PnL per asset, replaying trades in time order.
    ///
    /// Fees are folded into cost basis on buys and subtracted from
    /// proceeds on sells.
    pub fn position_pnl(trades: &[Trade], snapshot: &MarketSnapshot) -> Vec<PositionPnl> {
        let mut ordered: Vec<&Trade> = trades.iter().collect();
        ordered.sort_by_key(|t| t.timestamp);

        // asset -> (qty, cost basis, realized)
        let mut books: HashMap<Asset, (Decimal, Decimal, Decimal)> = HashMap::new();

        for t in ordered {
            let (qty, cost, realized) = books
                .entry(t.asset)
                .or_insert((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));
            match t.side {
                TradeSide::Buy => {
                    *qty += t.quantity;
                    *cost += t.notional + t.fee;
                }
                TradeSide::Sell => {
                    if qty.is_zero() {
                        continue;
                    }
                    let sold = t.quantity.min(*qty);
                    let avg = *cost / *qty;
                    let basis = avg * sold;
                    *realized += sold * t.price - t.fee - basis;
                    *cost -= basis;
                    *qty -= sold;
                }
            }
        }

        Asset::ALL
            .iter()
            .map(|&asset| {
                let (qty, cost, realized) = books
                    .get(&asset)
                    .copied()
                    .unwrap_or((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));
                let market_value = qty * snapshot.price(asset);
                let avg_cost = if qty.is_zero() { Decimal::ZERO } else { cost / qty };
                PositionPnl {
                    asset,
                    quantity: qty,
                    avg_cost: avg_cost.round_dp(2),
                    market_value: market_value.round_dp(2),
                    unrealized_pnl: (market_value - cost).round_dp(2),
                    realized_pnl: realized.round_dp(2),
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
