//! Risk engine.
//!
//! Gates and caps a suggested trade before it is paper-executed:
//! daily trade limit, price sanity, cash availability, a 7-day rally cap
//! on buys, per-asset allocation caps and a minimum cash buffer. Sells are
//! capped to what the portfolio actually holds.
//!
//! `RiskEngine::apply` is pure: it never touches storage or the network,
//! and returns the portfolio as it would be after the trade.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;

use crate::config::RiskConfig;
use crate::strategy::valuation::PortfolioValuationService;
use crate::types::{
    Asset, MarketSnapshot, Portfolio, SuggestedAction, Trade, TradeSide, TradeSource,
    TradeSuggestion,
};

/// Quantity precision (satoshi-level).
const QTY_DP: u32 = 8;
/// USD precision.
const USD_DP: u32 = 2;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Why the engine approved, rejected or capped a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskDecision {
    pub approved: bool,
    pub action: SuggestedAction,
    pub reason: String,
}

impl RiskDecision {
    fn reject(action: SuggestedAction, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            action,
            reason: reason.into(),
        }
    }
}

/// Result of applying the risk rules to a suggestion.
#[derive(Debug, Clone)]
pub struct RiskOutcome {
    pub decision: RiskDecision,
    /// Portfolio after the trade (unchanged when rejected).
    pub portfolio: Portfolio,
    pub trade: Option<Trade>,
}

impl RiskOutcome {
    fn rejected(portfolio: &Portfolio, action: SuggestedAction, reason: impl Into<String>) -> Self {
        let decision = RiskDecision::reject(action, reason);
        debug!(action = %action, reason = %decision.reason, "Suggestion rejected");
        Self {
            decision,
            portfolio: portfolio.clone(),
            trade: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RiskEngine;

impl RiskEngine {
    /// Fee charged on a notional at `fee_bps`. `None` on overflow.
    pub fn fee_for(notional: Decimal, limits: &RiskConfig) -> Option<Decimal> {
        notional
            .checked_mul(limits.fee_bps)
            .map(|v| (v / dec!(10000)).round_dp(4))
    }

    /// Rounded notional and fee for a fill of `qty` at `price`.
    /// `None` when either overflows.
    pub fn fill_amounts(
        qty: Decimal,
        price: Decimal,
        limits: &RiskConfig,
    ) -> Option<(Decimal, Decimal)> {
        let notional = qty.checked_mul(price)?.round_dp(USD_DP);
        let fee = Self::fee_for(notional, limits)?;
        Some((notional, fee))
    }

    /// Apply the risk rules to `suggestion`.
    ///
    /// Rules short-circuit in a fixed order: hold/none, daily limit,
    /// size, price, then the side-specific checks.
    pub fn apply(
        suggestion: &TradeSuggestion,
        portfolio: &Portfolio,
        snapshot: &MarketSnapshot,
        trades_today: u32,
        limits: &RiskConfig,
    ) -> RiskOutcome {
        let action = suggestion.action;

        let side = match action.side() {
            Some(side) => side,
            None => return RiskOutcome::rejected(portfolio, action, "hold: no trade suggested"),
        };

        let asset = match suggestion.asset {
            Some(asset) => asset,
            None => return RiskOutcome::rejected(portfolio, action, "no asset specified"),
        };

        if trades_today >= limits.max_trades_per_day {
            return RiskOutcome::rejected(
                portfolio,
                action,
                format!(
                    "daily trade limit reached ({trades_today}/{})",
                    limits.max_trades_per_day
                ),
            );
        }

        if suggestion.size_usd <= Decimal::ZERO {
            return RiskOutcome::rejected(portfolio, action, "non-positive size");
        }

        let price = snapshot.price(asset);
        if price <= Decimal::ZERO {
            return RiskOutcome::rejected(portfolio, action, format!("invalid {asset} price"));
        }

        match side {
            TradeSide::Buy => Self::apply_buy(suggestion, asset, price, portfolio, snapshot, limits),
            TradeSide::Sell => Self::apply_sell(suggestion, asset, price, portfolio, limits),
        }
    }

    fn apply_buy(
        suggestion: &TradeSuggestion,
        asset: Asset,
        price: Decimal,
        portfolio: &Portfolio,
        snapshot: &MarketSnapshot,
        limits: &RiskConfig,
    ) -> RiskOutcome {
        let action = suggestion.action;
        let mut notes = Vec::new();

        let mut size_usd = suggestion.size_usd.round_dp(USD_DP);
        if limits.max_trade_usd > Decimal::ZERO && size_usd > limits.max_trade_usd {
            notes.push(format!(
                "size capped from ${:.2} to ${:.2}",
                size_usd, limits.max_trade_usd
            ));
            size_usd = limits.max_trade_usd;
        }

        let fee = Self::fee_for(size_usd, limits);
        let needed = match fee.and_then(|f| size_usd.checked_add(f)) {
            Some(needed) => needed,
            None => return RiskOutcome::rejected(portfolio, action, "size too large"),
        };
        if needed > portfolio.cash_usd {
            return RiskOutcome::rejected(
                portfolio,
                action,
                format!(
                    "insufficient cash: need ${:.2}, have ${:.2}",
                    needed, portfolio.cash_usd
                ),
            );
        }

        let change_7d = snapshot.change_7d_pct(asset);
        if change_7d >= limits.rally_cap_pct {
            return RiskOutcome::rejected(
                portfolio,
                action,
                format!(
                    "7-day rally cap: {asset} up {:.2}% (cap {:.2}%)",
                    change_7d, limits.rally_cap_pct
                ),
            );
        }

        let qty = match size_usd.checked_div(price) {
            Some(q) => q.round_dp(QTY_DP),
            None => return RiskOutcome::rejected(portfolio, action, "size too large"),
        };
        if qty.is_zero() {
            return RiskOutcome::rejected(portfolio, action, "size rounds to zero quantity");
        }
        let (notional, fee) = match Self::fill_amounts(qty, price, limits) {
            Some(amounts) => amounts,
            None => return RiskOutcome::rejected(portfolio, action, "size too large"),
        };

        let after = PortfolioValuationService::value_after(
            portfolio,
            snapshot,
            asset,
            TradeSide::Buy,
            qty,
            fee,
        );
        if after.btc_alloc > limits.max_btc_alloc {
            return RiskOutcome::rejected(
                portfolio,
                action,
                format!(
                    "BTC allocation cap: {:.1}% > {:.1}%",
                    after.btc_alloc * dec!(100),
                    limits.max_btc_alloc * dec!(100)
                ),
            );
        }
        if after.eth_alloc > limits.max_eth_alloc {
            return RiskOutcome::rejected(
                portfolio,
                action,
                format!(
                    "ETH allocation cap: {:.1}% > {:.1}%",
                    after.eth_alloc * dec!(100),
                    limits.max_eth_alloc * dec!(100)
                ),
            );
        }
        if after.cash_alloc < limits.min_cash_alloc {
            return RiskOutcome::rejected(
                portfolio,
                action,
                format!(
                    "minimum cash buffer: {:.1}% < {:.1}%",
                    after.cash_alloc * dec!(100),
                    limits.min_cash_alloc * dec!(100)
                ),
            );
        }

        let mut next = portfolio.clone();
        next.cash_usd -= notional + fee;
        next.set_quantity(asset, portfolio.quantity(asset) + qty);
        next.updated_at = Utc::now();

        Self::approved(suggestion, asset, TradeSide::Buy, qty, price, notional, fee, next, notes)
    }

    fn apply_sell(
        suggestion: &TradeSuggestion,
        asset: Asset,
        price: Decimal,
        portfolio: &Portfolio,
        limits: &RiskConfig,
    ) -> RiskOutcome {
        let action = suggestion.action;
        let held = portfolio.quantity(asset);
        if held <= Decimal::ZERO {
            return RiskOutcome::rejected(portfolio, action, format!("no {asset} holdings to sell"));
        }

        let mut notes = Vec::new();
        // A quotient too large to represent is more than any holding.
        let requested = suggestion.size_usd.checked_div(price).map(|q| q.round_dp(QTY_DP));
        let qty = match requested {
            Some(q) if q <= held => q,
            _ => {
                notes.push(format!("size capped to holdings ({held} {asset})"));
                held
            }
        };
        if qty.is_zero() {
            return RiskOutcome::rejected(portfolio, action, "size rounds to zero quantity");
        }

        let (notional, fee) = match Self::fill_amounts(qty, price, limits) {
            Some(amounts) => amounts,
            None => return RiskOutcome::rejected(portfolio, action, "size too large"),
        };

        let mut next = portfolio.clone();
        next.cash_usd += notional - fee;
        next.set_quantity(asset, held - qty);
        next.updated_at = Utc::now();

        Self::approved(suggestion, asset, TradeSide::Sell, qty, price, notional, fee, next, notes)
    }

    #[allow(clippy::too_many_arguments)]
    fn approved(
        suggestion: &TradeSuggestion,
        asset: Asset,
        side: TradeSide,
        qty: Decimal,
        price: Decimal,
        notional: Decimal,
        fee: Decimal,
        portfolio: Portfolio,
        notes: Vec<String>,
    ) -> RiskOutcome {
        let reason = if notes.is_empty() {
            "approved".to_string()
        } else {
            format!("approved; {}", notes.join("; "))
        };

        let trade = Trade {
            id: None,
            timestamp: Utc::now(),
            asset,
            side,
            quantity: qty,
            price,
            notional,
            fee,
            source: TradeSource::Agent,
            decision_id: None,
            note: suggestion.rationale.chars().take(500).collect(),
        };

        RiskOutcome {
            decision: RiskDecision {
                approved: true,
                action: suggestion.action,
                reason,
            },
            portfolio,
            trade: Some(trade),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RiskConfig {
        RiskConfig {
            max_trades_per_day: 3,
            max_trade_usd: dec!(5000),
            rally_cap_pct: dec!(20),
            max_btc_alloc: dec!(0.60),
            max_eth_alloc: dec!(0.40),
            min_cash_alloc: dec!(0.10),
            fee_bps: dec!(10),
        }
    }

    fn cash_portfolio(cash: Decimal) -> Portfolio {
        Portfolio::new(cash)
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot::sample(dec!(50000), dec!(2500))
    }

    fn suggest(action: SuggestedAction, asset: Asset, size_usd: Decimal) -> TradeSuggestion {
        TradeSuggestion {
            action,
            asset: Some(asset),
            size_usd,
            confidence: dec!(0.7),
            rationale: "test rationale".to_string(),
        }
    }

    #[test]
    fn test_hold_is_not_approved() {
        let p = cash_portfolio(dec!(10000));
        let out = RiskEngine::apply(&TradeSuggestion::hold("nothing to do"), &p, &snapshot(), 0, &limits());
        assert!(!out.decision.approved);
        assert!(out.decision.reason.starts_with("hold"));
        assert!(out.trade.is_none());
        assert_eq!(out.portfolio, p);
    }

    #[test]
    fn test_none_action_is_not_approved() {
        let s = suggest(SuggestedAction::None, Asset::Btc, dec!(100));
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snapshot(), 0, &limits());
        assert!(!out.decision.approved);
        assert!(out.trade.is_none());
    }

    #[test]
    fn test_missing_asset_rejected() {
        let mut s = suggest(SuggestedAction::Buy, Asset::Btc, dec!(100));
        s.asset = None;
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snapshot(), 0, &limits());
        assert!(!out.decision.approved);
        assert_eq!(out.decision.reason, "no asset specified");
    }

    #[test]
    fn test_daily_trade_limit() {
        let s = suggest(SuggestedAction::Buy, Asset::Btc, dec!(100));
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snapshot(), 3, &limits());
        assert!(!out.decision.approved);
        assert!(out.decision.reason.contains("daily trade limit"));
    }

    #[test]
    fn test_non_positive_size() {
        for size in [dec!(0), dec!(-50)] {
            let s = suggest(SuggestedAction::Buy, Asset::Btc, size);
            let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snapshot(), 0, &limits());
            assert!(!out.decision.approved);
            assert_eq!(out.decision.reason, "non-positive size");
        }
    }

    #[test]
    fn test_invalid_price() {
        let s = suggest(SuggestedAction::Buy, Asset::Eth, dec!(100));
        let snap = MarketSnapshot::sample(dec!(50000), dec!(0));
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snap, 0, &limits());
        assert!(!out.decision.approved);
        assert_eq!(out.decision.reason, "invalid ETH price");
    }

    #[test]
    fn test_insufficient_cash() {
        // 100 + 0.10 fee > 100 cash
        let s = suggest(SuggestedAction::Buy, Asset::Btc, dec!(100));
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(100)), &snapshot(), 0, &limits());
        assert!(!out.decision.approved);
        assert!(out.decision.reason.starts_with("insufficient cash"));
    }

    #[test]
    fn test_rally_cap_blocks_buy() {
        let s = suggest(SuggestedAction::Buy, Asset::Btc, dec!(500));
        let mut snap = snapshot();
        snap.btc_change_7d_pct = dec!(25);
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snap, 0, &limits());
        assert!(!out.decision.approved);
        assert!(out.decision.reason.starts_with("7-day rally cap"));
    }

    #[test]
    fn test_rally_cap_ignores_other_asset() {
        let s = suggest(SuggestedAction::Buy, Asset::Eth, dec!(500));
        let mut snap = snapshot();
        snap.btc_change_7d_pct = dec!(25);
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snap, 0, &limits());
        assert!(out.decision.approved, "{}", out.decision.reason);
    }

    #[test]
    fn test_rally_cap_does_not_block_sell() {
        let mut p = cash_portfolio(dec!(1000));
        p.btc_qty = dec!(0.1);
        let mut snap = snapshot();
        snap.btc_change_7d_pct = dec!(40);
        let s = suggest(SuggestedAction::Sell, Asset::Btc, dec!(1000));
        let out = RiskEngine::apply(&s, &p, &snap, 0, &limits());
        assert!(out.decision.approved);
    }

    #[test]
    fn test_btc_allocation_cap() {
        // Existing 0.1 BTC = 5000 of 10000 total; another 2000 would push BTC to ~70%
        let mut p = cash_portfolio(dec!(5000));
        p.btc_qty = dec!(0.1);
        let s = suggest(SuggestedAction::Buy, Asset::Btc, dec!(2000));
        let out = RiskEngine::apply(&s, &p, &snapshot(), 0, &limits());
        assert!(!out.decision.approved);
        assert!(out.decision.reason.starts_with("BTC allocation cap"));
    }

    #[test]
    fn test_eth_allocation_cap() {
        let s = suggest(SuggestedAction::Buy, Asset::Eth, dec!(4500));
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snapshot(), 0, &limits());
        assert!(!out.decision.approved);
        assert!(out.decision.reason.starts_with("ETH allocation cap"));
    }

    #[test]
    fn test_min_cash_buffer() {
        // Asset caps opened up so only the cash floor binds.
        let mut l = limits();
        l.max_btc_alloc = dec!(1);
        l.max_eth_alloc = dec!(1);
        let s = suggest(SuggestedAction::Buy, Asset::Btc, dec!(4900));
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(5000)), &snapshot(), 0, &l);
        assert!(!out.decision.approved);
        assert!(out.decision.reason.starts_with("minimum cash buffer"));
    }

    #[test]
    fn test_buy_approved_mutates_portfolio() {
        let p = cash_portfolio(dec!(10000));
        let s = suggest(SuggestedAction::Buy, Asset::Btc, dec!(1000));
        let out = RiskEngine::apply(&s, &p, &snapshot(), 0, &limits());
        assert!(out.decision.approved);
        assert_eq!(out.decision.reason, "approved");

        let trade = out.trade.expect("approved buy must produce a trade");
        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.asset, Asset::Btc);
        assert_eq!(trade.quantity, dec!(0.02));
        assert_eq!(trade.notional, dec!(1000));
        assert_eq!(trade.fee, dec!(1));
        assert_eq!(trade.source, TradeSource::Agent);

        assert_eq!(out.portfolio.btc_qty, dec!(0.02));
        assert_eq!(out.portfolio.cash_usd, dec!(8999));
        // input untouched
        assert_eq!(p.cash_usd, dec!(10000));
    }

    #[test]
    fn test_buy_size_capped_to_max_trade() {
        let mut l = limits();
        l.max_trade_usd = dec!(500);
        let s = suggest(SuggestedAction::Buy, Asset::Eth, dec!(2000));
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snapshot(), 0, &l);
        assert!(out.decision.approved);
        assert!(out.decision.reason.contains("size capped"));
        assert_eq!(out.trade.unwrap().notional, dec!(500));
    }

    #[test]
    fn test_sell_without_holdings() {
        let s = suggest(SuggestedAction::Sell, Asset::Eth, dec!(100));
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snapshot(), 0, &limits());
        assert!(!out.decision.approved);
        assert_eq!(out.decision.reason, "no ETH holdings to sell");
    }

    #[test]
    fn test_sell_capped_to_holdings() {
        let mut p = cash_portfolio(dec!(1000));
        p.eth_qty = dec!(0.5);
        // 5000 USD at 2500 = 2 ETH requested, only 0.5 held
        let s = suggest(SuggestedAction::Sell, Asset::Eth, dec!(5000));
        let out = RiskEngine::apply(&s, &p, &snapshot(), 0, &limits());
        assert!(out.decision.approved);
        assert!(out.decision.reason.contains("capped to holdings"));

        let trade = out.trade.unwrap();
        assert_eq!(trade.quantity, dec!(0.5));
        assert_eq!(trade.notional, dec!(1250));
        assert_eq!(out.portfolio.eth_qty, dec!(0));
        // 1000 + 1250 - 1.25 fee
        assert_eq!(out.portfolio.cash_usd, dec!(2248.75));
    }

    #[test]
    fn test_partial_sell() {
        let mut p = cash_portfolio(dec!(0));
        p.btc_qty = dec!(1);
        let s = suggest(SuggestedAction::Sell, Asset::Btc, dec!(10000));
        let out = RiskEngine::apply(&s, &p, &snapshot(), 0, &limits());
        assert!(out.decision.approved);
        assert_eq!(out.portfolio.btc_qty, dec!(0.8));
        assert_eq!(out.decision.reason, "approved");
    }

    #[test]
    fn test_fee_for() {
        assert_eq!(RiskEngine::fee_for(dec!(1000), &limits()), Some(dec!(1)));
        let mut l = limits();
        l.fee_bps = dec!(0);
        assert_eq!(RiskEngine::fee_for(dec!(1000), &l), Some(dec!(0)));
        assert_eq!(RiskEngine::fee_for(Decimal::MAX, &limits()), None);
    }

    #[test]
    fn test_uncapped_huge_buy_rejected() {
        let mut l = limits();
        l.max_trade_usd = dec!(0);
        let size = Decimal::from_i128_with_scale(7 * 10_i128.pow(28), 0);
        let s = suggest(SuggestedAction::Buy, Asset::Btc, size);
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snapshot(), 0, &l);
        assert!(!out.decision.approved);
        assert_eq!(out.decision.reason, "size too large");
        assert!(out.trade.is_none());
    }

    #[test]
    fn test_uncapped_huge_buy_without_fee_hits_cash_check() {
        let mut l = limits();
        l.max_trade_usd = dec!(0);
        l.fee_bps = dec!(0);
        let s = suggest(SuggestedAction::Buy, Asset::Eth, Decimal::MAX);
        let out = RiskEngine::apply(&s, &cash_portfolio(dec!(10000)), &snapshot(), 0, &l);
        assert!(!out.decision.approved);
        assert!(out.decision.reason.starts_with("insufficient cash"));
    }

    #[test]
    fn test_huge_sell_at_tiny_price_capped_to_holdings() {
        let mut p = cash_portfolio(dec!(0));
        p.eth_qty = dec!(2);
        let snap = MarketSnapshot::sample(dec!(50000), dec!(0.5));
        let s = suggest(SuggestedAction::Sell, Asset::Eth, Decimal::MAX);
        let out = RiskEngine::apply(&s, &p, &snap, 0, &limits());
        assert!(out.decision.approved, "{}", out.decision.reason);
        assert!(out.decision.reason.contains("capped to holdings"));
        assert_eq!(out.trade.unwrap().notional, dec!(1));
        assert_eq!(out.portfolio.eth_qty, dec!(0));
    }
}
