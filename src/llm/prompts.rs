//! Trade-suggestion prompt and reply parsing.

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use super::extract_json;
use crate::config::RiskConfig;
use crate::exogenous::classifier::decimal_from_json;
use crate::exogenous::ExogenousModifiers;
use crate::strategy::features::RegimeState;
use crate::strategy::Valuation;
use crate::types::{AgentError, Asset, MarketSnapshot, Portfolio, SuggestedAction, TradeSuggestion};

pub const SUGGESTION_SYSTEM_PROMPT: &str = "You manage a paper-trading portfolio of BTC, ETH and \
USD cash. Given the market snapshot, the portfolio, the risk limits and the news backdrop, propose \
at most one trade. Prefer HOLD when there is no clear edge. Reply with a single JSON object: \
{\"action\": \"BUY\"|\"SELL\"|\"HOLD\", \"asset\": \"BTC\"|\"ETH\"|null, \"size_usd\": number, \
\"confidence\": 0.0-1.0, \"rationale\": \"one or two sentences\"}. No other text.";

/// Everything the agent shows the model for one tick.
pub struct SuggestionContext<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub portfolio: &'a Portfolio,
    pub valuation: &'a Valuation,
    pub limits: &'a RiskConfig,
    pub trades_today: u32,
    pub regimes: &'a [RegimeState],
    pub modifiers: &'a ExogenousModifiers,
}

pub fn build_suggestion_prompt(ctx: &SuggestionContext<'_>) -> String {
    let mut prompt = String::with_capacity(1500);

    prompt.push_str(&format!(
        "TIME: {}\n\n",
        ctx.snapshot.timestamp.format("%Y-%m-%d %H:%M UTC")
    ));

    prompt.push_str("MARKET:\n");
    for &asset in Asset::ALL {
        prompt.push_str(&format!(
            "- {asset}: ${:.2} ({:+.2}% over 7d)\n",
            ctx.snapshot.price(asset),
            ctx.snapshot.change_7d_pct(asset)
        ));
    }
    if !ctx.regimes.is_empty() {
        prompt.push_str("\nREGIMES (hourly):\n");
        for r in ctx.regimes {
            prompt.push_str(&format!(
                "- {}: {} (trend {:+.4}, vol {:.4})\n",
                r.asset, r.regime, r.trend_strength, r.volatility
            ));
        }
    }

    let v = ctx.valuation;
    prompt.push_str("\nPORTFOLIO:\n");
    prompt.push_str(&format!(
        "- cash: ${:.2} ({:.1}%)\n",
        ctx.portfolio.cash_usd,
        v.cash_alloc * Decimal::ONE_HUNDRED
    ));
    prompt.push_str(&format!(
        "- BTC: {} (${:.2}, {:.1}%)\n",
        ctx.portfolio.btc_qty,
        v.btc_value,
        v.btc_alloc * Decimal::ONE_HUNDRED
    ));
    prompt.push_str(&format!(
        "- ETH: {} (${:.2}, {:.1}%)\n",
        ctx.portfolio.eth_qty,
        v.eth_value,
        v.eth_alloc * Decimal::ONE_HUNDRED
    ));
    prompt.push_str(&format!("- total: ${:.2}\n", v.total));

    let l = ctx.limits;
    prompt.push_str("\nRISK LIMITS:\n");
    prompt.push_str(&format!(
        "- trades today: {}/{}\n",
        ctx.trades_today, l.max_trades_per_day
    ));
    prompt.push_str(&format!("- max trade: ${:.2}\n", l.max_trade_usd));
    prompt.push_str(&format!(
        "- max allocation: BTC {:.0}%, ETH {:.0}%; min cash {:.0}%\n",
        l.max_btc_alloc * Decimal::ONE_HUNDRED,
        l.max_eth_alloc * Decimal::ONE_HUNDRED,
        l.min_cash_alloc * Decimal::ONE_HUNDRED
    ));
    prompt.push_str(&format!(
        "- no buys after a 7d rally of {}% or more\n",
        l.rally_cap_pct
    ));
    prompt.push_str(&format!("- fee: {} bps per trade\n", l.fee_bps));

    let m = ctx.modifiers;
    prompt.push_str(&format!(
        "\nNEWS BACKDROP: {} (net score {:+.2})\n",
        m.bias, m.net_score
    ));
    for n in &m.top_narratives {
        prompt.push_str(&format!(
            "- {} [{}] score {:+.3}, {} items\n",
            n.label, n.direction, n.score, n.item_count
        ));
    }

    prompt.push_str("\nPropose one trade or HOLD.\n");
    prompt
}

/// Tolerant parse of a suggestion reply.
///
/// Only `action` is required. Size may be a number or a string such as
/// `"$1,500"`; confidence above 1 is read as a percentage.
pub fn parse_suggestion(text: &str) -> Result<TradeSuggestion> {
    let json = extract_json(text)?;

    let raw_action = json
        .get("action")
        .and_then(|v| v.as_str())
        .context("Missing action")?;
    let action: SuggestedAction = raw_action
        .parse()
        .map_err(|_| AgentError::InvalidSuggestion(format!("unknown action '{raw_action}'")))?;

    let asset = match json.get("asset").and_then(|v| v.as_str()).map(str::trim) {
        Some(a) if !a.is_empty() && !a.eq_ignore_ascii_case("null") => Some(
            a.parse::<Asset>()
                .map_err(|_| AgentError::InvalidSuggestion(format!("unknown asset '{a}'")))?,
        ),
        _ => None,
    };

    let size_usd = ["size_usd", "sizeUsd", "size"]
        .iter()
        .find_map(|k| json.get(*k).and_then(decimal_from_json))
        .unwrap_or(Decimal::ZERO)
        .round_dp(2);

    let confidence = json
        .get("confidence")
        .and_then(decimal_from_json)
        .unwrap_or(Decimal::ZERO);
    let confidence = if confidence > Decimal::ONE {
        confidence / Decimal::ONE_HUNDRED
    } else {
        confidence
    }
    .clamp(Decimal::ZERO, Decimal::ONE);

    let rationale = json
        .get("rationale")
        .or_else(|| json.get("reasoning"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(TradeSuggestion {
        action,
        asset,
        size_usd,
        confidence,
        rationale,
    })
}
