//! Shared types for the paper-trading agent.
//!
//! These types form the data model used across all modules. Enum string
//! forms are upper-case (`"BTC"`, `"BUY"`, `"FAILED"`) because the same
//! strings are stored in SQLite and sent to the dashboard.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// String-backed enums
// ---------------------------------------------------------------------------

/// Implements `as_str`, `Display` and case-insensitive `FromStr` for a
/// fieldless enum. Extra aliases may be listed after the canonical name.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::types::AgentError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.trim().to_uppercase();
                $(
                    if upper == $text $(|| upper == $alias)* {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::types::AgentError::InvalidInput(format!(
                    "unknown {}: {s}",
                    stringify!($name)
                )))
            }
        }
    };
}

pub(crate) use string_enum;

/// A tradable asset. Everything is quoted in USD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Btc,
    Eth,
}

string_enum!(Asset {
    Btc => "BTC" | "BITCOIN" | "XBT",
    Eth => "ETH" | "ETHEREUM",
});

impl Asset {
    pub const ALL: &'static [Asset] = &[Asset::Btc, Asset::Eth];

    /// Binance spot symbol against USDT.
    pub fn binance_symbol(&self) -> &'static str {
        match self {
            Asset::Btc => "BTCUSDT",
            Asset::Eth => "ETHUSDT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

string_enum!(TradeSide {
    Buy => "BUY",
    Sell => "SELL",
});

/// What the LLM (or a rule) proposes to do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SuggestedAction {
    Buy,
    Sell,
    Hold,
    None,
}

string_enum!(SuggestedAction {
    Buy => "BUY" | "LONG",
    Sell => "SELL" | "SHORT" | "REDUCE",
    Hold => "HOLD" | "WAIT",
    None => "NONE" | "",
});

impl SuggestedAction {
    /// The trade side this action maps to, if it trades at all.
    pub fn side(&self) -> Option<TradeSide> {
        match self {
            SuggestedAction::Buy => Some(TradeSide::Buy),
            SuggestedAction::Sell => Some(TradeSide::Sell),
            SuggestedAction::Hold | SuggestedAction::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSource {
    Agent,
    Manual,
}

string_enum!(TradeSource {
    Agent => "AGENT",
    Manual => "MANUAL",
});

/// Outcome of producing a decision (not of the risk check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionStatus {
    Ok,
    Failed,
    Skipped,
}

string_enum!(DecisionStatus {
    Ok => "OK",
    Failed => "FAILED",
    Skipped => "SKIPPED",
});

/// Directional read of a news item or narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

string_enum!(Direction {
    Bullish => "BULLISH" | "POSITIVE" | "UP",
    Bearish => "BEARISH" | "NEGATIVE" | "DOWN",
    Neutral => "NEUTRAL" | "MIXED",
});

impl Direction {
    /// +1 / -1 / 0.
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Bullish => Decimal::ONE,
            Direction::Bearish => Decimal::NEGATIVE_ONE,
            Direction::Neutral => Decimal::ZERO,
        }
    }
}

/// How long a news item is expected to matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Horizon {
    Short,
    Medium,
    Long,
}

string_enum!(Horizon {
    Short => "SHORT" | "INTRADAY" | "HOURS",
    Medium => "MEDIUM" | "DAYS",
    Long => "LONG" | "WEEKS",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClassificationStatus {
    Pending,
    Classified,
    Failed,
}

string_enum!(ClassificationStatus {
    Pending => "PENDING",
    Classified => "CLASSIFIED",
    Failed => "FAILED",
});

/// Aggregate stance of the exogenous news flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bias {
    RiskOn,
    RiskOff,
    Neutral,
}

string_enum!(Bias {
    RiskOn => "RISK_ON",
    RiskOff => "RISK_OFF",
    Neutral => "NEUTRAL",
});

/// Market regime derived from hourly features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    TrendUp,
    TrendDown,
    Range,
    HighVol,
}

string_enum!(Regime {
    TrendUp => "TREND_UP",
    TrendDown => "TREND_DOWN",
    Range => "RANGE" | "RANGING",
    HighVol => "HIGH_VOL",
});

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// The single paper portfolio: USD cash plus coin quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub cash_usd: Decimal,
    pub btc_qty: Decimal,
    pub eth_qty: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(cash_usd: Decimal) -> Self {
        Self {
            cash_usd,
            btc_qty: Decimal::ZERO,
            eth_qty: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn quantity(&self, asset: Asset) -> Decimal {
        match asset {
            Asset::Btc => self.btc_qty,
            Asset::Eth => self.eth_qty,
        }
    }

    pub fn set_quantity(&mut self, asset: Asset, qty: Decimal) {
        match asset {
            Asset::Btc => self.btc_qty = qty,
            Asset::Eth => self.eth_qty = qty,
        }
    }
}

impl fmt::Display for Portfolio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cash=${:.2} btc={} eth={}",
            self.cash_usd, self.btc_qty, self.eth_qty
        )
    }
}

// ---------------------------------------------------------------------------
// Market snapshot
// ---------------------------------------------------------------------------

/// Spot prices and trailing 7-day change (in percent) for each asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    pub btc_price: Decimal,
    pub eth_price: Decimal,
    pub btc_change_7d_pct: Decimal,
    pub eth_change_7d_pct: Decimal,
}

impl MarketSnapshot {
    pub fn price(&self, asset: Asset) -> Decimal {
        match asset {
            Asset::Btc => self.btc_price,
            Asset::Eth => self.eth_price,
        }
    }

    pub fn change_7d_pct(&self, asset: Asset) -> Decimal {
        match asset {
            Asset::Btc => self.btc_change_7d_pct,
            Asset::Eth => self.eth_change_7d_pct,
        }
    }

    /// Helper to build a snapshot with flat 7-day changes.
    #[cfg(test)]
    pub fn sample(btc_price: Decimal, eth_price: Decimal) -> Self {
        Self {
            timestamp: Utc::now(),
            btc_price,
            eth_price,
            btc_change_7d_pct: Decimal::ZERO,
            eth_change_7d_pct: Decimal::ZERO,
        }
    }
}

impl fmt::Display for MarketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BTC ${:.2} ({:+.2}% 7d) | ETH ${:.2} ({:+.2}% 7d)",
            self.btc_price, self.btc_change_7d_pct, self.eth_price, self.eth_change_7d_pct
        )
    }
}

// ---------------------------------------------------------------------------
// Trades & suggestions
// ---------------------------------------------------------------------------

/// A simulated fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub asset: Asset,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub notional: Decimal,
    pub fee: Decimal,
    pub source: TradeSource,
    pub decision_id: Option<i64>,
    pub note: String,
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} @ ${:.2} (notional ${:.2}, fee ${:.4})",
            self.source, self.side, self.quantity, self.asset, self.price, self.notional, self.fee
        )
    }
}

/// A trade proposal, usually parsed from an LLM reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSuggestion {
    pub action: SuggestedAction,
    pub asset: Option<Asset>,
    pub size_usd: Decimal,
    pub confidence: Decimal,
    pub rationale: String,
}

impl TradeSuggestion {
    pub fn hold(rationale: impl Into<String>) -> Self {
        Self {
            action: SuggestedAction::Hold,
            asset: None,
            size_usd: Decimal::ZERO,
            confidence: Decimal::ZERO,
            rationale: rationale.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decision log & equity history
// ---------------------------------------------------------------------------

/// One agent tick: what was suggested, what the risk engine did with it,
/// and the market/exogenous context at the time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionLog {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub model: String,
    pub status: DecisionStatus,
    pub action: SuggestedAction,
    pub asset: Option<Asset>,
    pub size_usd: Decimal,
    pub confidence: Decimal,
    pub rationale: String,
    pub approved: bool,
    pub risk_reason: String,
    pub error: Option<String>,
    pub btc_price: Decimal,
    pub eth_price: Decimal,
    pub exogenous_score: Decimal,
    pub exogenous_bias: Bias,
    pub trade_id: Option<i64>,
}

/// Portfolio value at a point in time, recorded after every tick and
/// manual trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub cash_usd: Decimal,
    pub btc_qty: Decimal,
    pub eth_qty: Decimal,
    pub btc_price: Decimal,
    pub eth_price: Decimal,
    pub total_value: Decimal,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("LLM error ({model}): {message}")]
    Llm { model: String, message: String },

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("Invalid suggestion: {0}")]
    InvalidSuggestion(String),

    #[error("Insufficient cash: need ${needed:.2}, have ${available:.2}")]
    InsufficientCash { needed: Decimal, available: Decimal },

    #[error("No {0} holdings to sell")]
    NoHoldings(Asset),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_asset_display_and_parse() {
        assert_eq!(Asset::Btc.to_string(), "BTC");
        assert_eq!("eth".parse::<Asset>().unwrap(), Asset::Eth);
        assert_eq!("Bitcoin".parse::<Asset>().unwrap(), Asset::Btc);
        assert!("doge".parse::<Asset>().is_err());
    }

    #[test]
    fn test_asset_serializes_upper_case() {
        let json = serde_json::to_string(&Asset::Eth).unwrap();
        assert_eq!(json, "\"ETH\"");
    }

    #[test]
    fn test_suggested_action_aliases() {
        assert_eq!("long".parse::<SuggestedAction>().unwrap(), SuggestedAction::Buy);
        assert_eq!(" hold ".parse::<SuggestedAction>().unwrap(), SuggestedAction::Hold);
        assert_eq!("".parse::<SuggestedAction>().unwrap(), SuggestedAction::None);
        assert_eq!(SuggestedAction::Sell.side(), Some(TradeSide::Sell));
        assert_eq!(SuggestedAction::Hold.side(), None);
    }

    #[test]
    fn test_direction_sign() {
        assert_eq!(Direction::Bullish.sign(), dec!(1));
        assert_eq!(Direction::Bearish.sign(), dec!(-1));
        assert_eq!(Direction::Neutral.sign(), dec!(0));
    }

    #[test]
    fn test_horizon_parse() {
        assert_eq!("intraday".parse::<Horizon>().unwrap(), Horizon::Short);
        assert_eq!("WEEKS".parse::<Horizon>().unwrap(), Horizon::Long);
    }

    #[test]
    fn test_portfolio_quantity_accessors() {
        let mut p = Portfolio::new(dec!(1000));
        assert_eq!(p.quantity(Asset::Btc), Decimal::ZERO);
        p.set_quantity(Asset::Eth, dec!(1.5));
        assert_eq!(p.quantity(Asset::Eth), dec!(1.5));
        assert_eq!(p.btc_qty, Decimal::ZERO);
    }

    #[test]
    fn test_portfolio_serializes_camel_case() {
        let p = Portfolio::new(dec!(250));
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["cashUsd"].as_f64().unwrap(), 250.0);
        assert!(json.get("btcQty").is_some());
    }

    #[test]
    fn test_snapshot_accessors() {
        let mut s = MarketSnapshot::sample(dec!(60000), dec!(3000));
        s.eth_change_7d_pct = dec!(12.5);
        assert_eq!(s.price(Asset::Btc), dec!(60000));
        assert_eq!(s.change_7d_pct(Asset::Eth), dec!(12.5));
        assert!(format!("{s}").contains("BTC"));
    }

    #[test]
    fn test_hold_suggestion() {
        let s = TradeSuggestion::hold("flat market");
        assert_eq!(s.action, SuggestedAction::Hold);
        assert_eq!(s.size_usd, Decimal::ZERO);
        assert_eq!(s.rationale, "flat market");
    }

    #[test]
    fn test_error_display() {
        let e = AgentError::InsufficientCash {
            needed: dec!(150),
            available: dec!(100),
        };
        assert_eq!(e.to_string(), "Insufficient cash: need $150.00, have $100.00");
        assert_eq!(AgentError::NoHoldings(Asset::Btc).to_string(), "No BTC holdings to sell");
    }
}
