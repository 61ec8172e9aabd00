//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::types::AgentError;

/// Default config path, overridable with `CRYPTO_AGENT_CONFIG`.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub exogenous: ExogenousConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    /// Seconds between agent ticks.
    pub interval_secs: u64,
    /// Cash the portfolio is seeded with on first start.
    pub initial_cash_usd: Decimal,
    /// Run the timer loop (the HTTP run-once endpoint works regardless).
    pub enabled: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "crypto-agent".to_string(),
            interval_secs: 3600,
            initial_cash_usd: dec!(10000),
            enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    /// Chat-completions endpoint (OpenAI-compatible).
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "anthropic/claude-sonnet-4".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            max_tokens: 800,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// The API key, if the referenced variable is set and non-empty.
    pub fn api_key(&self) -> Option<SecretString> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::new)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketDataConfig {
    pub base_url: String,
    /// Seconds between hourly-candle refreshes.
    pub interval_secs: u64,
    /// Candles fetched per asset per refresh.
    pub candle_limit: u32,
    pub enabled: bool,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            interval_secs: 3600,
            candle_limit: 200,
            enabled: true,
        }
    }
}

/// Limits applied by the risk engine to every suggested trade.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    pub max_trades_per_day: u32,
    /// Largest single buy in USD; larger suggestions are capped.
    pub max_trade_usd: Decimal,
    /// Block buys when the asset rose this much (percent) over 7 days.
    pub rally_cap_pct: Decimal,
    pub max_btc_alloc: Decimal,
    pub max_eth_alloc: Decimal,
    pub min_cash_alloc: Decimal,
    pub fee_bps: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_trades_per_day: 4,
            max_trade_usd: dec!(2500),
            rally_cap_pct: dec!(20),
            max_btc_alloc: dec!(0.60),
            max_eth_alloc: dec!(0.40),
            min_cash_alloc: dec!(0.10),
            fee_bps: dec!(10),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExogenousConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub feeds: Vec<FeedConfig>,
    /// Pending items classified per refresh.
    pub max_classify_per_tick: usize,
    /// Items older than this are ignored when building narratives.
    pub lookback_hours: i64,
    pub similarity_threshold: f64,
    /// Minimum seconds between two refreshes. 0 disables the cooldown.
    pub refresh_cooldown_secs: u64,
    pub default_credibility: Decimal,
    pub source_credibility: HashMap<String, Decimal>,
    pub short_half_life_hours: f64,
    pub medium_half_life_hours: f64,
    pub long_half_life_hours: f64,
    pub short_weight: Decimal,
    pub medium_weight: Decimal,
    pub long_weight: Decimal,
}

impl Default for ExogenousConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 900,
            feeds: vec![
                FeedConfig {
                    name: "coindesk".to_string(),
                    url: "https://www.coindesk.com/arc/outboundfeeds/rss/".to_string(),
                },
                FeedConfig {
                    name: "cointelegraph".to_string(),
                    url: "https://cointelegraph.com/rss".to_string(),
                },
            ],
            max_classify_per_tick: 20,
            lookback_hours: 72,
            similarity_threshold: 0.30,
            refresh_cooldown_secs: 60,
            default_credibility: dec!(0.5),
            source_credibility: HashMap::new(),
            short_half_life_hours: 6.0,
            medium_half_life_hours: 48.0,
            long_half_life_hours: 168.0,
            short_weight: dec!(1.0),
            medium_weight: dec!(0.7),
            long_weight: dec!(0.4),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "data/crypto_agent.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
    /// Directory with the built dashboard; served at `/` when present.
    pub static_dir: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: Some("dashboard/dist".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_cash_usd: Decimal,
    /// Notional of each simulated buy signal.
    pub trade_size_usd: Decimal,
    /// Candles replayed when a request does not say.
    pub default_hours: i64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_cash_usd: dec!(10000),
            trade_size_usd: dec!(1000),
            default_hours: 720,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Path from `CRYPTO_AGENT_CONFIG`, falling back to `config.toml`.
    pub fn default_path() -> String {
        std::env::var("CRYPTO_AGENT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Reject limits that would make the risk engine meaningless and
    /// timer periods the scheduler cannot run.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(AgentError::Config(msg).into()) };

        let r = &self.risk;
        for (name, v) in [
            ("max_btc_alloc", r.max_btc_alloc),
            ("max_eth_alloc", r.max_eth_alloc),
            ("min_cash_alloc", r.min_cash_alloc),
        ] {
            if v < Decimal::ZERO || v > Decimal::ONE {
                return invalid(format!("risk.{name} must be within [0, 1], got {v}"));
            }
        }
        if r.fee_bps < Decimal::ZERO {
            return invalid("risk.fee_bps must not be negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.exogenous.similarity_threshold) {
            return invalid("exogenous.similarity_threshold must be within [0, 1]".to_string());
        }
        for (name, secs) in [
            ("agent", self.agent.interval_secs),
            ("market_data", self.market_data.interval_secs),
            ("exogenous", self.exogenous.interval_secs),
        ] {
            if secs == 0 {
                return invalid(format!("{name}.interval_secs must be positive"));
            }
        }
        if self.market_data.candle_limit == 0 {
            return invalid("market_data.candle_limit must be positive".to_string());
        }
        Ok(())
    }
}
