//! Scripted sources for integration testing.
//!
//! Deterministic `MarketDataSource`, `NewsSource` and `LlmClient`
//! implementations with no network access. Prices, feed contents and LLM
//! replies are controllable from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, DurationRound, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crypto_agent::config::FeedConfig;
use crypto_agent::exogenous::rss::NewsSource;
use crypto_agent::exogenous::ExogenousItem;
use crypto_agent::llm::prompts::SUGGESTION_SYSTEM_PROMPT;
use crypto_agent::llm::{LlmClient, LlmReply};
use crypto_agent::market::{HourlyCandle, MarketDataSource};
use crypto_agent::types::{Asset, MarketSnapshot};

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// Spot prices plus a synthetic candle history that trends up into them.
pub struct ScriptedMarket {
    prices: Arc<Mutex<(Decimal, Decimal)>>,
    /// If set, `snapshot` fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
}

impl ScriptedMarket {
    pub fn new(btc: Decimal, eth: Decimal) -> Self {
        Self {
            prices: Arc::new(Mutex::new((btc, eth))),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_prices(&self, btc: Decimal, eth: Decimal) {
        *self.prices.lock().unwrap() = (btc, eth);
    }

    pub fn fail_with(&self, message: &str) {
        *self.force_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    fn price(&self, asset: Asset) -> Decimal {
        let (btc, eth) = *self.prices.lock().unwrap();
        match asset {
            Asset::Btc => btc,
            Asset::Eth => eth,
        }
    }
}

#[async_trait]
impl MarketDataSource for ScriptedMarket {
    async fn snapshot(&self) -> Result<MarketSnapshot> {
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        let (btc, eth) = *self.prices.lock().unwrap();
        Ok(MarketSnapshot {
            timestamp: Utc::now(),
            btc_price: btc,
            eth_price: eth,
            btc_change_7d_pct: dec!(2.5),
            eth_change_7d_pct: dec!(-1.0),
        })
    }

    async fn hourly_candles(&self, asset: Asset, limit: u32) -> Result<Vec<HourlyCandle>> {
        let last = self.price(asset);
        let now = Utc::now().duration_trunc(Duration::hours(1))?;
        let n = i64::from(limit);
        Ok((0..n)
            .map(|i| {
                // Dip in the first half, recovery in the second.
                let offset = if i < n / 2 { -i } else { i - n };
                let close = last + last * Decimal::from(offset) / dec!(1000);
                HourlyCandle {
                    asset,
                    open_time: now - Duration::hours(n - i),
                    open: close,
                    high: close * dec!(1.002),
                    low: close * dec!(0.998),
                    close,
                    volume: dec!(10),
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// News
// ---------------------------------------------------------------------------

/// Feed name → items (or an error) returned on every fetch.
#[derive(Default)]
pub struct StaticNews {
    feeds: HashMap<String, Result<Vec<ExogenousItem>, String>>,
}

impl StaticNews {
    pub fn with_items(mut self, feed: &str, items: Vec<ExogenousItem>) -> Self {
        self.feeds.insert(feed.to_string(), Ok(items));
        self
    }

    pub fn with_error(mut self, feed: &str, message: &str) -> Self {
        self.feeds.insert(feed.to_string(), Err(message.to_string()));
        self
    }
}

#[async_trait]
impl NewsSource for StaticNews {
    async fn fetch(&self, feed: &FeedConfig) -> Result<Vec<ExogenousItem>> {
        match self.feeds.get(&feed.name) {
            Some(Ok(items)) => Ok(items.clone()),
            Some(Err(msg)) => Err(anyhow!("{msg}")),
            None => Ok(Vec::new()),
        }
    }
}

pub fn news_item(source: &str, title: &str, url: &str, hours_ago: i64) -> ExogenousItem {
    ExogenousItem::new(
        source,
        title,
        url,
        format!("{title}. More details inside."),
        Utc::now() - Duration::hours(hours_ago),
    )
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// Replies to trade-suggestion prompts from a queue (HOLD once empty) and
/// to every other prompt with a fixed news classification.
pub struct ScriptedLlm {
    suggestions: Mutex<VecDeque<String>>,
    classification: String,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(classification: &str) -> Self {
        Self {
            suggestions: Mutex::new(VecDeque::new()),
            classification: classification.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_suggestion(&self, reply: &str) {
        self.suggestions.lock().unwrap().push_back(reply.to_string());
    }

    pub fn suggestion_prompts(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmReply> {
        let text = if system == SUGGESTION_SYSTEM_PROMPT {
            self.calls.lock().unwrap().push(user.to_string());
            self.suggestions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| r#"{"action":"HOLD","rationale":"nothing to do"}"#.to_string())
        } else {
            self.classification.clone()
        };
        Ok(LlmReply {
            text,
            model: self.model_name(),
            tokens_used: 42,
        })
    }

    fn model_name(&self) -> String {
        "scripted-model".to_string()
    }
}
