//! Market data.
//!
//! Defines the `MarketDataSource` trait used by the agent tick and the
//! hourly-candle worker, plus the candle type persisted to SQLite.

pub mod binance;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{Asset, MarketSnapshot};

/// One hourly OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyCandle {
    pub asset: Asset,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Abstraction over a spot market-data API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Current prices and trailing 7-day change for every asset.
    async fn snapshot(&self) -> Result<MarketSnapshot>;

    /// Most recent closed-or-open hourly candles, oldest first.
    async fn hourly_candles(&self, asset: Asset, limit: u32) -> Result<Vec<HourlyCandle>>;
}

/// Percentage change from `from` to `to`, rounded to 4 dp.
/// Zero when `from` is not positive.
pub fn pct_change(from: Decimal, to: Decimal) -> Decimal {
    if from <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((to - from) / from * dec!(100)).round_dp(4)
}
