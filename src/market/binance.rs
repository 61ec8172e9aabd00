//! Binance public market data.
//!
//! Spot prices, daily klines (for the 7-day change) and hourly klines.
//! No authentication required.
//!
//! API: `https://api.binance.com/api/v3/{ticker/price,klines}`

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, info};

use super::{pct_change, HourlyCandle, MarketDataSource};
use crate::types::{Asset, MarketSnapshot};

const MAX_KLINES_PER_REQUEST: u32 = 1000;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

/// Raw kline row (Binance returns an array of arrays).
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: open time (ms)
    String, // 1: open
    String, // 2: high
    String, // 3: low
    String, // 4: close
    String, // 5: volume
    i64,    // 6: close time
    String, // 7: quote asset volume
    u64,    // 8: number of trades
    String, // 9: taker buy base
    String, // 10: taker buy quote
    String, // 11: ignore
);

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BinanceMarketData {
    http: Client,
    base_url: String,
}

impl BinanceMarketData {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .user_agent("crypto-agent/0.1.0")
            .build()
            .context("Failed to build Binance HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {status}: {body}");
        }
        Ok(response.json().await?)
    }

    /// Current spot price.
    pub async fn price(&self, asset: Asset) -> Result<Decimal> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url,
            urlencoding::encode(asset.binance_symbol())
        );
        let ticker: TickerPrice = self.get_json(&url).await?;
        Decimal::from_str(&ticker.price)
            .with_context(|| format!("Bad {asset} price: {}", ticker.price))
    }

    async fn klines(&self, asset: Asset, interval: &str, limit: u32) -> Result<Vec<HourlyCandle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            urlencoding::encode(asset.binance_symbol()),
            interval,
            limit.clamp(1, MAX_KLINES_PER_REQUEST)
        );
        debug!(asset = %asset, interval, limit, "Fetching klines");
        let raw: Vec<RawKline> = self.get_json(&url).await?;
        Ok(raw.into_iter().filter_map(|k| parse_kline(asset, k)).collect())
    }

    /// Spot price plus percentage change against the open 7 days ago.
    async fn asset_quote(&self, asset: Asset) -> Result<(Decimal, Decimal)> {
        let price = self.price(asset).await?;
        let daily = self.klines(asset, "1d", 8).await?;
        let change = daily
            .first()
            .map(|k| pct_change(k.open, price))
            .unwrap_or(Decimal::ZERO);
        Ok((price, change))
    }
}

fn parse_kline(asset: Asset, raw: RawKline) -> Option<HourlyCandle> {
    Some(HourlyCandle {
        asset,
        open_time: DateTime::<Utc>::from_timestamp_millis(raw.0)?,
        open: Decimal::from_str(&raw.1).ok()?,
        high: Decimal::from_str(&raw.2).ok()?,
        low: Decimal::from_str(&raw.3).ok()?,
        close: Decimal::from_str(&raw.4).ok()?,
        volume: Decimal::from_str(&raw.5).ok()?,
    })
}

#[async_trait]
impl MarketDataSource for BinanceMarketData {
    async fn snapshot(&self) -> Result<MarketSnapshot> {
        let ((btc_price, btc_change), (eth_price, eth_change)) = futures::future::try_join(
            self.asset_quote(Asset::Btc),
            self.asset_quote(Asset::Eth),
        )
        .await?;

        let snapshot = MarketSnapshot {
            timestamp: Utc::now(),
            btc_price,
            eth_price,
            btc_change_7d_pct: btc_change,
            eth_change_7d_pct: eth_change,
        };
        info!(%snapshot, "Market snapshot");
        Ok(snapshot)
    }

    async fn hourly_candles(&self, asset: Asset, limit: u32) -> Result<Vec<HourlyCandle>> {
        self.klines(asset, "1h", limit).await
    }
}
