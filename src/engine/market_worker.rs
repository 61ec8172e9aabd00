//! Hourly candle worker: fetch → upsert → features, regimes, signals.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::market::MarketDataSource;
use crate::storage::Database;
use crate::strategy::features::{
    classify_regime, compute_features, generate_signals, SMA_CROSSOVER,
};
use crate::types::Asset;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketWorkerReport {
    pub candles: usize,
    pub features: usize,
    pub regimes: usize,
    pub signals: usize,
    pub failed_assets: Vec<String>,
}

pub struct MarketWorker {
    db: Database,
    market: Arc<dyn MarketDataSource>,
    candle_limit: u32,
}

impl MarketWorker {
    pub fn new(db: Database, market: Arc<dyn MarketDataSource>, candle_limit: u32) -> Self {
        Self {
            db,
            market,
            candle_limit,
        }
    }

    /// Refresh every asset. One asset failing does not stop the others.
    pub async fn run_once(&self) -> Result<MarketWorkerReport> {
        let mut report = MarketWorkerReport::default();
        for &asset in Asset::ALL {
            if let Err(e) = self.refresh_asset(asset, &mut report).await {
                warn!(asset = %asset, error = %e, "Candle refresh failed");
                report.failed_assets.push(format!("{asset}: {e:#}"));
            }
        }
        info!(
            candles = report.candles,
            signals = report.signals,
            failed = report.failed_assets.len(),
            "Market data refresh complete"
        );
        Ok(report)
    }

    async fn refresh_asset(&self, asset: Asset, report: &mut MarketWorkerReport) -> Result<()> {
        let fetched = self.market.hourly_candles(asset, self.candle_limit).await?;
        let market = self.db.market();
        report.candles += market.upsert_candles(&fetched).await?;

        // Recompute over the stored window so earlier fetches count too.
        let stored = market.candles(asset, i64::from(self.candle_limit)).await?;
        let features = compute_features(&stored);
        let regimes: Vec<_> = features.iter().map(classify_regime).collect();
        // The first row has no predecessor in this window, so its crossover
        // is always HOLD. Keep whatever an earlier, wider window stored.
        let mut signals = generate_signals(&features);
        if let Some(first) = features.first() {
            signals.retain(|s| s.open_time > first.open_time || s.strategy != SMA_CROSSOVER);
        }

        report.features += market.upsert_features(&features).await?;
        report.regimes += market.upsert_regimes(&regimes).await?;
        report.signals += market.upsert_signals(&signals).await?;

        debug!(
            asset = %asset,
            candles = fetched.len(),
            features = features.len(),
            regime = ?regimes.last().map(|r| r.regime),
            "Asset refreshed"
        );
        Ok(())
    }
}
