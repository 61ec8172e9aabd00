//! Hourly candles and everything derived from them.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{get_dec, get_enum, get_ts, to_millis, DbResult};
use crate::market::HourlyCandle;
use crate::strategy::features::{HourlyFeature, RegimeState, StrategySignal};
use crate::types::Asset;

pub struct MarketRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MarketRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert by (asset, open_time). Returns the number of rows written.
    pub async fn upsert_candles(&self, candles: &[HourlyCandle]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for c in candles {
            sqlx::query(
                r#"INSERT INTO hourly_candles (asset, open_time, open, high, low, close, volume)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                   ON CONFLICT(asset, open_time) DO UPDATE SET
                     open = excluded.open,
                     high = excluded.high,
                     low = excluded.low,
                     close = excluded.close,
                     volume = excluded.volume"#,
            )
            .bind(c.asset.as_str())
            .bind(to_millis(c.open_time))
            .bind(c.open.to_string())
            .bind(c.high.to_string())
            .bind(c.low.to_string())
            .bind(c.close.to_string())
            .bind(c.volume.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(candles.len())
    }

    /// The latest `limit` candles for an asset, oldest first.
    pub async fn candles(&self, asset: Asset, limit: i64) -> DbResult<Vec<HourlyCandle>> {
        let rows = sqlx::query(
            r#"SELECT * FROM (
                 SELECT * FROM hourly_candles WHERE asset = ?1
                 ORDER BY open_time DESC LIMIT ?2
               ) ORDER BY open_time ASC"#,
        )
        .bind(asset.as_str())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(candle_from_row).collect()
    }

    pub async fn upsert_features(&self, features: &[HourlyFeature]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for f in features {
            sqlx::query(
                r#"INSERT INTO hourly_features
                    (asset, open_time, close, return_1h, return_24h, volatility_24h, sma_fast, sma_slow)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                   ON CONFLICT(asset, open_time) DO UPDATE SET
                     close = excluded.close,
                     return_1h = excluded.return_1h,
                     return_24h = excluded.return_24h,
                     volatility_24h = excluded.volatility_24h,
                     sma_fast = excluded.sma_fast,
                     sma_slow = excluded.sma_slow"#,
            )
            .bind(f.asset.as_str())
            .bind(to_millis(f.open_time))
            .bind(f.close.to_string())
            .bind(f.return_1h.to_string())
            .bind(f.return_24h.to_string())
            .bind(f.volatility_24h.to_string())
            .bind(f.sma_fast.to_string())
            .bind(f.sma_slow.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(features.len())
    }

    /// The latest `limit` feature rows for an asset, oldest first.
    pub async fn features(&self, asset: Asset, limit: i64) -> DbResult<Vec<HourlyFeature>> {
        let rows = sqlx::query(
            r#"SELECT * FROM (
                 SELECT * FROM hourly_features WHERE asset = ?1
                 ORDER BY open_time DESC LIMIT ?2
               ) ORDER BY open_time ASC"#,
        )
        .bind(asset.as_str())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(feature_from_row).collect()
    }

    pub async fn upsert_regimes(&self, regimes: &[RegimeState]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for r in regimes {
            sqlx::query(
                r#"INSERT INTO regime_states (asset, open_time, regime, trend_strength, volatility)
                   VALUES (?1, ?2, ?3, ?4, ?5)
                   ON CONFLICT(asset, open_time) DO UPDATE SET
                     regime = excluded.regime,
                     trend_strength = excluded.trend_strength,
                     volatility = excluded.volatility"#,
            )
            .bind(r.asset.as_str())
            .bind(to_millis(r.open_time))
            .bind(r.regime.as_str())
            .bind(r.trend_strength.to_string())
            .bind(r.volatility.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(regimes.len())
    }

    pub async fn latest_regime(&self, asset: Asset) -> DbResult<Option<RegimeState>> {
        let row = sqlx::query(
            "SELECT * FROM regime_states WHERE asset = ?1 ORDER BY open_time DESC LIMIT 1",
        )
        .bind(asset.as_str())
        .fetch_optional(self.pool)
        .await?;
        row.as_ref().map(regime_from_row).transpose()
    }

    pub async fn upsert_signals(&self, signals: &[StrategySignal]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        for s in signals {
            sqlx::query(
                r#"INSERT INTO strategy_signals (asset, open_time, strategy, signal, strength)
                   VALUES (?1, ?2, ?3, ?4, ?5)
                   ON CONFLICT(asset, open_time, strategy) DO UPDATE SET
                     signal = excluded.signal,
                     strength = excluded.strength"#,
            )
            .bind(s.asset.as_str())
            .bind(to_millis(s.open_time))
            .bind(&s.strategy)
            .bind(s.signal.as_str())
            .bind(s.strength.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(signals.len())
    }

    /// All signals of one strategy for an asset, oldest first.
    pub async fn signals(&self, asset: Asset, strategy: &str) -> DbResult<Vec<StrategySignal>> {
        let rows = sqlx::query(
            "SELECT * FROM strategy_signals WHERE asset = ?1 AND strategy = ?2 ORDER BY open_time ASC",
        )
        .bind(asset.as_str())
        .bind(strategy)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(signal_from_row).collect()
    }
}

fn candle_from_row(row: &SqliteRow) -> DbResult<HourlyCandle> {
    Ok(HourlyCandle {
        asset: get_enum(row, "asset")?,
        open_time: get_ts(row, "open_time")?,
        open: get_dec(row, "open")?,
        high: get_dec(row, "high")?,
        low: get_dec(row, "low")?,
        close: get_dec(row, "close")?,
        volume: get_dec(row, "volume")?,
    })
}

fn feature_from_row(row: &SqliteRow) -> DbResult<HourlyFeature> {
    Ok(HourlyFeature {
        asset: get_enum(row, "asset")?,
        open_time: get_ts(row, "open_time")?,
        close: get_dec(row, "close")?,
        return_1h: get_dec(row, "return_1h")?,
        return_24h: get_dec(row, "return_24h")?,
        volatility_24h: get_dec(row, "volatility_24h")?,
        sma_fast: get_dec(row, "sma_fast")?,
        sma_slow: get_dec(row, "sma_slow")?,
    })
}

fn regime_from_row(row: &SqliteRow) -> DbResult<RegimeState> {
    Ok(RegimeState {
        asset: get_enum(row, "asset")?,
        open_time: get_ts(row, "open_time")?,
        regime: get_enum(row, "regime")?,
        trend_strength: get_dec(row, "trend_strength")?,
        volatility: get_dec(row, "volatility")?,
    })
}

fn signal_from_row(row: &SqliteRow) -> DbResult<StrategySignal> {
    Ok(StrategySignal {
        asset: get_enum(row, "asset")?,
        open_time: get_ts(row, "open_time")?,
        strategy: row.try_get("strategy")?,
        signal: get_enum(row, "signal")?,
        strength: get_dec(row, "strength")?,
    })
}
