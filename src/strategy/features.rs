//! Hourly features, regime classification and rule-based signals.
//!
//! Computed from stored hourly candles by the market-data worker and
//! reused by the backtest runner. A row is produced only once a full
//! 24-hour window is available.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::market::HourlyCandle;
use crate::types::{Asset, Regime, SuggestedAction};

const FAST_WINDOW: usize = 6;
const SLOW_WINDOW: usize = 24;

/// Strategy name for the SMA crossover signal.
pub const SMA_CROSSOVER: &str = "sma_crossover";
/// Strategy name for the 24h momentum signal.
pub const MOMENTUM_24H: &str = "momentum_24h";

/// Hourly standard deviation above which the regime is `HighVol`.
const HIGH_VOL_THRESHOLD: Decimal = dec!(0.02);
/// Fast/slow SMA spread that counts as a trend.
const TREND_THRESHOLD: Decimal = dec!(0.005);
/// 24h return that triggers a momentum signal.
const MOMENTUM_THRESHOLD: Decimal = dec!(0.02);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyFeature {
    pub asset: Asset,
    pub open_time: DateTime<Utc>,
    pub close: Decimal,
    pub return_1h: Decimal,
    pub return_24h: Decimal,
    pub volatility_24h: Decimal,
    pub sma_fast: Decimal,
    pub sma_slow: Decimal,
}

impl HourlyFeature {
    /// Relative spread of the fast SMA over the slow SMA.
    pub fn trend_strength(&self) -> Decimal {
        if self.sma_slow.is_zero() {
            Decimal::ZERO
        } else {
            (self.sma_fast / self.sma_slow - Decimal::ONE).round_dp(6)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeState {
    pub asset: Asset,
    pub open_time: DateTime<Utc>,
    pub regime: Regime,
    pub trend_strength: Decimal,
    pub volatility: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySignal {
    pub asset: Asset,
    pub open_time: DateTime<Utc>,
    pub strategy: String,
    pub signal: SuggestedAction,
    pub strength: Decimal,
}

fn ret(from: Decimal, to: Decimal) -> Decimal {
    if from.is_zero() {
        Decimal::ZERO
    } else {
        (to / from - Decimal::ONE).round_dp(8)
    }
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().sum::<Decimal>() / Decimal::from(values.len())
}

fn std_dev(values: &[Decimal]) -> Decimal {
    if values.len() < 2 {
        return Decimal::ZERO;
    }
    let xs: Vec<f64> = values.iter().filter_map(|v| v.to_f64()).collect();
    let m = xs.iter().sum::<f64>() / xs.len() as f64;
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    Decimal::from_f64(var.sqrt()).unwrap_or(Decimal::ZERO).round_dp(8)
}

/// Compute features for every candle that has a full slow window behind it.
/// `candles` must belong to one asset; they are sorted by open time here.
pub fn compute_features(candles: &[HourlyCandle]) -> Vec<HourlyFeature> {
    let mut sorted: Vec<&HourlyCandle> = candles.iter().collect();
    sorted.sort_by_key(|c| c.open_time);
    let closes: Vec<Decimal> = sorted.iter().map(|c| c.close).collect();

    (SLOW_WINDOW..closes.len())
        .map(|i| {
            let returns: Vec<Decimal> = (i + 1 - SLOW_WINDOW..=i)
                .map(|j| ret(closes[j - 1], closes[j]))
                .collect();
            HourlyFeature {
                asset: sorted[i].asset,
                open_time: sorted[i].open_time,
                close: closes[i],
                return_1h: ret(closes[i - 1], closes[i]),
                return_24h: ret(closes[i - SLOW_WINDOW], closes[i]),
                volatility_24h: std_dev(&returns),
                sma_fast: mean(&closes[i + 1 - FAST_WINDOW..=i]).round_dp(8),
                sma_slow: mean(&closes[i + 1 - SLOW_WINDOW..=i]).round_dp(8),
            }
        })
        .collect()
}

/// Classify the regime at one feature row.
pub fn classify_regime(feature: &HourlyFeature) -> RegimeState {
    let trend = feature.trend_strength();
    let regime = if feature.volatility_24h > HIGH_VOL_THRESHOLD {
        Regime::HighVol
    } else if trend > TREND_THRESHOLD {
        Regime::TrendUp
    } else if trend < -TREND_THRESHOLD {
        Regime::TrendDown
    } else {
        Regime::Range
    };
    RegimeState {
        asset: feature.asset,
        open_time: feature.open_time,
        regime,
        trend_strength: trend,
        volatility: feature.volatility_24h,
    }
}

/// Crossover and momentum signals for each feature row (sorted by time).
pub fn generate_signals(features: &[HourlyFeature]) -> Vec<StrategySignal> {
    let mut out = Vec::with_capacity(features.len() * 2);
    for (i, f) in features.iter().enumerate() {
        let prev = if i > 0 { features.get(i - 1) } else { None };
        let crossover = match prev {
            Some(prev) if prev.sma_fast <= prev.sma_slow && f.sma_fast > f.sma_slow => {
                SuggestedAction::Buy
            }
            Some(prev) if prev.sma_fast >= prev.sma_slow && f.sma_fast < f.sma_slow => {
                SuggestedAction::Sell
            }
            _ => SuggestedAction::Hold,
        };
        out.push(StrategySignal {
            asset: f.asset,
            open_time: f.open_time,
            strategy: SMA_CROSSOVER.to_string(),
            signal: crossover,
            strength: f.trend_strength().abs(),
        });

        let momentum = if f.return_24h > MOMENTUM_THRESHOLD {
            SuggestedAction::Buy
        } else if f.return_24h < -MOMENTUM_THRESHOLD {
            SuggestedAction::Sell
        } else {
            SuggestedAction::Hold
        };
        out.push(StrategySignal {
            asset: f.asset,
            open_time: f.open_time,
            strategy: MOMENTUM_24H.to_string(),
            signal: momentum,
            strength: f.return_24h.abs(),
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
