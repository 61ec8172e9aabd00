//! Per-item exogenous scoring.
//!
//! contribution = credibility × confidence × horizon weight × decay × sign
//!
//! Decay is exponential with a half-life chosen by the item's horizon, so
//! short-horizon headlines fade within hours while long-horizon themes
//! persist for weeks.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;

use super::ExogenousItem;
use crate::config::ExogenousConfig;
use crate::types::{ClassificationStatus, Horizon};

pub struct ExogenousScoring;

impl ExogenousScoring {
    /// Configured credibility for a source (case-insensitive), else the default.
    pub fn source_credibility(source: &str, cfg: &ExogenousConfig) -> Decimal {
        cfg.source_credibility
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(source))
            .map(|(_, c)| *c)
            .unwrap_or(cfg.default_credibility)
            .clamp(Decimal::ZERO, Decimal::ONE)
    }

    /// (half-life in hours, weight) for a horizon.
    pub fn horizon_params(horizon: Horizon, cfg: &ExogenousConfig) -> (f64, Decimal) {
        match horizon {
            Horizon::Short => (cfg.short_half_life_hours, cfg.short_weight),
            Horizon::Medium => (cfg.medium_half_life_hours, cfg.medium_weight),
            Horizon::Long => (cfg.long_half_life_hours, cfg.long_weight),
        }
    }

    /// 0.5^(age / half_life). Negative ages (future timestamps) count as 0.
    pub fn decay(age_hours: f64, half_life_hours: f64) -> f64 {
        if half_life_hours <= 0.0 {
            return 0.0;
        }
        0.5f64.powf(age_hours.max(0.0) / half_life_hours)
    }

    /// Signed contribution of one item at `now`.
    /// Items that are not classified contribute zero.
    pub fn compute_contribution(
        item: &ExogenousItem,
        credibility: Decimal,
        now: DateTime<Utc>,
        cfg: &ExogenousConfig,
    ) -> Decimal {
        if item.status != ClassificationStatus::Classified {
            return Decimal::ZERO;
        }
        let (Some(direction), Some(confidence), Some(horizon)) =
            (item.direction, item.confidence, item.horizon)
        else {
            return Decimal::ZERO;
        };

        let (half_life, weight) = Self::horizon_params(horizon, cfg);
        let age_hours = (now - item.published_at).num_seconds() as f64 / 3600.0;
        let decay = Decimal::from_f64(Self::decay(age_hours, half_life)).unwrap_or(Decimal::ZERO);

        (credibility * confidence.clamp(Decimal::ZERO, Decimal::ONE) * weight * decay * direction.sign())
            .round_dp(6)
    }

    /// Score with the item's own source credibility.
    pub fn score_item(item: &ExogenousItem, now: DateTime<Utc>, cfg: &ExogenousConfig) -> Decimal {
        let credibility = Self::source_credibility(&item.source, cfg);
        Self::compute_contribution(item, credibility, now, cfg)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn item(direction: Direction, confidence: Decimal, horizon: Horizon, age_h: i64) -> ExogenousItem {
        let now = Utc::now();
        ExogenousItem {
            status: ClassificationStatus::Classified,
            direction: Some(direction),
            confidence: Some(confidence),
            horizon: Some(horizon),
            published_at: now - Duration::hours(age_h),
            ..ExogenousItem::new("coindesk", "title", "https://x/1", "", now)
        }
    }

    fn cfg() -> ExogenousConfig {
        ExogenousConfig::default()
    }

    #[test]
    fn test_fresh_bullish_short_item() {
        let now = Utc::now();
        let mut it = item(Direction::Bullish, dec!(0.8), Horizon::Short, 0);
        it.published_at = now;
        let c = ExogenousScoring::compute_contribution(&it, dec!(0.5), now, &cfg());
        assert_eq!(c, dec!(0.4));
    }

    #[test]
    fn test_half_life_halves_contribution() {
        let now = Utc::now();
        let mut it = item(Direction::Bullish, dec!(1), Horizon::Short, 0);
        it.published_at = now - Duration::hours(6);
        let c = ExogenousScoring::compute_contribution(&it, dec!(1), now, &cfg());
        assert_eq!(c, dec!(0.5));
    }

    #[test]
    fn test_bearish_is_negative_and_neutral_is_zero() {
        let now = Utc::now();
        let bear = item(Direction::Bearish, dec!(0.9), Horizon::Medium, 1);
        let neutral = item(Direction::Neutral, dec!(0.9), Horizon::Medium, 1);
        assert!(ExogenousScoring::compute_contribution(&bear, dec!(0.7), now, &cfg()) < dec!(0));
        assert_eq!(ExogenousScoring::compute_contribution(&neutral, dec!(0.7), now, &cfg()), dec!(0));
    }

    #[test]
    fn test_monotonic_in_confidence() {
        let now = Utc::now();
        let mut last = Decimal::MIN;
        for conf in [dec!(0.1), dec!(0.4), dec!(0.7), dec!(1.0)] {
            let c = ExogenousScoring::compute_contribution(
                &item(Direction::Bullish, conf, Horizon::Medium, 3),
                dec!(0.6),
                now,
                &cfg(),
            );
            assert!(c >= last);
            last = c;
        }
    }

    #[test]
    fn test_monotonic_in_credibility() {
        let now = Utc::now();
        let it = item(Direction::Bullish, dec!(0.8), Horizon::Long, 10);
        let low = ExogenousScoring::compute_contribution(&it, dec!(0.2), now, &cfg());
        let high = ExogenousScoring::compute_contribution(&it, dec!(0.9), now, &cfg());
        assert!(high > low);
    }

    #[test]
    fn test_decays_with_age() {
        let now = Utc::now();
        let young = item(Direction::Bullish, dec!(0.8), Horizon::Short, 1);
        let old = item(Direction::Bullish, dec!(0.8), Horizon::Short, 24);
        let young_c = ExogenousScoring::compute_contribution(&young, dec!(0.5), now, &cfg());
        let old_c = ExogenousScoring::compute_contribution(&old, dec!(0.5), now, &cfg());
        assert!(young_c > old_c);
        assert!(old_c > dec!(0));
    }

    #[test]
    fn test_long_horizon_decays_slower() {
        let now = Utc::now();
        let short = item(Direction::Bullish, dec!(1), Horizon::Short, 48);
        let long = item(Direction::Bullish, dec!(1), Horizon::Long, 48);
        assert!(
            ExogenousScoring::compute_contribution(&long, dec!(1), now, &cfg())
                > ExogenousScoring::compute_contribution(&short, dec!(1), now, &cfg())
        );
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        assert_eq!(ExogenousScoring::decay(-5.0, 6.0), 1.0);
        assert_eq!(ExogenousScoring::decay(1.0, 0.0), 0.0);
    }

    #[test]
    fn test_unclassified_contributes_zero() {
        let now = Utc::now();
        let mut it = item(Direction::Bullish, dec!(1), Horizon::Short, 0);
        it.status = ClassificationStatus::Pending;
        assert_eq!(ExogenousScoring::compute_contribution(&it, dec!(1), now, &cfg()), dec!(0));
    }

    #[test]
    fn test_source_credibility_lookup() {
        let mut c = cfg();
        c.source_credibility.insert("CoinDesk".to_string(), dec!(0.8));
        assert_eq!(ExogenousScoring::source_credibility("coindesk", &c), dec!(0.8));
        assert_eq!(ExogenousScoring::source_credibility("unknown", &c), dec!(0.5));
    }
}
