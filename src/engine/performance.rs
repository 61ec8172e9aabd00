//! Calendar-month performance from the equity history and the trade log.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::market::pct_change;
use crate::types::{PortfolioSnapshot, Trade};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPerformance {
    /// `YYYY-MM`, UTC.
    pub month: String,
    pub start_value: Decimal,
    pub end_value: Decimal,
    pub return_pct: Decimal,
    pub trade_count: u32,
    pub fees: Decimal,
}

#[derive(Default)]
struct MonthBucket {
    first: Option<Decimal>,
    last: Option<Decimal>,
    trade_count: u32,
    fees: Decimal,
}

/// One row per month that has a snapshot or a trade, oldest first.
///
/// A month starts from the previous month's closing value when there is
/// one, otherwise from its own first snapshot.
pub fn monthly(snapshots: &[PortfolioSnapshot], trades: &[Trade]) -> Vec<MonthlyPerformance> {
    let mut ordered: Vec<&PortfolioSnapshot> = snapshots.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);

    let mut months: BTreeMap<String, MonthBucket> = BTreeMap::new();
    for s in ordered {
        let bucket = months.entry(month_key(s)).or_default();
        bucket.first.get_or_insert(s.total_value);
        bucket.last = Some(s.total_value);
    }
    for t in trades {
        let bucket = months
            .entry(t.timestamp.format("%Y-%m").to_string())
            .or_default();
        bucket.trade_count += 1;
        bucket.fees += t.fee;
    }

    let mut previous_close: Option<Decimal> = None;
    months
        .into_iter()
        .map(|(month, b)| {
            let start_value = previous_close.or(b.first).unwrap_or(Decimal::ZERO);
            let end_value = b.last.unwrap_or(start_value);
            previous_close = Some(end_value);
            MonthlyPerformance {
                month,
                start_value,
                end_value,
                return_pct: pct_change(start_value, end_value),
                trade_count: b.trade_count,
                fees: b.fees,
            }
        })
        .collect()
}

fn month_key(s: &PortfolioSnapshot) -> String {
    s.timestamp.format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, TradeSide, TradeSource};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn snap(ts: DateTime<Utc>, value: Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot {
            id: None,
            timestamp: ts,
            cash_usd: value,
            btc_qty: Decimal::ZERO,
            eth_qty: Decimal::ZERO,
            btc_price: dec!(50000),
            eth_price: dec!(3000),
            total_value: value,
        }
    }

    fn trade(ts: DateTime<Utc>, fee: Decimal) -> Trade {
        Trade {
            id: None,
            timestamp: ts,
            asset: Asset::Btc,
            side: TradeSide::Buy,
            quantity: dec!(0.01),
            price: dec!(50000),
            notional: dec!(500),
            fee,
            source: TradeSource::Agent,
            decision_id: None,
            note: String::new(),
        }
    }

    #[test]
    fn test_monthly_chains_closing_values() {
        let jan = |d| Utc.with_ymd_and_hms(2024, 1, d, 12, 0, 0).unwrap();
        let feb = |d| Utc.with_ymd_and_hms(2024, 2, d, 12, 0, 0).unwrap();
        let snapshots = vec![
            snap(feb(3), dec!(11550)),
            snap(jan(1), dec!(10000)),
            snap(jan(31), dec!(11000)),
        ];
        let trades = vec![trade(jan(5), dec!(0.5)), trade(jan(9), dec!(0.5)), trade(feb(2), dec!(1))];

        let rows = monthly(&snapshots, &trades);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].month, "2024-01");
        assert_eq!(rows[0].start_value, dec!(10000));
        assert_eq!(rows[0].end_value, dec!(11000));
        assert_eq!(rows[0].return_pct, dec!(10));
        assert_eq!(rows[0].trade_count, 2);
        assert_eq!(rows[0].fees, dec!(1));

        assert_eq!(rows[1].month, "2024-02");
        assert_eq!(rows[1].start_value, dec!(11000));
        assert_eq!(rows[1].return_pct, dec!(5));
        assert_eq!(rows[1].trade_count, 1);
    }

    #[test]
    fn test_month_with_trades_but_no_snapshots() {
        let rows = monthly(&[], &[trade(Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(), dec!(2))]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_value, Decimal::ZERO);
        assert_eq!(rows[0].return_pct, Decimal::ZERO);
        assert_eq!(rows[0].fees, dec!(2));
    }

    #[test]
    fn test_empty_history() {
        assert!(monthly(&[], &[]).is_empty());
    }
}
