//! Core engine: the agent tick, manual trades, the candle worker,
//! performance reporting and the timer loops that drive them.

pub mod agent;
pub mod manual;
pub mod market_worker;
pub mod performance;
pub mod scheduler;

pub use agent::AgentRunner;
pub use manual::{execute_manual, ManualTradeRequest, ManualTradeResult};
pub use market_worker::{MarketWorker, MarketWorkerReport};
pub use performance::{monthly, MonthlyPerformance};
pub use scheduler::Scheduler;

use chrono::{DateTime, Utc};

use crate::storage::{Database, DbResult};
use crate::strategy::PortfolioValuationService;
use crate::types::{MarketSnapshot, Portfolio, PortfolioSnapshot};

/// Midnight UTC of the day containing `now`.
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// Value `portfolio` at `snapshot` prices and append it to the equity history.
pub async fn record_equity(
    db: &Database,
    portfolio: &Portfolio,
    snapshot: &MarketSnapshot,
) -> DbResult<PortfolioSnapshot> {
    let valuation = PortfolioValuationService::value(portfolio, snapshot);
    let mut snap = PortfolioSnapshot {
        id: None,
        timestamp: Utc::now(),
        cash_usd: portfolio.cash_usd,
        btc_qty: portfolio.btc_qty,
        eth_qty: portfolio.eth_qty,
        btc_price: snapshot.btc_price,
        eth_price: snapshot.eth_price,
        total_value: valuation.total,
    };
    snap.id = Some(db.portfolio().insert_snapshot(&snap).await?);
    Ok(snap)
}
