//! Strategy layer: portfolio valuation, the risk engine and the hourly
//! feature/regime/signal calculations.

pub mod features;
pub mod risk;
pub mod valuation;

pub use risk::{RiskDecision, RiskEngine, RiskOutcome};
pub use valuation::{PortfolioValuationService, Valuation};
