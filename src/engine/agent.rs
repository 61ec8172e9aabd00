//! The agent tick.
//!
//! snapshot → trades today → exogenous modifiers → LLM suggestion →
//! risk engine → persist decision, fill and portfolio → equity snapshot.
//!
//! Ticks are serialised by a mutex shared with manual trades, so the timer
//! loop and the HTTP endpoints never interleave portfolio updates.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::manual::{execute_manual, ManualTradeRequest, ManualTradeResult};
use super::{record_equity, start_of_utc_day};
use crate::config::RiskConfig;
use crate::exogenous::{load_modifiers, ExogenousModifiers};
use crate::llm::prompts::{
    build_suggestion_prompt, parse_suggestion, SuggestionContext, SUGGESTION_SYSTEM_PROMPT,
};
use crate::llm::LlmClient;
use crate::market::MarketDataSource;
use crate::storage::Database;
use crate::strategy::{PortfolioValuationService, RiskEngine};
use crate::types::{
    Asset, DecisionLog, DecisionStatus, MarketSnapshot, Portfolio, TradeSource, TradeSuggestion,
};

/// Model name logged when no LLM is configured.
pub const NO_MODEL: &str = "none";

pub struct AgentRunner {
    db: Database,
    market: Arc<dyn MarketDataSource>,
    llm: Option<Arc<dyn LlmClient>>,
    limits: RiskConfig,
    initial_cash: Decimal,
    portfolio_lock: Mutex<()>,
}

/// What the suggestion step produced, before the risk check.
struct SuggestionOutcome {
    suggestion: TradeSuggestion,
    status: DecisionStatus,
    model: String,
    error: Option<String>,
}

impl AgentRunner {
    pub fn new(
        db: Database,
        market: Arc<dyn MarketDataSource>,
        llm: Option<Arc<dyn LlmClient>>,
        limits: RiskConfig,
        initial_cash: Decimal,
    ) -> Self {
        Self {
            db,
            market,
            llm,
            limits,
            initial_cash,
            portfolio_lock: Mutex::new(()),
        }
    }

    pub fn llm_enabled(&self) -> bool {
        self.llm.is_some()
    }

    /// Run one tick and return the persisted decision.
    ///
    /// Market-data and storage failures abort the tick. LLM failures do
    /// not: they are logged as a FAILED decision that holds.
    pub async fn run_once(&self) -> Result<DecisionLog> {
        let _guard = self.portfolio_lock.lock().await;
        let run_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let snapshot = self
            .market
            .snapshot()
            .await
            .context("Failed to fetch market snapshot")?;
        let portfolio = self
            .db
            .portfolio()
            .load_or_init(self.initial_cash)
            .await
            .context("Failed to load portfolio")?;
        let trades_today = self
            .db
            .trades()
            .count_since(TradeSource::Agent, start_of_utc_day(now))
            .await
            .context("Failed to count today's trades")?;
        let modifiers = load_modifiers(&self.db).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load exogenous modifiers, using neutral");
            ExogenousModifiers::neutral()
        });

        let suggested = self
            .suggest(&snapshot, &portfolio, trades_today, &modifiers)
            .await;
        let outcome = RiskEngine::apply(
            &suggested.suggestion,
            &portfolio,
            &snapshot,
            trades_today,
            &self.limits,
        );

        let s = &suggested.suggestion;
        let mut decision = DecisionLog {
            id: None,
            timestamp: now,
            run_id,
            model: suggested.model,
            status: suggested.status,
            action: s.action,
            asset: s.asset,
            size_usd: s.size_usd,
            confidence: s.confidence,
            rationale: s.rationale.clone(),
            approved: outcome.decision.approved,
            risk_reason: outcome.decision.reason.clone(),
            error: suggested.error,
            btc_price: snapshot.btc_price,
            eth_price: snapshot.eth_price,
            exogenous_score: modifiers.net_score,
            exogenous_bias: modifiers.bias,
            trade_id: None,
        };
        let decision_id = self
            .db
            .decisions()
            .insert(&decision)
            .await
            .context("Failed to save decision")?;
        decision.id = Some(decision_id);

        let portfolio_after = match outcome.trade {
            Some(mut trade) => {
                trade.decision_id = Some(decision_id);
                let trade_id = self
                    .db
                    .trades()
                    .record_fill(&trade, &outcome.portfolio)
                    .await
                    .context("Failed to record fill")?;
                self.db
                    .decisions()
                    .set_trade(decision_id, trade_id)
                    .await
                    .context("Failed to link trade to decision")?;
                decision.trade_id = Some(trade_id);
                trade.id = Some(trade_id);
                info!(%trade, "Paper trade executed");
                outcome.portfolio
            }
            None => portfolio,
        };

        let equity = record_equity(&self.db, &portfolio_after, &snapshot)
            .await
            .context("Failed to record portfolio snapshot")?;

        info!(
            run_id = %decision.run_id,
            status = %decision.status,
            action = %decision.action,
            approved = decision.approved,
            reason = %decision.risk_reason,
            total_value = format!("${:.2}", equity.total_value),
            bias = %decision.exogenous_bias,
            "Agent tick complete"
        );
        Ok(decision)
    }

    /// Execute a manual trade under the same lock as the agent tick.
    pub async fn manual_trade(&self, req: &ManualTradeRequest) -> Result<ManualTradeResult> {
        let _guard = self.portfolio_lock.lock().await;
        execute_manual(
            &self.db,
            self.market.as_ref(),
            &self.limits,
            self.initial_cash,
            req,
        )
        .await
    }

    async fn suggest(
        &self,
        snapshot: &MarketSnapshot,
        portfolio: &Portfolio,
        trades_today: u32,
        modifiers: &ExogenousModifiers,
    ) -> SuggestionOutcome {
        let Some(llm) = &self.llm else {
            return SuggestionOutcome {
                suggestion: TradeSuggestion::hold("LLM disabled"),
                status: DecisionStatus::Skipped,
                model: NO_MODEL.to_string(),
                error: None,
            };
        };

        let mut regimes = Vec::new();
        for &asset in Asset::ALL {
            match self.db.market().latest_regime(asset).await {
                Ok(Some(r)) => regimes.push(r),
                Ok(None) => {}
                Err(e) => warn!(asset = %asset, error = %e, "Failed to load regime"),
            }
        }

        let valuation = PortfolioValuationService::value(portfolio, snapshot);
        let prompt = build_suggestion_prompt(&SuggestionContext {
            snapshot,
            portfolio,
            valuation: &valuation,
            limits: &self.limits,
            trades_today,
            regimes: &regimes,
            modifiers,
        });

        let reply = match llm.complete(SUGGESTION_SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => reply,
            Err(e) => return Self::failed(llm.model_name(), e),
        };
        match parse_suggestion(&reply.text) {
            Ok(suggestion) => SuggestionOutcome {
                suggestion,
                status: DecisionStatus::Ok,
                model: reply.model,
                error: None,
            },
            Err(e) => Self::failed(reply.model, e),
        }
    }

    fn failed(model: String, e: anyhow::Error) -> SuggestionOutcome {
        error!(model = %model, error = %e, "Trade suggestion failed");
        SuggestionOutcome {
            suggestion: TradeSuggestion::hold("suggestion failed"),
            status: DecisionStatus::Failed,
            model,
            error: Some(format!("{e:#}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
