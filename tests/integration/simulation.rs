//! End-to-end simulation.
//!
//! Drives the market-data worker, the exogenous pipeline, agent ticks,
//! a manual trade and a backtest against one in-memory database, and
//! checks the state they leave behind.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_test::assert_ok;

use crate::mock_sources::{news_item, ScriptedLlm, ScriptedMarket, StaticNews};
use crypto_agent::backtest::{metrics, run_backtest, BacktestRequest, BacktestStatus};
use crypto_agent::config::AppConfig;
use crypto_agent::engine::{monthly, AgentRunner, ManualTradeRequest, MarketWorker};
use crypto_agent::exogenous::classifier::NewsClassifier;
use crypto_agent::exogenous::ExogenousPipeline;
use crypto_agent::llm::LlmClient;
use crypto_agent::market::MarketDataSource;
use crypto_agent::storage::Database;
use crypto_agent::types::{Asset, DecisionStatus, TradeSide, TradeSource};

const BULLISH: &str =
    r#"{"direction":"BULLISH","confidence":0.8,"horizon":"SHORT","theme":"ETF flows"}"#;

struct Harness {
    db: Database,
    config: AppConfig,
    market: Arc<ScriptedMarket>,
    llm: Arc<ScriptedLlm>,
    agent: AgentRunner,
    worker: MarketWorker,
    exogenous: ExogenousPipeline,
}

async fn harness() -> Harness {
    let db = Database::in_memory().await.unwrap();
    let config = AppConfig::default();
    let market = Arc::new(ScriptedMarket::new(dec!(50000), dec!(2500)));
    let llm = Arc::new(ScriptedLlm::new(BULLISH));

    let news = StaticNews::default()
        .with_items(
            "coindesk",
            vec![
                news_item("coindesk", "Bitcoin ETF inflows hit record", "https://example.com/a", 2),
                news_item("coindesk", "Record ETF inflows lift bitcoin", "https://example.com/b", 3),
            ],
        )
        .with_error("cointelegraph", "connection reset");

    let market_dyn: Arc<dyn MarketDataSource> = market.clone();
    let llm_dyn: Arc<dyn LlmClient> = llm.clone();

    let agent = AgentRunner::new(
        db.clone(),
        market_dyn.clone(),
        Some(llm_dyn.clone()),
        config.risk.clone(),
        config.agent.initial_cash_usd,
    );
    let worker = MarketWorker::new(db.clone(), market_dyn, 200);
    let exogenous = ExogenousPipeline::new(
        db.clone(),
        Arc::new(news),
        Some(NewsClassifier::new(llm_dyn)),
        config.exogenous.clone(),
    );

    Harness {
        db,
        config,
        market,
        llm,
        agent,
        worker,
        exogenous,
    }
}

#[tokio::test]
async fn test_full_trading_day() {
    let h = harness().await;

    // 1. Candles, features, regimes and signals
    let report = assert_ok!(h.worker.run_once().await);
    assert!(report.failed_assets.is_empty());
    assert_eq!(report.candles, 400);
    assert!(h.db.market().latest_regime(Asset::Btc).await.unwrap().is_some());

    // 2. News: one feed works, one fails
    let refresh = assert_ok!(h.exogenous.refresh().await);
    assert_eq!(refresh.feeds_ok, 1);
    assert_eq!(refresh.feed_errors.len(), 1);
    assert_eq!(refresh.new_items, 2);
    assert_eq!(refresh.classified, 2);
    let modifiers = h.exogenous.current_modifiers().await.unwrap();
    assert!(modifiers.net_score > Decimal::ZERO);

    // 3. Agent buys BTC
    h.llm.push_suggestion(
        r#"Sure. {"action":"BUY","asset":"BTC","size_usd":1000,"confidence":0.7,"rationale":"news tailwind"}"#,
    );
    let decision = assert_ok!(h.agent.run_once().await);
    assert_eq!(decision.status, DecisionStatus::Ok);
    assert!(decision.approved, "{}", decision.risk_reason);
    assert_eq!(decision.model, "scripted-model");
    assert_eq!(decision.exogenous_score, modifiers.net_score);
    assert!(decision.trade_id.is_some());

    let prompt = &h.llm.suggestion_prompts()[0];
    assert!(prompt.contains("REGIMES (hourly)"));
    assert!(prompt.contains("NEWS BACKDROP"));

    let portfolio = h.db.portfolio().load_or_init(dec!(10000)).await.unwrap();
    assert_eq!(portfolio.btc_qty, dec!(0.02));
    assert_eq!(portfolio.cash_usd, dec!(8999));

    // 4. Agent tries to sell ETH it does not hold
    h.llm.push_suggestion(
        r#"{"action":"SELL","asset":"ETH","size_usd":500,"confidence":0.6,"rationale":"rotate"}"#,
    );
    let decision = assert_ok!(h.agent.run_once().await);
    assert_eq!(decision.status, DecisionStatus::Ok);
    assert!(!decision.approved);
    assert!(decision.trade_id.is_none());

    // 5. Price moves up, user takes partial profit by hand
    h.market.set_prices(dec!(55000), dec!(2600));
    let manual = assert_ok!(
        h.agent
            .manual_trade(&ManualTradeRequest {
                asset: Asset::Btc,
                side: TradeSide::Sell,
                quantity: Some(dec!(0.01)),
                usd: None,
                note: Some("take profit".to_string()),
            })
            .await
    );
    assert_eq!(manual.trade.source, TradeSource::Manual);
    assert_eq!(manual.portfolio.btc_qty, dec!(0.01));
    assert_eq!(manual.portfolio.cash_usd, dec!(9548.45));

    // 6. Ledger and equity history
    let trades = h.db.trades().all().await.unwrap();
    assert_eq!(trades.len(), 2);
    assert_eq!(h.db.decisions().recent(10).await.unwrap().len(), 2);
    let snapshots = h.db.portfolio().all_snapshots().await.unwrap();
    assert_eq!(snapshots.len(), 3);

    let months = monthly(&snapshots, &trades);
    assert_eq!(months.len(), 1);
    assert_eq!(months[0].trade_count, 2);
    assert_eq!(months[0].start_value, dec!(9999));
    assert!(months[0].end_value > months[0].start_value);

    // 7. Backtest the stored candles
    let req = BacktestRequest {
        asset: Asset::Btc,
        strategy: None,
        initial_cash_usd: None,
        trade_size_usd: None,
        hours: Some(200),
    };
    let bt = assert_ok!(run_backtest(&h.db, &h.config.risk, &h.config.backtest, &req).await);
    assert_eq!(bt.run.status, BacktestStatus::Completed);
    assert!(!bt.steps.is_empty());
    assert!(bt.metric(metrics::FINAL_VALUE).is_some());
    let stored = h.db.backtests().report(&bt.run.id).await.unwrap();
    assert_eq!(stored.steps.len(), bt.steps.len());
}

#[tokio::test]
async fn test_market_outage_skips_ticks_until_recovery() {
    let h = harness().await;
    h.market.fail_with("exchange unreachable");
    assert!(h.agent.run_once().await.is_err());
    assert!(h.db.decisions().recent(10).await.unwrap().is_empty());

    h.market.set_prices(dec!(48000), dec!(2400));
    h.market.clear_error();
    let decision = assert_ok!(h.agent.run_once().await);
    assert_eq!(decision.btc_price, dec!(48000));
}
