//! Dashboard API exercised through the router, without binding a socket.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::mock_sources::{news_item, ScriptedLlm, ScriptedMarket, StaticNews};
use crypto_agent::config::AppConfig;
use crypto_agent::dashboard::{build_router, DashboardState};
use crypto_agent::engine::{AgentRunner, MarketWorker};
use crypto_agent::exogenous::classifier::NewsClassifier;
use crypto_agent::exogenous::ExogenousPipeline;
use crypto_agent::llm::LlmClient;
use crypto_agent::market::MarketDataSource;
use crypto_agent::storage::Database;

struct App {
    router: Router,
    llm: Arc<ScriptedLlm>,
    market: Arc<ScriptedMarket>,
    worker: MarketWorker,
}

async fn app() -> App {
    let db = Database::in_memory().await.unwrap();
    let mut config = AppConfig::default();
    config.dashboard.static_dir = None;

    let market = Arc::new(ScriptedMarket::new(dec!(60000), dec!(3000)));
    let llm = Arc::new(ScriptedLlm::new(
        r#"{"direction":"BEARISH","confidence":0.9,"horizon":"MEDIUM","theme":"regulation"}"#,
    ));
    let market_dyn: Arc<dyn MarketDataSource> = market.clone();
    let llm_dyn: Arc<dyn LlmClient> = llm.clone();

    let news = StaticNews::default().with_items(
        "coindesk",
        vec![news_item("coindesk", "Regulator sues major exchange", "https://example.com/sec", 1)],
    );

    let agent = AgentRunner::new(
        db.clone(),
        market_dyn.clone(),
        Some(llm_dyn.clone()),
        config.risk.clone(),
        config.agent.initial_cash_usd,
    );
    let exogenous = ExogenousPipeline::new(
        db.clone(),
        Arc::new(news),
        Some(NewsClassifier::new(llm_dyn)),
        config.exogenous.clone(),
    );
    let worker = MarketWorker::new(db.clone(), market_dyn.clone(), 120);

    let state = Arc::new(DashboardState {
        db,
        agent: Arc::new(agent),
        exogenous: Arc::new(exogenous),
        market: market_dyn,
        config,
    });

    App {
        router: build_router(state),
        llm,
        market,
        worker,
    }
}

async fn call(app: &App, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 10_000_000).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_agent_tick_over_http() {
    let app = app().await;
    app.llm.push_suggestion(
        r#"{"action":"BUY","asset":"ETH","sizeUsd":600,"confidence":65,"reasoning":"oversold"}"#,
    );

    let (status, decision) = call(&app, Method::POST, "/api/agent/run-once", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["status"], "OK");
    assert_eq!(decision["approved"], true);
    assert_eq!(decision["confidence"].as_f64(), Some(0.65));
    assert_eq!(decision["rationale"], "oversold");

    let (_, dash) = call(&app, Method::GET, "/api/dashboard", None).await;
    assert_eq!(dash["llmEnabled"], true);
    assert_eq!(dash["portfolio"]["ethQty"].as_f64(), Some(0.2));
    assert_eq!(dash["recentTrades"].as_array().unwrap().len(), 1);
    assert_eq!(dash["recentDecisions"].as_array().unwrap().len(), 1);
    let positions = dash["positions"].as_array().unwrap();
    assert_eq!(positions.len(), 2);
    assert_eq!(positions[1]["asset"], "ETH");
    assert_eq!(positions[1]["quantity"].as_f64(), Some(0.2));
    assert!(dash["marketError"].is_null());
}

#[tokio::test]
async fn test_dashboard_survives_market_outage() {
    let app = app().await;
    // Seed an equity snapshot at known prices.
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/manual-trades",
        Some(json!({"asset": "BTC", "side": "BUY", "usd": 1200})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    app.market.fail_with("exchange unreachable");
    let (status, dash) = call(&app, Method::GET, "/api/dashboard", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(dash["market"].is_null());
    assert!(dash["marketError"].as_str().unwrap().contains("unreachable"));
    // Valued at the snapshot's prices: 0.02 BTC at 60000 plus remaining cash.
    assert_eq!(dash["valuation"]["total"].as_f64(), Some(9998.8));

    let (status, _) = call(&app, Method::POST, "/api/agent/run-once", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_exogenous_refresh_over_http() {
    let app = app().await;
    let (status, report) = call(&app, Method::POST, "/api/exogenous/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["newItems"], 1);
    assert_eq!(report["classified"], 1);

    let (_, items) = call(&app, Method::GET, "/api/exogenous/items?limit=10", None).await;
    assert_eq!(items[0]["direction"], "BEARISH");
    assert_eq!(items[0]["theme"], "regulation");

    let (_, narratives) = call(&app, Method::GET, "/api/exogenous/narratives", None).await;
    assert_eq!(narratives.as_array().unwrap().len(), 1);

    let (_, modifiers) = call(&app, Method::GET, "/api/exogenous/modifiers", None).await;
    assert!(modifiers["netScore"].as_f64().unwrap() < 0.0);

    // Second refresh inside the cooldown window.
    let (status, body) = call(&app, Method::POST, "/api/exogenous/refresh", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"].as_str().unwrap().contains("cooling down"));
}

#[tokio::test]
async fn test_backtest_over_http() {
    let app = app().await;
    app.worker.run_once().await.unwrap();

    let (status, report) = call(
        &app,
        Method::POST,
        "/api/backtests",
        Some(json!({"asset": "ETH", "strategy": "momentum_24h", "hours": 120})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["run"]["status"], "COMPLETED");
    let id = report["run"]["id"].as_str().unwrap().to_string();

    let (status, fetched) = call(&app, Method::GET, &format!("/api/backtests/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["run"]["id"], id.as_str());
    assert_eq!(fetched["metrics"], report["metrics"]);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/backtests",
        Some(json!({"asset": "ETH", "strategy": "moon_shot"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
