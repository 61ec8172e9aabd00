//! crypto-agent: paper-trading BTC/ETH agent.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the SQLite store, schedules the market-data, exogenous and agent
//! loops, and serves the dashboard API until Ctrl+C.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crypto_agent::config::AppConfig;
use crypto_agent::dashboard::{self, DashboardState};
use crypto_agent::engine::{AgentRunner, MarketWorker, Scheduler};
use crypto_agent::exogenous::classifier::NewsClassifier;
use crypto_agent::exogenous::rss::RssFetcher;
use crypto_agent::exogenous::{ExogenousPipeline, RefreshRejection};
use crypto_agent::llm::openrouter::OpenRouterClient;
use crypto_agent::llm::LlmClient;
use crypto_agent::market::binance::BinanceMarketData;
use crypto_agent::market::MarketDataSource;
use crypto_agent::storage::Database;

const BANNER: &str = r#"
   ____                  _
  / ___|_ __ _   _ _ __ | |_ ___
 | |   | '__| | | | '_ \| __/ _ \
 | |___| |  | |_| | |_) | || (_) |
  \____|_|   \__, | .__/ \__\___/
             |___/|_|        agent

  v0.1.0 | BTC/ETH paper trading
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load(&AppConfig::default_path())?;
    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        interval_secs = cfg.agent.interval_secs,
        initial_cash = format!("${:.2}", cfg.agent.initial_cash_usd),
        llm_model = %cfg.llm.model,
        "crypto-agent starting up"
    );

    // -- Storage ---------------------------------------------------------

    let db_path = Path::new(&cfg.storage.database_path);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
    }
    let db = Database::new(db_path).await?;

    // -- Clients ---------------------------------------------------------

    let market: Arc<dyn MarketDataSource> =
        Arc::new(BinanceMarketData::new(&cfg.market_data.base_url)?);

    let llm: Option<Arc<dyn LlmClient>> = match (cfg.llm.enabled, cfg.llm.api_key()) {
        (true, Some(key)) => {
            info!(model = %cfg.llm.model, "Using OpenRouter LLM provider");
            Some(Arc::new(OpenRouterClient::new(&cfg.llm, key)?))
        }
        (true, None) => {
            warn!(
                env = %cfg.llm.api_key_env,
                "LLM enabled but no API key set; agent ticks will be skipped"
            );
            None
        }
        (false, _) => {
            info!("LLM disabled; agent ticks will be skipped");
            None
        }
    };

    // -- Services --------------------------------------------------------

    let agent = Arc::new(AgentRunner::new(
        db.clone(),
        market.clone(),
        llm.clone(),
        cfg.risk.clone(),
        cfg.agent.initial_cash_usd,
    ));
    let worker = Arc::new(MarketWorker::new(
        db.clone(),
        market.clone(),
        cfg.market_data.candle_limit,
    ));
    let exogenous = Arc::new(ExogenousPipeline::new(
        db.clone(),
        Arc::new(RssFetcher::new()?),
        llm.map(NewsClassifier::new),
        cfg.exogenous.clone(),
    ));

    // -- Timer loops -----------------------------------------------------

    let mut scheduler = Scheduler::new();

    if cfg.market_data.enabled {
        let worker = worker.clone();
        scheduler.every(
            "market-data",
            Duration::from_secs(cfg.market_data.interval_secs),
            move || {
                let worker = worker.clone();
                async move { worker.run_once().await.map(|_| ()) }
            },
        );
    }

    if cfg.exogenous.enabled {
        let pipeline = exogenous.clone();
        scheduler.every(
            "exogenous",
            Duration::from_secs(cfg.exogenous.interval_secs),
            move || {
                let pipeline = pipeline.clone();
                async move {
                    // Shares the gate with the HTTP refresh endpoint.
                    let _permit = match pipeline.gate().try_begin() {
                        Ok(p) => p,
                        Err(RefreshRejection::Busy) => return Ok(()),
                        Err(r @ RefreshRejection::CoolingDown { .. }) => {
                            info!(reason = %r, "Skipping scheduled exogenous refresh");
                            return Ok(());
                        }
                    };
                    pipeline.refresh().await.map(|_| ())
                }
            },
        );
    }

    if cfg.agent.enabled {
        let agent = agent.clone();
        scheduler.every(
            "agent",
            Duration::from_secs(cfg.agent.interval_secs),
            move || {
                let agent = agent.clone();
                async move { agent.run_once().await.map(|_| ()) }
            },
        );
    }

    info!(jobs = scheduler.job_count(), "Timer loops started");

    // -- Dashboard -------------------------------------------------------

    let addr: SocketAddr = format!("{}:{}", cfg.dashboard.host, cfg.dashboard.port)
        .parse()
        .context("Invalid dashboard host/port")?;
    let state = Arc::new(DashboardState {
        db,
        agent,
        exogenous,
        market,
        config: cfg,
    });

    info!("Press Ctrl+C to stop.");
    let served = dashboard::serve(state, addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received.");
    })
    .await;

    let failed = scheduler.shutdown().await;
    if failed > 0 {
        warn!(failed, "Some timer loops ended abnormally");
    }
    info!("crypto-agent shut down.");
    served
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crypto_agent=info"));

    let json_logging = std::env::var("CRYPTO_AGENT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
