//! Database schema definitions.

/// SQL to create all tables.
/// NOTE: prices, quantities and scores are TEXT to preserve
/// `rust_decimal::Decimal` precision; timestamps are unix milliseconds.
pub const CREATE_TABLES: &str = r#"
-- Singleton paper portfolio
CREATE TABLE IF NOT EXISTS portfolio (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    cash_usd TEXT NOT NULL,
    btc_qty TEXT NOT NULL DEFAULT '0',
    eth_qty TEXT NOT NULL DEFAULT '0',
    updated_at INTEGER NOT NULL
);

-- Equity history
CREATE TABLE IF NOT EXISTS portfolio_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    cash_usd TEXT NOT NULL,
    btc_qty TEXT NOT NULL,
    eth_qty TEXT NOT NULL,
    btc_price TEXT NOT NULL,
    eth_price TEXT NOT NULL,
    total_value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    asset TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity TEXT NOT NULL,
    price TEXT NOT NULL,
    notional TEXT NOT NULL,
    fee TEXT NOT NULL DEFAULT '0',
    source TEXT NOT NULL,
    decision_id INTEGER,
    note TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS decision_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    run_id TEXT NOT NULL,
    model TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    action TEXT NOT NULL,
    asset TEXT,
    size_usd TEXT NOT NULL DEFAULT '0',
    confidence TEXT NOT NULL DEFAULT '0',
    rationale TEXT NOT NULL DEFAULT '',
    approved INTEGER NOT NULL DEFAULT 0,
    risk_reason TEXT NOT NULL DEFAULT '',
    error TEXT,
    btc_price TEXT NOT NULL DEFAULT '0',
    eth_price TEXT NOT NULL DEFAULT '0',
    exogenous_score TEXT NOT NULL DEFAULT '0',
    exogenous_bias TEXT NOT NULL DEFAULT 'NEUTRAL',
    trade_id INTEGER
);

CREATE TABLE IF NOT EXISTS narratives (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    label TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    direction TEXT NOT NULL DEFAULT 'NEUTRAL',
    score TEXT NOT NULL DEFAULT '0',
    item_count INTEGER NOT NULL DEFAULT 0,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS exogenous_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    summary TEXT NOT NULL DEFAULT '',
    published_at INTEGER NOT NULL,
    fetched_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    direction TEXT,
    confidence TEXT,
    horizon TEXT,
    theme TEXT,
    error TEXT,
    contribution TEXT NOT NULL DEFAULT '0',
    narrative_id INTEGER REFERENCES narratives(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS hourly_candles (
    asset TEXT NOT NULL,
    open_time INTEGER NOT NULL,
    open TEXT NOT NULL,
    high TEXT NOT NULL,
    low TEXT NOT NULL,
    close TEXT NOT NULL,
    volume TEXT NOT NULL,
    UNIQUE(asset, open_time)
);

CREATE TABLE IF NOT EXISTS hourly_features (
    asset TEXT NOT NULL,
    open_time INTEGER NOT NULL,
    close TEXT NOT NULL,
    return_1h TEXT NOT NULL,
    return_24h TEXT NOT NULL,
    volatility_24h TEXT NOT NULL,
    sma_fast TEXT NOT NULL,
    sma_slow TEXT NOT NULL,
    UNIQUE(asset, open_time)
);

CREATE TABLE IF NOT EXISTS regime_states (
    asset TEXT NOT NULL,
    open_time INTEGER NOT NULL,
    regime TEXT NOT NULL,
    trend_strength TEXT NOT NULL,
    volatility TEXT NOT NULL,
    UNIQUE(asset, open_time)
);

CREATE TABLE IF NOT EXISTS strategy_signals (
    asset TEXT NOT NULL,
    open_time INTEGER NOT NULL,
    strategy TEXT NOT NULL,
    signal TEXT NOT NULL,
    strength TEXT NOT NULL,
    UNIQUE(asset, open_time, strategy)
);

CREATE TABLE IF NOT EXISTS backtest_runs (
    id TEXT PRIMARY KEY,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    asset TEXT NOT NULL,
    strategy TEXT NOT NULL,
    status TEXT NOT NULL,
    initial_cash TEXT NOT NULL,
    final_value TEXT,
    params TEXT NOT NULL DEFAULT '{}',
    error TEXT
);

CREATE TABLE IF NOT EXISTS backtest_steps (
    run_id TEXT NOT NULL REFERENCES backtest_runs(id) ON DELETE CASCADE,
    step INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    price TEXT NOT NULL,
    signal TEXT NOT NULL,
    cash TEXT NOT NULL,
    qty TEXT NOT NULL,
    total_value TEXT NOT NULL,
    UNIQUE(run_id, step)
);

CREATE TABLE IF NOT EXISTS backtest_trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES backtest_runs(id) ON DELETE CASCADE,
    timestamp INTEGER NOT NULL,
    side TEXT NOT NULL,
    quantity TEXT NOT NULL,
    price TEXT NOT NULL,
    fee TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backtest_metrics (
    run_id TEXT NOT NULL REFERENCES backtest_runs(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(run_id, name)
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
CREATE INDEX IF NOT EXISTS idx_trades_source ON trades(source, timestamp);
CREATE INDEX IF NOT EXISTS idx_decisions_timestamp ON decision_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON portfolio_snapshots(timestamp);
CREATE INDEX IF NOT EXISTS idx_items_status ON exogenous_items(status);
CREATE INDEX IF NOT EXISTS idx_items_published ON exogenous_items(published_at);
CREATE INDEX IF NOT EXISTS idx_items_narrative ON exogenous_items(narrative_id);
CREATE INDEX IF NOT EXISTS idx_backtest_trades_run ON backtest_trades(run_id)
"#;
