//! Database schema definitions

/// SQL to create all tables
/// NOTE: prices and sizes are stored as TEXT to keep rust_decimal::Decimal precision
pub const CREATE_TABLES: &str = r#"
-- Market scanner results (one row per scored symbol)
CREATE TABLE IF NOT EXISTS scan_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    score REAL NOT NULL,
    technical_score REAL,
    news_score REAL,
    social_score REAL,
    successful_layers INTEGER NOT NULL DEFAULT 0,
    rsi REAL,
    alerted INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Normalized positions captured on every analysis run
CREATE TABLE IF NOT EXISTS position_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    platform TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    entry_price TEXT NOT NULL DEFAULT '0',
    mark_price TEXT NOT NULL DEFAULT '0',
    unrealized_pnl_pct TEXT NOT NULL DEFAULT '0',
    margin_usd TEXT NOT NULL DEFAULT '0',
    leverage TEXT NOT NULL DEFAULT '1',
    has_stop_loss INTEGER NOT NULL DEFAULT 0,
    has_take_profit INTEGER NOT NULL DEFAULT 0,
    risk_tier TEXT NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_scan_symbol ON scan_results(symbol, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_scan_score ON scan_results(score DESC);
CREATE INDEX IF NOT EXISTS idx_position_run ON position_history(run_id);
CREATE INDEX IF NOT EXISTS idx_position_symbol ON position_history(symbol, created_at DESC)
"#;

/// Additive column migrations, applied after CREATE_TABLES.
/// "duplicate column name" failures are expected on an existing database.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE scan_results ADD COLUMN headline TEXT",
];
