//! Portfolio Sentinel: multi-exchange position watcher and market scanner
//!
//! Usage:
//!   portfolio-sentinel serve --port 3001       Launch the HTTP API with watcher and scheduler
//!   portfolio-sentinel run --auto              Run the job scheduler from the CLI
//!   portfolio-sentinel positions --json        Print normalized positions

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use engine::matcher::summarize_orders;
use engine::scheduler::SCAN_TICK_SECS;
use engine::{
    default_jobs, run_cycle, run_market_scanner, run_position_watcher, AlertBatch, ErrorResponse,
    ExchangeAdapter, ExchangeError, NormalizedPosition, Platform, ScanResult, Scheduler, Sentinel,
    SentinelConfig, SubScores,
};
use persistence::repository::ScanResultRepository;
use persistence::{Database, SnapshotStore};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "portfolio-sentinel")]
#[command(about = "Multi-exchange position watcher, alerting and market scanner", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API with the position watcher and job scheduler
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Run one analysis cycle (or the full scheduler with --auto)
    Run {
        /// Keep running scheduled jobs until Ctrl+C
        #[arg(long)]
        auto: bool,
        /// Log notifications instead of posting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the opportunity scanner
    Scan {
        /// Symbols to scan (comma-separated); defaults to the configured universe
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Scan every symbol once and print the ranking
        #[arg(long)]
        once: bool,
    },
    /// Print normalized positions
    Positions {
        /// Only this exchange (bingx, kraken, blofin, kucoin)
        #[arg(long)]
        exchange: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete old snapshots, scan rows and position runs
    Cleanup {
        /// Number of CSV snapshots to keep (default from SENTINEL_KEEP_SNAPSHOTS)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Clone)]
struct AppState {
    sentinel: Arc<Sentinel>,
    db: Arc<Database>,
}

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("info,engine=debug,persistence=debug,portfolio_sentinel=debug")
    } else {
        EnvFilter::new("info,engine=info,persistence=info,portfolio_sentinel=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Run { auto, dry_run } => {
            cmd_run(auto, dry_run).await?;
        }
        Commands::Scan { symbols, once } => {
            cmd_scan(symbols, once).await?;
        }
        Commands::Positions { exchange, json } => {
            cmd_positions(exchange, json).await?;
        }
        Commands::Cleanup { keep } => {
            cmd_cleanup(keep).await?;
        }
    }

    Ok(())
}

/// Open the database and snapshot directory named by `config` and wire services
async fn open_sentinel(config: SentinelConfig, dry_run: bool) -> anyhow::Result<(Arc<Sentinel>, Arc<Database>)> {
    let db = Database::new(&config.db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", config.db_path.display());

    let store = SnapshotStore::new(&config.data_dir)
        .map_err(|e| anyhow::anyhow!("Snapshot directory unavailable: {}", e))?;

    let sentinel = Sentinel::new(config, db.pool_clone(), store, dry_run)?;
    Ok((Arc::new(sentinel), Arc::new(db)))
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Shutdown requested");
}

// ============================================================================
// Serve command: Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Portfolio Sentinel v{} starting...", APP_VERSION);

    let (sentinel, db) = open_sentinel(SentinelConfig::from_env(), false).await?;

    sentinel.watcher_progress.reset();
    tokio::spawn(run_position_watcher(
        sentinel.watcher.clone(),
        sentinel.watcher_progress.clone(),
    ));

    let mut scheduler = Scheduler::new();
    for job in default_jobs(sentinel.clone(), false) {
        scheduler.add(job);
    }

    let state = AppState {
        sentinel: sentinel.clone(),
        db,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/exchanges/status", get(api_exchange_status))
        .route("/positions", get(api_positions))
        .route("/positions/:exchange", get(api_exchange_positions))
        .route("/balance/:exchange", get(api_exchange_balance))
        .route("/orders/:exchange", get(api_exchange_orders))
        .route("/alerts/latest", get(api_latest_alerts))
        .route("/score", post(api_score))
        .route("/scans", get(api_recent_scans))
        .route("/scans/top", get(api_top_scans))
        .route("/watcher/start", post(api_start_watcher))
        .route("/watcher/stop", post(api_stop_watcher))
        .route("/watcher/status", get(api_watcher_status))
        .route("/scanner/status", get(api_scanner_status))
        .route("/cleanup", post(api_cleanup))
        .with_state(state);

    let app = Router::new()
        .route("/health", get(api_health))
        .nest("/api", api_routes)
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Portfolio Sentinel v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health               - Health check");
    println!("  GET  /api/exchanges/status     - Last poll outcome per exchange");
    println!("  GET  /api/positions            - Normalized positions, all exchanges");
    println!("  GET  /api/positions/:exchange  - Positions for one exchange");
    println!("  GET  /api/balance/:exchange    - Raw balance");
    println!("  GET  /api/orders/:exchange     - Open orders");
    println!("  GET  /api/alerts/latest        - Most recent alert batch");
    println!("  POST /api/score                - Score sub-scores");
    println!("  GET  /api/scans                - Recent scan results");
    println!("  GET  /api/scans/top            - Best scan results");
    println!("  POST /api/watcher/start|stop   - Control the position watcher");
    println!("  GET  /api/watcher/status       - Watcher progress");
    println!("  GET  /api/scanner/status       - Scanner progress");
    println!("  POST /api/cleanup              - Prune snapshots and history");
    println!("\n  Exchanges: {:?}", sentinel.config.configured_exchanges());
    println!("  Jobs: {}", scheduler.job_names().join(", "));
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_ctrl_c())
        .await?;

    sentinel.watcher_progress.cancel();
    sentinel.scanner_progress.cancel();
    scheduler.shutdown().await;
    Ok(())
}

// ============================================================================
// Run command: CLI mode (no web server)
// ============================================================================

async fn cmd_run(auto: bool, dry_run: bool) -> anyhow::Result<()> {
    println!("\n=== Portfolio Sentinel v{} ===", APP_VERSION);

    let (sentinel, _db) = open_sentinel(SentinelConfig::from_env(), dry_run).await?;
    println!("Exchanges: {:?}", sentinel.config.configured_exchanges());
    if dry_run {
        println!("Dry run: notifications are logged, not posted");
    }

    if !auto {
        let report = run_cycle(&sentinel.watcher, Some(&sentinel.watcher_progress)).await?;
        println!("\nRun {}", report.run_id);
        println!("  Positions:     {}", report.positions);
        println!("  Alerts raised: {}", report.alerts_raised);
        println!("  Alerts sent:   {}", report.alerts_sent);
        if let Some(path) = &report.snapshot_path {
            println!("  Snapshot:      {}", path.display());
        }
        return Ok(());
    }

    let mut scheduler = Scheduler::new();
    for job in default_jobs(sentinel.clone(), true) {
        scheduler.add(job);
    }
    println!("Jobs: {}", scheduler.job_names().join(", "));
    println!("Press Ctrl+C to stop\n");

    wait_for_ctrl_c().await;
    sentinel.scanner_progress.cancel();
    scheduler.shutdown().await;
    Ok(())
}

// ============================================================================
// Scan command
// ============================================================================

async fn cmd_scan(symbols: Vec<String>, once: bool) -> anyhow::Result<()> {
    let mut config = SentinelConfig::from_env();
    if !symbols.is_empty() {
        config.scan_symbols = symbols;
    }
    let (sentinel, _db) = open_sentinel(config, false).await?;
    let scanner = sentinel.scanner.clone();

    println!("\n=== Portfolio Sentinel v{} ===", APP_VERSION);
    println!("Universe: {} symbols", scanner.universe().len());

    if once {
        let results = scanner.scan_all().await;
        print_scan_results(&results);
        return Ok(());
    }

    println!("Scanning one symbol every {}s. Press Ctrl+C to stop\n", SCAN_TICK_SECS);
    let handle = tokio::spawn(run_market_scanner(scanner, Duration::from_secs(SCAN_TICK_SECS)));

    wait_for_ctrl_c().await;
    sentinel.scanner_progress.cancel();
    if let Err(e) = handle.await {
        warn!("Scanner task ended abnormally: {}", e);
    }

    let snapshot = sentinel.scanner_progress.snapshot();
    println!(
        "\nScanned {} symbols, {} alerts sent",
        snapshot.scanned, snapshot.alerts_sent
    );
    Ok(())
}

fn print_scan_results(results: &[ScanResult]) {
    println!(
        "\n{:<4} {:<10} {:>6} {:>6} {:>6} {:>6}  {}",
        "#", "SYMBOL", "SCORE", "TECH", "NEWS", "SOCIAL", "ALERT"
    );
    let layer = |v: Option<f64>| v.map(|x| format!("{:.1}", x)).unwrap_or_else(|| "-".into());
    for (i, r) in results.iter().enumerate() {
        println!(
            "{:<4} {:<10} {:>6.1} {:>6} {:>6} {:>6}  {}",
            i + 1,
            r.symbol,
            r.score,
            layer(r.sub_scores.technical),
            layer(r.sub_scores.news),
            layer(r.sub_scores.social),
            if r.alerted { "yes" } else { "" }
        );
    }
}

// ============================================================================
// Positions command
// ============================================================================

async fn cmd_positions(exchange: Option<String>, json: bool) -> anyhow::Result<()> {
    let config = SentinelConfig::from_env();
    let registry = Arc::new(engine::ExchangeRegistry::from_config(&config));
    let portfolio = engine::PortfolioService::from_config(&config, registry.clone());

    let positions = match exchange {
        Some(name) => {
            let platform: Platform = name.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let adapter = registry
                .adapter(platform)
                .ok_or_else(|| anyhow::anyhow!("No adapter registered for {}", platform))?;
            let (positions, orders) = portfolio.collect_exchange(adapter.as_ref()).await?;
            info!(exchange = %platform, active_orders = orders.active, "Exchange collected");
            positions
        }
        None => {
            let snapshot = portfolio.collect().await;
            for report in snapshot.reports.iter().filter(|r| r.error.is_some()) {
                warn!(
                    exchange = %report.platform,
                    error = report.error.as_deref().unwrap_or_default(),
                    "Exchange skipped"
                );
            }
            snapshot.positions
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&positions)?);
    } else {
        print_positions(&positions);
    }
    Ok(())
}

fn print_positions(positions: &[NormalizedPosition]) {
    if positions.is_empty() {
        println!("No open positions");
        return;
    }

    println!(
        "{:<12} {:<8} {:<6} {:>14} {:>12} {:>9} {:>4} {:>4} {:<6}",
        "SYMBOL", "EXCHANGE", "SIDE", "QUANTITY", "MARGIN $", "PNL %", "SL", "TP", "RISK"
    );
    for p in positions {
        println!(
            "{:<12} {:<8} {:<6} {:>14} {:>12} {:>9} {:>4} {:>4} {:<6}",
            p.symbol,
            p.platform.to_string(),
            p.side.to_string(),
            p.quantity.normalize().to_string(),
            p.margin_usd().round_dp(2).to_string(),
            p.unrealized_pnl_pct().round_dp(2).to_string(),
            if p.has_stop_loss() { "yes" } else { "no" },
            if p.has_take_profit() { "yes" } else { "no" },
            p.risk_tier().to_string()
        );
    }
    let total: rust_decimal::Decimal = positions.iter().map(|p| p.margin_usd()).sum();
    println!("\n{} positions, ${} total margin", positions.len(), total.round_dp(2));
}

// ============================================================================
// Cleanup command
// ============================================================================

async fn cmd_cleanup(keep: Option<usize>) -> anyhow::Result<()> {
    let (sentinel, db) = open_sentinel(SentinelConfig::from_env(), true).await?;
    let keep = keep.unwrap_or(sentinel.config.keep_snapshots);
    info!("Sentinel cleanup: keeping {} newest snapshots", keep);

    let outcome = sentinel.cleanup(keep).await?;

    info!("Running VACUUM to reclaim disk space...");
    db.vacuum()
        .await
        .map_err(|e| anyhow::anyhow!("VACUUM failed: {}", e))?;

    info!(
        "Done! Deleted {} snapshots ({} kept), {} scan rows, {} position rows.",
        outcome.files_deleted,
        outcome.files_kept,
        outcome.scan_rows_deleted,
        outcome.position_rows_deleted
    );
    Ok(())
}

// ============================================================================
// API Handlers: health and exchanges
// ============================================================================

async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "portfolio-sentinel",
        "version": APP_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET /api/exchanges/status: outcome of the last poll of each exchange
async fn api_exchange_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "exchanges": state.sentinel.registry.status(),
    }))
}

/// Map an adapter error to its HTTP status and JSON body
fn exchange_error(err: &ExchangeError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err {
        ExchangeError::NotAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ExchangeError::Api { .. } => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": ErrorResponse::from(err),
        })),
    )
}

fn resolve_adapter(state: &AppState, name: &str) -> Result<Arc<dyn ExchangeAdapter>, (StatusCode, Json<serde_json::Value>)> {
    let unknown = |message: String| {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "success": false,
                "error": ErrorResponse::unknown(message, Some(name.to_string())),
            })),
        )
    };
    let platform: Platform = name.parse().map_err(unknown)?;
    state
        .sentinel
        .registry
        .adapter(platform)
        .ok_or_else(|| unknown(format!("no adapter registered for {}", platform)))
}

// ============================================================================
// API Handlers: positions, balances and orders
// ============================================================================

/// GET /api/positions: poll every configured exchange
async fn api_positions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.sentinel.portfolio.collect().await;
    Json(serde_json::json!({
        "success": true,
        "total_margin": snapshot.total_margin(),
        "high_risk_count": snapshot.high_risk_count(),
        "positions": snapshot.positions,
        "exchanges": snapshot.reports,
        "generated_at": snapshot.generated_at,
    }))
}

/// GET /api/positions/:exchange
async fn api_exchange_positions(State(state): State<AppState>, Path(exchange): Path<String>) -> ApiResult {
    let adapter = resolve_adapter(&state, &exchange)?;
    let (positions, orders) = state
        .sentinel
        .portfolio
        .collect_exchange(adapter.as_ref())
        .await
        .map_err(|e| exchange_error(&e))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "exchange": adapter.platform(),
        "positions": positions,
        "orders": orders,
    })))
}

/// GET /api/balance/:exchange
async fn api_exchange_balance(State(state): State<AppState>, Path(exchange): Path<String>) -> ApiResult {
    let adapter = resolve_adapter(&state, &exchange)?;
    let balance = adapter.get_balance().await.map_err(|e| exchange_error(&e))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "exchange": adapter.platform(),
        "balance": balance,
    })))
}

/// GET /api/orders/:exchange
async fn api_exchange_orders(State(state): State<AppState>, Path(exchange): Path<String>) -> ApiResult {
    let adapter = resolve_adapter(&state, &exchange)?;
    let orders = adapter.get_orders().await.map_err(|e| exchange_error(&e))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "exchange": adapter.platform(),
        "summary": summarize_orders(&orders),
        "orders": orders,
    })))
}

// ============================================================================
// API Handlers: alerts and scoring
// ============================================================================

/// GET /api/alerts/latest: the most recent alert batch written by the watcher
async fn api_latest_alerts(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.sentinel.store.read_latest_alerts::<AlertBatch>() {
        Ok(batch) => Json(serde_json::json!({
            "success": true,
            "batch": batch,
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to read latest alerts: {}", e),
        })),
    }
}

#[derive(Debug, Deserialize)]
struct ScoreRequest {
    technical: Option<f64>,
    news: Option<f64>,
    social: Option<f64>,
}

/// POST /api/score: score sub-scores; a missing layer counts as failed
async fn api_score(State(state): State<AppState>, Json(request): Json<ScoreRequest>) -> Json<serde_json::Value> {
    let subs = SubScores {
        technical: request.technical,
        news: request.news,
        social: request.social,
    };
    let policy = &state.sentinel.config.scoring;
    let breakdown = policy.score_layers(&subs);
    Json(serde_json::json!({
        "success": true,
        "score": breakdown.score,
        "breakdown": breakdown,
        "is_opportunity": policy.is_opportunity(breakdown.score),
    }))
}

// ============================================================================
// API Handlers: scan history
// ============================================================================

fn limit_param(params: &HashMap<String, String>, default: i64) -> i64 {
    params
        .get("limit")
        .and_then(|s| s.parse::<i64>().ok())
        .map(|l| l.clamp(1, 500))
        .unwrap_or(default)
}

/// GET /api/scans?limit=: most recent scan rows
async fn api_recent_scans(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit = limit_param(&params, 50);
    let repo = ScanResultRepository::new(state.db.pool());
    match repo.get_recent(limit).await {
        Ok(records) => Json(serde_json::json!({
            "success": true,
            "data": records,
            "total": records.len(),
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query scans: {}", e),
            "data": [],
            "total": 0,
        })),
    }
}

/// GET /api/scans/top: best score per symbol, highest first
async fn api_top_scans(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit = limit_param(&params, 10);
    let repo = ScanResultRepository::new(state.db.pool());
    match repo.get_top_by_score(limit).await {
        Ok(records) => Json(serde_json::json!({
            "success": true,
            "data": records,
            "total": records.len(),
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query top scans: {}", e),
            "data": [],
            "total": 0,
        })),
    }
}

// ============================================================================
// API Handlers: watcher and scanner control
// ============================================================================

/// POST /api/watcher/start: start the poll loop in the background
async fn api_start_watcher(State(state): State<AppState>) -> Json<serde_json::Value> {
    let progress = state.sentinel.watcher_progress.clone();
    if progress.is_running() {
        return Json(serde_json::json!({
            "success": false,
            "message": "Watcher already running",
        }));
    }

    progress.reset();
    tokio::spawn(run_position_watcher(state.sentinel.watcher.clone(), progress));
    info!("Watcher started via API");

    Json(serde_json::json!({
        "success": true,
        "message": "Watcher started",
    }))
}

/// POST /api/watcher/stop: stop after the current cycle
async fn api_stop_watcher(State(state): State<AppState>) -> Json<serde_json::Value> {
    let progress = &state.sentinel.watcher_progress;
    if !progress.is_running() {
        return Json(serde_json::json!({
            "success": false,
            "message": "Watcher is not running",
        }));
    }

    progress.cancel();
    info!("Watcher stop requested via API");
    Json(serde_json::json!({
        "success": true,
        "message": "Watcher stopping",
    }))
}

async fn api_watcher_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "watcher": state.sentinel.watcher_progress.view(),
    }))
}

async fn api_scanner_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "scanner": state.sentinel.scanner_progress.snapshot(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct CleanupRequest {
    keep: Option<usize>,
}

/// POST /api/cleanup: same pass as the nightly job; body is optional
async fn api_cleanup(State(state): State<AppState>, body: Option<Json<CleanupRequest>>) -> Json<serde_json::Value> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let keep = request.keep.unwrap_or(state.sentinel.config.keep_snapshots);
    match state.sentinel.cleanup(keep).await {
        Ok(outcome) => Json(serde_json::json!({
            "success": true,
            "cleanup": outcome,
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Cleanup failed: {}", e),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_error_status_codes() {
        let (status, body) = exchange_error(&ExchangeError::not_configured(Platform::Kraken));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.0["success"], false);
        assert_eq!(body.0["error"]["error_type"], "exchange_unavailable");

        let api = ExchangeError::from_payload(Platform::BingX, 100001, "Signature verification failed");
        let (status, body) = exchange_error(&api);
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.0["error"]["error_type"], "api_error");
        assert_eq!(body.0["error"]["exchange"], "BingX");
    }

    #[test]
    fn test_limit_param_bounds() {
        let mut params = HashMap::new();
        assert_eq!(limit_param(&params, 10), 10);
        params.insert("limit".to_string(), "9999".to_string());
        assert_eq!(limit_param(&params, 10), 500);
        params.insert("limit".to_string(), "abc".to_string());
        assert_eq!(limit_param(&params, 10), 10);
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["portfolio-sentinel", "-v", "scan", "--symbols", "SOL,AVAX", "--once"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Scan { symbols, once } => {
                assert_eq!(symbols, vec!["SOL", "AVAX"]);
                assert!(once);
            }
            _ => panic!("expected scan"),
        }

        let cli = Cli::try_parse_from(["portfolio-sentinel", "run", "--auto", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { auto: true, dry_run: true }));
    }
}
