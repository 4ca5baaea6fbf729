//! Position watcher: collect -> analyze -> cooldown -> notify -> persist,
//! repeated every poll interval until cancelled.

use crate::alerts::{Alert, AlertAnalyzer, AlertBatch};
use crate::cooldown::Cooldown;
use crate::indicators::RsiSource;
use crate::notifier::{Channel, Notifier};
use crate::portfolio::{ExchangeStatus, PortfolioService};
use crate::types::{NormalizedPosition, PortfolioSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use persistence::repository::PositionHistoryRepository;
use persistence::{SnapshotStore, SqlitePool};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_ALERTS: usize = 50;
const CANCEL_CHECK_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatcherStatus {
    Idle,
    Watching,
    Error,
}

/// Shared watcher state (status endpoint, start/stop)
pub struct WatcherProgress {
    pub status: RwLock<WatcherStatus>,
    pub cancelled: AtomicBool,
    pub alerts: RwLock<Vec<Alert>>,
    pub cycles: AtomicU64,
    pub last_cycle_at: RwLock<Option<DateTime<Utc>>>,
    pub error_message: RwLock<Option<String>>,
}

impl WatcherProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(WatcherStatus::Idle),
            cancelled: AtomicBool::new(false),
            alerts: RwLock::new(Vec::new()),
            cycles: AtomicU64::new(0),
            last_cycle_at: RwLock::new(None),
            error_message: RwLock::new(None),
        }
    }

    pub fn reset(&self) {
        *self.status.write() = WatcherStatus::Watching;
        self.cancelled.store(false, Ordering::Relaxed);
        *self.error_message.write() = None;
    }

    pub fn is_running(&self) -> bool {
        *self.status.read() == WatcherStatus::Watching
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn push_alerts(&self, new: &[Alert]) {
        let mut alerts = self.alerts.write();
        for alert in new {
            alerts.insert(0, alert.clone());
        }
        alerts.truncate(MAX_ALERTS);
    }

    pub fn view(&self) -> WatcherView {
        WatcherView {
            status: *self.status.read(),
            cycles: self.cycles.load(Ordering::Relaxed),
            last_cycle_at: *self.last_cycle_at.read(),
            error: self.error_message.read().clone(),
            recent_alerts: self.alerts.read().clone(),
        }
    }
}

impl Default for WatcherProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WatcherView {
    pub status: WatcherStatus,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub recent_alerts: Vec<Alert>,
}

/// Everything one analysis cycle needs
pub struct WatcherContext {
    pub portfolio: Arc<PortfolioService>,
    pub analyzer: AlertAnalyzer,
    pub rsi: Arc<dyn RsiSource>,
    pub cooldown: Cooldown,
    pub notifier: Arc<dyn Notifier>,
    pub store: Option<SnapshotStore>,
    pub pool: Option<SqlitePool>,
    pub keep_snapshots: usize,
    pub poll_interval: Duration,
}

/// Outcome of a single cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: String,
    pub positions: usize,
    pub alerts_raised: usize,
    pub alerts_sent: usize,
    pub snapshot_path: Option<PathBuf>,
}

/// Alerts for symbols outside their cooldown. Nothing is stamped here:
/// see [`record_delivered`].
pub fn admit_alerts(cooldown: &Cooldown, alerts: Vec<Alert>) -> Vec<Alert> {
    alerts
        .into_iter()
        .filter(|a| cooldown.should_alert(&a.symbol))
        .collect()
}

/// Start the cooldown for every symbol in a delivered batch
pub fn record_delivered(cooldown: &Cooldown, alerts: &[Alert]) {
    let symbols: BTreeSet<&str> = alerts.iter().map(|a| a.symbol.as_str()).collect();
    for symbol in symbols {
        cooldown.record(symbol);
    }
}

/// Portfolio channel summary
pub fn render_portfolio_summary(snapshot: &PortfolioSnapshot) -> String {
    let mut out = format!(
        "**Portfolio Snapshot** ({})\nPositions **{}** | Total size **${:.0}** | High risk **{}**\n",
        snapshot.generated_at.format("%Y-%m-%d %H:%M UTC"),
        snapshot.positions.len(),
        snapshot.total_margin(),
        snapshot.high_risk_count(),
    );

    let mut sorted: Vec<&NormalizedPosition> = snapshot.positions.iter().collect();
    sorted.sort_by(|a, b| b.margin_usd().cmp(&a.margin_usd()));
    for p in sorted.iter().take(15) {
        out.push_str(&format!(
            "\n`{:<6}` {} {} | {:+.1}% | ${:.0} | SL {} TP {} | {}",
            p.symbol,
            p.platform,
            p.side,
            p.unrealized_pnl_pct(),
            p.margin_usd(),
            if p.has_stop_loss() { "yes" } else { "no" },
            if p.has_take_profit() { "yes" } else { "no" },
            p.risk_tier(),
        ));
    }

    let failed: Vec<String> = snapshot
        .reports
        .iter()
        .filter(|r| r.status == ExchangeStatus::ApiError)
        .map(|r| r.platform.to_string())
        .collect();
    if !failed.is_empty() {
        out.push_str(&format!("\n\nUnavailable: {}", failed.join(", ")));
    }
    out
}

/// One collect/analyze/notify/persist pass
pub async fn run_cycle(ctx: &WatcherContext, progress: Option<&WatcherProgress>) -> anyhow::Result<CycleReport> {
    let snapshot = ctx.portfolio.collect().await;
    let run_id = snapshot.generated_at.format("%Y%m%d_%H%M%S").to_string();
    info!(run_id = %run_id, positions = snapshot.positions.len(), "Portfolio collected");

    let raised = ctx.analyzer.analyze(&snapshot.positions, ctx.rsi.as_ref()).await;
    let alerts_raised = raised.len();
    let admitted = admit_alerts(&ctx.cooldown, raised);
    let mut alerts_sent = 0;

    if !snapshot.positions.is_empty() {
        if let Err(e) = ctx
            .notifier
            .send(Channel::Portfolio, &render_portfolio_summary(&snapshot))
            .await
        {
            warn!(error = %e, "Portfolio summary delivery failed");
        }
    }

    if let Some(progress) = progress {
        progress.push_alerts(&admitted);
    }

    if let Some(batch) = AlertBatch::prepare(admitted) {
        // Undelivered symbols stay eligible for the next cycle
        match ctx.notifier.send(Channel::Alerts, &batch.render()).await {
            Ok(true) => {
                record_delivered(&ctx.cooldown, &batch.alerts);
                alerts_sent = batch.alerts.len();
            }
            Ok(false) => warn!(alerts = batch.total_alerts, "Alert batch not delivered"),
            Err(e) => warn!(error = %e, "Alert delivery failed"),
        }
        if let Some(store) = &ctx.store {
            if let Err(e) = store.write_latest_alerts(&batch) {
                warn!(error = %e, "Failed to write latest alerts");
            }
        }
    }

    let mut snapshot_path = None;
    if let Some(store) = &ctx.store {
        let rows: Vec<_> = snapshot.positions.iter().map(|p| p.to_row()).collect();
        match store.write_positions(&rows, snapshot.generated_at) {
            Ok(path) => snapshot_path = Some(path),
            Err(e) => warn!(error = %e, "Failed to write positions snapshot"),
        }
        match store.cleanup(ctx.keep_snapshots) {
            Ok(cleanup) if !cleanup.deleted.is_empty() => {
                info!(deleted = cleanup.deleted.len(), "Old snapshots removed");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Snapshot cleanup failed"),
        }
    }

    if let Some(pool) = &ctx.pool {
        let records: Vec<_> = snapshot
            .positions
            .iter()
            .map(|p| p.to_history_record(&run_id))
            .collect();
        PositionHistoryRepository::new(pool).save_run(&records).await?;
    }

    ctx.cooldown.prune();

    info!(run_id = %run_id, raised = alerts_raised, sent = alerts_sent, "Analysis cycle complete");
    Ok(CycleReport {
        run_id,
        positions: snapshot.positions.len(),
        alerts_raised,
        alerts_sent,
        snapshot_path,
    })
}

/// Run cycles every `poll_interval` until `progress.cancelled` is set
pub async fn run_position_watcher(ctx: Arc<WatcherContext>, progress: Arc<WatcherProgress>) {
    info!(interval_secs = ctx.poll_interval.as_secs(), "Position watcher starting");
    *progress.status.write() = WatcherStatus::Watching;

    loop {
        if progress.cancelled.load(Ordering::Relaxed) {
            info!("Position watcher cancelled");
            break;
        }

        match run_cycle(&ctx, Some(&progress)).await {
            Ok(_) => {
                *progress.error_message.write() = None;
            }
            Err(e) => {
                error!(error = %e, "Analysis cycle failed");
                *progress.error_message.write() = Some(e.to_string());
            }
        }
        progress.cycles.fetch_add(1, Ordering::Relaxed);
        *progress.last_cycle_at.write() = Some(Utc::now());

        let steps = (ctx.poll_interval.as_millis() / u128::from(CANCEL_CHECK_MS)).max(1);
        for _ in 0..steps {
            if progress.cancelled.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(CANCEL_CHECK_MS)).await;
        }
    }

    *progress.status.write() = WatcherStatus::Idle;
}
