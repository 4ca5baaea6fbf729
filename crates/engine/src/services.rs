//! Wires configuration into the long-lived components shared by the CLI,
//! the HTTP API and the scheduler.

use crate::alerts::AlertAnalyzer;
use crate::api::{CryptoNewsClient, TaapiClient};
use crate::config::SentinelConfig;
use crate::cooldown::Cooldown;
use crate::indicators::{LocalIndicators, RsiChain, RsiSource};
use crate::notifier::{build_notifier, Notifier};
use crate::portfolio::{ExchangeRegistry, PortfolioService};
use crate::scanner::{LiveSignals, MarketScanner, ScannerProgress};
use crate::watcher::{WatcherContext, WatcherProgress};
use persistence::repository::{PositionHistoryRepository, ScanResultRepository};
use persistence::{SnapshotStore, SqlitePool};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// A headline is posted at most once per this window
const NEWS_DEDUP_HOURS: i64 = 24;
pub const SCAN_RETENTION_DAYS: i64 = 30;
/// Two weeks of hourly runs
pub const POSITION_RUNS_KEPT: i64 = 24 * 14;

pub struct Sentinel {
    pub config: SentinelConfig,
    pub registry: Arc<ExchangeRegistry>,
    pub portfolio: Arc<PortfolioService>,
    pub watcher: Arc<WatcherContext>,
    pub watcher_progress: Arc<WatcherProgress>,
    pub scanner: Arc<MarketScanner>,
    pub scanner_progress: Arc<ScannerProgress>,
    pub news: Option<CryptoNewsClient>,
    /// Deduplicates breaking-news headlines
    pub news_cooldown: Cooldown,
    pub notifier: Arc<dyn Notifier>,
    pub store: SnapshotStore,
    pub pool: SqlitePool,
}

/// What one cleanup pass removed
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupOutcome {
    pub files_deleted: usize,
    pub files_kept: usize,
    pub scan_rows_deleted: u64,
    pub position_rows_deleted: u64,
}

/// TAAPI when a secret is set, then locally computed RSI
pub fn rsi_chain(config: &SentinelConfig) -> RsiChain {
    let mut sources: Vec<Box<dyn RsiSource>> = Vec::new();
    if let Some(secret) = &config.taapi_secret {
        sources.push(Box::new(TaapiClient::new(secret.clone())));
    }
    sources.push(Box::new(LocalIndicators::default()));
    RsiChain::new(sources)
}

impl Sentinel {
    /// Fails when the scoring policy cannot be applied
    pub fn new(config: SentinelConfig, pool: SqlitePool, store: SnapshotStore, dry_run: bool) -> anyhow::Result<Self> {
        config.scoring.validate()?;
        let notifier = build_notifier(&config.discord, dry_run);
        let registry = Arc::new(ExchangeRegistry::from_config(&config));
        let portfolio = Arc::new(PortfolioService::from_config(&config, registry.clone()));

        let watcher = Arc::new(WatcherContext {
            portfolio: portfolio.clone(),
            analyzer: AlertAnalyzer::new(config.alerts.clone()),
            rsi: Arc::new(rsi_chain(&config)),
            cooldown: Cooldown::from_std(config.cooldown_ttl),
            notifier: notifier.clone(),
            store: Some(store.clone()),
            pool: Some(pool.clone()),
            keep_snapshots: config.keep_snapshots,
            poll_interval: config.poll_interval,
        });

        let scanner_progress = Arc::new(ScannerProgress::new());
        let scanner = Arc::new(
            MarketScanner::new(
                Arc::new(LiveSignals::from_config(&config)),
                notifier.clone(),
                config.scoring.clone(),
                config.cooldown_ttl,
                config.scan_symbols.clone(),
            )
            .with_pool(pool.clone())
            .with_store(store.clone())
            .with_progress(scanner_progress.clone()),
        );

        info!(
            exchanges = ?config.configured_exchanges(),
            discord = config.discord.is_configured(),
            dry_run,
            "Sentinel services ready"
        );

        Ok(Self {
            registry,
            portfolio,
            watcher,
            watcher_progress: Arc::new(WatcherProgress::new()),
            scanner,
            scanner_progress,
            news: config.cryptonews_api_key.as_deref().map(CryptoNewsClient::new),
            news_cooldown: Cooldown::new(chrono::Duration::hours(NEWS_DEDUP_HOURS)),
            notifier,
            store,
            pool,
            config,
        })
    }

    /// Prune CSV snapshots beyond `keep`, scan rows past retention and old position runs
    pub async fn cleanup(&self, keep: usize) -> anyhow::Result<CleanupOutcome> {
        let report = self.store.cleanup(keep)?;
        let scan_rows_deleted = ScanResultRepository::new(&self.pool)
            .delete_older_than(SCAN_RETENTION_DAYS)
            .await?;
        let position_rows_deleted = PositionHistoryRepository::new(&self.pool)
            .prune_runs(POSITION_RUNS_KEPT)
            .await?;

        let outcome = CleanupOutcome {
            files_deleted: report.deleted.len(),
            files_kept: report.kept,
            scan_rows_deleted,
            position_rows_deleted,
        };
        info!(
            files = outcome.files_deleted,
            scans = outcome.scan_rows_deleted,
            position_rows = outcome.position_rows_deleted,
            "Cleanup complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::Database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_from_empty_config() {
        let tmp = TempDir::new().unwrap();
        let db = Database::in_memory().await.unwrap();
        let store = SnapshotStore::new(tmp.path()).unwrap();

        let sentinel = Sentinel::new(SentinelConfig::default(), db.pool_clone(), store, true).unwrap();
        assert!(sentinel.news.is_none());
        assert_eq!(sentinel.registry.adapters().len(), 4);
        assert!(!sentinel.scanner.universe().is_empty());
        assert_eq!(rsi_chain(&sentinel.config).len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_on_empty_store() {
        let tmp = TempDir::new().unwrap();
        let db = Database::in_memory().await.unwrap();
        let store = SnapshotStore::new(tmp.path()).unwrap();
        let sentinel = Sentinel::new(SentinelConfig::default(), db.pool_clone(), store, true).unwrap();

        let outcome = sentinel.cleanup(5).await.unwrap();
        assert_eq!(outcome.files_deleted, 0);
        assert_eq!(outcome.scan_rows_deleted, 0);
        assert_eq!(outcome.position_rows_deleted, 0);
    }

    #[tokio::test]
    async fn test_inverted_scoring_bounds_rejected() {
        let tmp = TempDir::new().unwrap();
        let db = Database::in_memory().await.unwrap();
        let store = SnapshotStore::new(tmp.path()).unwrap();
        let mut config = SentinelConfig::default();
        config.scoring.min_score = 90.0;
        config.scoring.max_score = 10.0;

        assert!(Sentinel::new(config, db.pool_clone(), store, true).is_err());
    }

    #[test]
    fn test_rsi_chain_prefers_taapi() {
        let config = SentinelConfig::from_lookup(|k| (k == "TAAPI_SECRET").then(|| "s".to_string()));
        assert_eq!(rsi_chain(&config).len(), 2);
    }
}
