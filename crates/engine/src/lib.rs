//! Portfolio Sentinel engine: exchange aggregation, alerting and scanning
//!
//! Provides:
//! - Exchange adapters (BingX, Kraken, Blofin, KuCoin) and market-data clients
//! - Position normalizer, conditional-order matcher and risk tiers
//! - Position alerts with per-symbol cooldown and Discord delivery
//! - Opportunity scorer and the rotating market scanner
//! - Poll-loop watcher and the in-process job scheduler

pub mod alerts;
pub mod api;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod indicators;
pub mod matcher;
pub mod news;
pub mod normalizer;
pub mod notifier;
pub mod portfolio;
pub mod scanner;
pub mod scheduler;
pub mod scorer;
pub mod services;
pub mod types;
pub mod watcher;

// Re-exports for convenience
pub use alerts::{Alert, AlertAnalyzer, AlertBatch, AlertKind, AlertThresholds, Severity};
pub use api::{BinanceClient, ExchangeAdapter, PriceSource};
pub use config::SentinelConfig;
pub use cooldown::Cooldown;
pub use error::{ErrorResponse, ExchangeError, ExchangeResult};
pub use matcher::RiskPolicy;
pub use normalizer::NormalizerPolicy;
pub use notifier::{Channel, Notifier};
pub use portfolio::{ExchangeRegistry, ExchangeReport, ExchangeStatus, PortfolioService};
pub use scanner::{run_market_scanner, MarketScanner, ScanResult, ScannerProgress, ScannerStatus};
pub use scheduler::{default_jobs, Job, Schedule, Scheduler};
pub use scorer::{ScoringPolicy, SubScores};
pub use services::{CleanupOutcome, Sentinel};
pub use types::*;
pub use watcher::{run_cycle, run_position_watcher, CycleReport, WatcherProgress, WatcherStatus};
