//! Market scanner: rotates through a symbol universe, scores each coin from
//! technical, news and social layers, and posts alpha alerts for the best.

use crate::api::{CryptoNewsClient, LunarCrushClient, NewsArticle};
use crate::config::SentinelConfig;
use crate::cooldown::Cooldown;
use crate::indicators::{LocalIndicators, TechnicalSignals};
use crate::news::news_signals;
use crate::normalizer::strip_symbol;
use crate::notifier::{Channel, Notifier};
use crate::scorer::{social_score, ScoringPolicy, SubScores};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use persistence::repository::{ScanResultRecord, ScanResultRepository};
use persistence::{SnapshotStore, SqlitePool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stablecoins and wrapped assets never worth scanning
pub const SCAN_EXCLUSIONS: &[&str] = &[
    "USDT", "USDC", "BUSD", "DAI", "TUSD", "USDD", "FRAX", "USDE", "FDUSD", "PYUSD", "GUSD", "USDP",
    "LUSD", "SUSD", "EURS", "EURT", "USTC", "WETH", "WBTC", "WBNB", "STETH", "WSTETH", "RETH",
    "CBETH", "WEETH", "BTCB",
];

/// Rotation used when no symbols are configured
pub const DEFAULT_UNIVERSE: &[&str] = &[
    "BTC", "ETH", "SOL", "BNB", "XRP", "ADA", "AVAX", "DOGE", "DOT", "LINK", "MATIC", "ATOM", "NEAR",
    "APT", "ARB", "OP", "SUI", "INJ", "TIA", "SEI", "RNDR", "FET", "LTC", "UNI", "AAVE",
];

const MAX_RECENT_RESULTS: usize = 20;
const NEWS_ITEMS: u32 = 10;

/// Uppercased, stripped, deduplicated universe without excluded assets
pub fn filter_universe<S: AsRef<str>>(symbols: &[S]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    symbols
        .iter()
        .map(|s| strip_symbol(s.as_ref()))
        .filter(|s| !s.is_empty() && !SCAN_EXCLUSIONS.contains(&s.as_str()))
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Data feeding the three scoring layers
#[async_trait]
pub trait MarketSignals: Send + Sync {
    async fn technical(&self, symbol: &str) -> anyhow::Result<TechnicalSignals>;

    async fn articles(&self, symbol: &str) -> anyhow::Result<Vec<NewsArticle>>;

    /// Social momentum in 0..1
    async fn social_momentum(&self, symbol: &str) -> anyhow::Result<f64>;
}

/// Binance klines, CryptoNews and LunarCrush; unconfigured sources fail their layer
pub struct LiveSignals {
    indicators: LocalIndicators,
    news: Option<CryptoNewsClient>,
    social: Option<LunarCrushClient>,
}

impl LiveSignals {
    pub fn from_config(config: &SentinelConfig) -> Self {
        Self {
            indicators: LocalIndicators::default(),
            news: config.cryptonews_api_key.as_deref().map(CryptoNewsClient::new),
            social: config.lunarcrush_api_key.as_deref().map(LunarCrushClient::new),
        }
    }
}

#[async_trait]
impl MarketSignals for LiveSignals {
    async fn technical(&self, symbol: &str) -> anyhow::Result<TechnicalSignals> {
        self.indicators.technical_signals(symbol).await
    }

    async fn articles(&self, symbol: &str) -> anyhow::Result<Vec<NewsArticle>> {
        match &self.news {
            Some(client) => client.ticker_news(symbol, NEWS_ITEMS).await,
            None => anyhow::bail!("CRYPTONEWS_API_KEY not set"),
        }
    }

    async fn social_momentum(&self, symbol: &str) -> anyhow::Result<f64> {
        match &self.social {
            Some(client) => client.social_momentum(symbol).await,
            None => anyhow::bail!("LUNARCRUSH_API_KEY not set"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub symbol: String,
    pub score: f64,
    pub sub_scores: SubScores,
    pub successful_layers: u8,
    pub layers_positive: u8,
    pub rsi: Option<f64>,
    pub headline: Option<String>,
    pub alerted: bool,
    pub scanned_at: DateTime<Utc>,
}

impl ScanResult {
    fn to_record(&self) -> ScanResultRecord {
        ScanResultRecord {
            id: None,
            symbol: self.symbol.clone(),
            score: self.score,
            technical_score: self.sub_scores.technical,
            news_score: self.sub_scores.news,
            social_score: self.sub_scores.social,
            successful_layers: i64::from(self.successful_layers),
            rsi: self.rsi,
            alerted: i64::from(self.alerted),
            headline: self.headline.clone(),
            created_at: None,
        }
    }

    /// Alpha channel message
    pub fn render_alert(&self) -> String {
        let layer = |v: Option<f64>| v.map_or("n/a".to_string(), |x| format!("{x:.1}"));
        let mut msg = format!(
            "**Alpha Opportunity: ${}**\nScore **{:.1}** ({} of 3 layers)\nTechnical {} | News {} | Social {}",
            self.symbol,
            self.score,
            self.successful_layers,
            layer(self.sub_scores.technical),
            layer(self.sub_scores.news),
            layer(self.sub_scores.social),
        );
        if let Some(rsi) = self.rsi {
            msg.push_str(&format!("\nRSI {rsi:.1}"));
        }
        if let Some(headline) = &self.headline {
            msg.push_str(&format!("\nCatalyst: {headline}"));
        }
        msg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerStatus {
    Idle,
    Scanning,
    Error,
}

/// Shared scanner state, read by the HTTP status endpoint
pub struct ScannerProgress {
    pub status: RwLock<ScannerStatus>,
    pub cancelled: AtomicBool,
    pub cursor: AtomicUsize,
    pub universe_size: AtomicUsize,
    pub scanned: AtomicU64,
    pub alerts_sent: AtomicU64,
    pub last_results: RwLock<Vec<ScanResult>>,
    pub error_message: RwLock<Option<String>>,
}

impl ScannerProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(ScannerStatus::Idle),
            cancelled: AtomicBool::new(false),
            cursor: AtomicUsize::new(0),
            universe_size: AtomicUsize::new(0),
            scanned: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            last_results: RwLock::new(Vec::new()),
            error_message: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.status.read() == ScannerStatus::Scanning
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn push_result(&self, result: ScanResult) {
        let mut results = self.last_results.write();
        results.insert(0, result);
        results.truncate(MAX_RECENT_RESULTS);
    }

    pub fn snapshot(&self) -> ScannerStatusFile {
        ScannerStatusFile {
            status: *self.status.read(),
            cursor: self.cursor.load(Ordering::Relaxed),
            universe_size: self.universe_size.load(Ordering::Relaxed),
            scanned: self.scanned.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            last_results: self.last_results.read().clone(),
            error: self.error_message.read().clone(),
            updated_at: Utc::now(),
        }
    }
}

impl Default for ScannerProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Contents of `scanner_status.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerStatusFile {
    pub status: ScannerStatus,
    pub cursor: usize,
    pub universe_size: usize,
    pub scanned: u64,
    pub alerts_sent: u64,
    pub last_results: Vec<ScanResult>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub struct MarketScanner {
    signals: Arc<dyn MarketSignals>,
    notifier: Arc<dyn Notifier>,
    scoring: ScoringPolicy,
    cooldown: Cooldown,
    universe: Vec<String>,
    progress: Arc<ScannerProgress>,
    pool: Option<SqlitePool>,
    store: Option<SnapshotStore>,
}

impl MarketScanner {
    pub fn new(
        signals: Arc<dyn MarketSignals>,
        notifier: Arc<dyn Notifier>,
        scoring: ScoringPolicy,
        cooldown_ttl: Duration,
        universe: Vec<String>,
    ) -> Self {
        let universe = if universe.is_empty() {
            filter_universe(DEFAULT_UNIVERSE)
        } else {
            filter_universe(&universe)
        };
        let progress = Arc::new(ScannerProgress::new());
        progress.universe_size.store(universe.len(), Ordering::Relaxed);
        Self {
            signals,
            notifier,
            scoring,
            cooldown: Cooldown::from_std(cooldown_ttl),
            universe,
            progress,
            pool: None,
            store: None,
        }
    }

    pub fn with_pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_progress(mut self, progress: Arc<ScannerProgress>) -> Self {
        progress.universe_size.store(self.universe.len(), Ordering::Relaxed);
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &Arc<ScannerProgress> {
        &self.progress
    }

    pub fn universe(&self) -> &[String] {
        &self.universe
    }

    /// Score one symbol. Each failed layer is logged and left out.
    pub async fn score_symbol(&self, symbol: &str) -> ScanResult {
        let (technical, rsi) = match self.signals.technical(symbol).await {
            Ok(t) => (Some(t.technical_score), Some(t.indicators.rsi)),
            Err(e) => {
                debug!(symbol, error = %e, "Technical layer unavailable");
                (None, None)
            }
        };

        let (news, headline) = match self.signals.articles(symbol).await {
            Ok(articles) => {
                let signals = news_signals(&articles);
                let headline = articles
                    .iter()
                    .find(|a| a.is_positive())
                    .map(|a| a.title.clone())
                    .filter(|_| signals.catalyst);
                (Some(signals.news_score), headline)
            }
            Err(e) => {
                debug!(symbol, error = %e, "News layer unavailable");
                (None, None)
            }
        };

        let social = match self.signals.social_momentum(symbol).await {
            Ok(m) => Some(social_score(m)),
            Err(e) => {
                debug!(symbol, error = %e, "Social layer unavailable");
                None
            }
        };

        let sub_scores = SubScores { technical, news, social };
        let breakdown = self.scoring.score_layers(&sub_scores);

        ScanResult {
            symbol: symbol.to_string(),
            score: breakdown.score,
            sub_scores,
            successful_layers: breakdown.successful_layers,
            layers_positive: breakdown.layers_positive,
            rsi,
            headline,
            alerted: false,
            scanned_at: Utc::now(),
        }
    }

    /// Scan the symbol under the cursor and advance it
    pub async fn scan_next(&self) -> Option<ScanResult> {
        if self.universe.is_empty() {
            return None;
        }
        let idx = self.progress.cursor.fetch_add(1, Ordering::Relaxed) % self.universe.len();
        let symbol = self.universe[idx].clone();
        Some(self.scan(&symbol).await)
    }

    /// One full pass over the universe, best score first
    pub async fn scan_all(&self) -> Vec<ScanResult> {
        let mut results = Vec::with_capacity(self.universe.len());
        for symbol in &self.universe {
            if self.progress.cancelled.load(Ordering::Relaxed) {
                break;
            }
            results.push(self.scan(symbol).await);
        }
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results
    }

    async fn scan(&self, symbol: &str) -> ScanResult {
        // Restored afterwards: Idle for single ticks, Scanning inside the loop
        let previous = std::mem::replace(&mut *self.progress.status.write(), ScannerStatus::Scanning);

        let mut result = self.score_symbol(symbol).await;
        info!(
            symbol,
            score = result.score,
            layers = result.successful_layers,
            "Symbol scanned"
        );

        if self.scoring.is_opportunity(result.score) && self.cooldown.should_alert(symbol) {
            match self.notifier.send(Channel::Alpha, &result.render_alert()).await {
                Ok(true) => {
                    self.cooldown.record(symbol);
                    result.alerted = true;
                    self.progress.alerts_sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => warn!(symbol, "Alpha alert not delivered"),
                Err(e) => warn!(symbol, error = %e, "Alpha alert delivery failed"),
            }
        }

        self.persist(&result).await;
        self.progress.scanned.fetch_add(1, Ordering::Relaxed);
        self.progress.push_result(result.clone());
        *self.progress.status.write() = previous;
        self.write_status();
        result
    }

    async fn persist(&self, result: &ScanResult) {
        let Some(pool) = &self.pool else {
            return;
        };
        if let Err(e) = ScanResultRepository::new(pool).save(&result.to_record()).await {
            warn!(symbol = %result.symbol, error = %e, "Failed to save scan result");
        }
    }

    fn write_status(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.write_scanner_status(&self.progress.snapshot()) {
                warn!(error = %e, "Failed to write scanner status");
            }
        }
    }
}

/// Scan one symbol per `interval` until cancelled
pub async fn run_market_scanner(scanner: Arc<MarketScanner>, interval: Duration) {
    let progress = scanner.progress().clone();
    progress.cancelled.store(false, Ordering::Relaxed);
    *progress.status.write() = ScannerStatus::Scanning;
    info!(symbols = scanner.universe().len(), "Market scanner starting");

    if scanner.universe().is_empty() {
        *progress.status.write() = ScannerStatus::Error;
        *progress.error_message.write() = Some("Scan universe is empty".into());
        return;
    }

    loop {
        if progress.cancelled.load(Ordering::Relaxed) {
            break;
        }
        scanner.scan_next().await;

        let steps = (interval.as_millis() / 500).max(1);
        for _ in 0..steps {
            if progress.cancelled.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    *progress.status.write() = ScannerStatus::Idle;
    scanner.write_status();
    info!("Market scanner stopped");
}
