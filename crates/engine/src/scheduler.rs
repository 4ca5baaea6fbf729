//! In-process job scheduler.
//!
//! Every job runs in its own tokio task: sleep until the next fire time,
//! run, repeat. A shared `CancellationToken` stops all of them. Schedules
//! are evaluated in UTC.

use crate::api::NewsArticle;
use crate::cooldown::Cooldown;
use crate::news::{classify_headline, HeadlineClass};
use crate::notifier::{Channel, Notifier};
use crate::services::Sentinel;
use crate::watcher::run_cycle;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc, Weekday};
use persistence::repository::{PositionHistoryRepository, ScanResultRecord, ScanResultRepository};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Every(Duration),
    DailyAt(NaiveTime),
    WeeklyAt(Weekday, NaiveTime),
}

/// Next fire time strictly after `now`
pub fn next_fire(schedule: &Schedule, now: DateTime<Utc>) -> DateTime<Utc> {
    match schedule {
        Schedule::Every(every) => {
            let step = ChronoDuration::from_std(*every)
                .unwrap_or_else(|_| ChronoDuration::days(1))
                .max(ChronoDuration::seconds(1));
            now + step
        }
        Schedule::DailyAt(at) => {
            let today = now.date_naive().and_time(*at).and_utc();
            if today > now {
                today
            } else {
                today + ChronoDuration::days(1)
            }
        }
        Schedule::WeeklyAt(day, at) => {
            let ahead = (7 + day.num_days_from_monday() - now.weekday().num_days_from_monday()) % 7;
            let candidate = (now.date_naive() + ChronoDuration::days(i64::from(ahead)))
                .and_time(*at)
                .and_utc();
            if candidate > now {
                candidate
            } else {
                candidate + ChronoDuration::days(7)
            }
        }
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type JobTask = Arc<dyn Fn() -> JobFuture + Send + Sync>;

pub struct Job {
    pub name: String,
    pub schedule: Schedule,
    pub task: JobTask,
}

impl Job {
    pub fn new<F, Fut>(name: impl Into<String>, schedule: Schedule, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule,
            task: Arc::new(move || Box::pin(task()) as JobFuture),
        }
    }
}

pub struct Scheduler {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    names: Vec<String>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Vec::new(),
            names: Vec::new(),
        }
    }

    /// Token cancelled by `shutdown`; clone it to stop from elsewhere
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn job_names(&self) -> &[String] {
        &self.names
    }

    /// Spawn `job` onto the current runtime
    pub fn add(&mut self, job: Job) {
        info!(job = %job.name, schedule = ?job.schedule, "Job registered");
        self.names.push(job.name.clone());
        self.handles.push(tokio::spawn(run_job(job, self.token.clone())));
    }

    /// Cancel every job, abort runs in flight and wait for all tasks to end
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Job task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn run_job(job: Job, token: CancellationToken) {
    loop {
        let now = Utc::now();
        let next = next_fire(&job.schedule, now);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(job = %job.name, next = %next, "Job sleeping");

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        // Spawned so a panicking job only loses this run
        let mut run = tokio::spawn((job.task)());
        tokio::select! {
            _ = token.cancelled() => {
                run.abort();
                if let Err(e) = (&mut run).await {
                    if !e.is_cancelled() {
                        error!(job = %job.name, error = %e, "Job panicked");
                    }
                }
                debug!(job = %job.name, "In-flight run aborted");
                break;
            }
            outcome = &mut run => {
                match outcome {
                    Ok(Ok(())) => debug!(job = %job.name, "Job finished"),
                    Ok(Err(e)) => error!(job = %job.name, error = %e, "Job failed"),
                    Err(e) => error!(job = %job.name, error = %e, "Job panicked"),
                }
            }
        }
    }
    debug!(job = %job.name, "Job stopped");
}

pub const SCAN_TICK_SECS: u64 = 20;
pub const BREAKING_NEWS_MINS: u64 = 15;
const NEWS_FETCH_ITEMS: u32 = 50;
const DIGEST_SIZE: i64 = 5;

/// Headlines about `held` symbols that are not neutral
pub fn breaking_headlines<'a>(
    articles: &'a [NewsArticle],
    held: &BTreeSet<String>,
) -> Vec<(HeadlineClass, String, &'a NewsArticle)> {
    articles
        .iter()
        .filter_map(|article| {
            let class = classify_headline(&article.title);
            if class == HeadlineClass::Neutral {
                return None;
            }
            held.iter()
                .find(|s| article.mentions(s))
                .map(|s| (class, s.clone(), article))
        })
        .collect()
}

pub fn render_breaking(class: HeadlineClass, symbol: &str, article: &NewsArticle) -> String {
    let label = match class {
        HeadlineClass::Risk => "RISK",
        HeadlineClass::Bullish => "BULLISH",
        HeadlineClass::Neutral => "NEWS",
    };
    let mut msg = format!("**Breaking {label}: ${symbol}**\n{}", article.title);
    if let Some(source) = &article.source_name {
        msg.push_str(&format!("\nSource: {source}"));
    }
    if let Some(url) = &article.news_url {
        msg.push_str(&format!("\n{url}"));
    }
    msg
}

/// `None` when there is nothing to report
pub fn render_digest(top: &[ScanResultRecord]) -> Option<String> {
    if top.is_empty() {
        return None;
    }
    let mut out = String::from("**Alpha Digest**: top scanner scores\n");
    for (rank, r) in top.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. **${}** {:.1} ({} layers)",
            rank + 1,
            r.symbol,
            r.score,
            r.successful_layers
        ));
        if let Some(rsi) = r.rsi {
            out.push_str(&format!(" | RSI {rsi:.1}"));
        }
        if let Some(headline) = &r.headline {
            out.push_str(&format!("\n   {headline}"));
        }
    }
    Some(out)
}

async fn breaking_news_job(app: Arc<Sentinel>) -> anyhow::Result<()> {
    let Some(news) = &app.news else {
        debug!("Breaking news skipped, no CryptoNews key");
        return Ok(());
    };

    let held: BTreeSet<String> = PositionHistoryRepository::new(&app.pool)
        .get_latest_run()
        .await?
        .into_iter()
        .map(|r| r.symbol)
        .collect();
    if held.is_empty() {
        debug!("Breaking news skipped, no held positions yet");
        return Ok(());
    }

    let articles = news.general_news(NEWS_FETCH_ITEMS).await?;
    let hits = breaking_headlines(&articles, &held);
    let sent = deliver_breaking(app.notifier.as_ref(), &app.news_cooldown, &hits).await;
    app.news_cooldown.prune();
    info!(articles = articles.len(), sent, "Breaking news checked");
    Ok(())
}

/// Post each headline not seen within the cooldown. A headline is stamped
/// only once delivered, so a failed post is retried on the next run.
pub async fn deliver_breaking(
    notifier: &dyn Notifier,
    cooldown: &Cooldown,
    hits: &[(HeadlineClass, String, &NewsArticle)],
) -> usize {
    let mut sent = 0;
    for (class, symbol, article) in hits {
        if !cooldown.should_alert(&article.title) {
            continue;
        }
        match notifier
            .send(Channel::Breaking, &render_breaking(*class, symbol, article))
            .await
        {
            Ok(true) => {
                cooldown.record(&article.title);
                sent += 1;
            }
            Ok(false) => debug!(symbol = %symbol, "Breaking headline not delivered"),
            Err(e) => warn!(symbol = %symbol, error = %e, "Breaking headline delivery failed"),
        }
    }
    sent
}

async fn alpha_digest_job(app: Arc<Sentinel>) -> anyhow::Result<()> {
    let top = ScanResultRepository::new(&app.pool)
        .get_top_by_score(DIGEST_SIZE)
        .await?;
    if let Some(digest) = render_digest(&top) {
        app.notifier.send(Channel::Alpha, &digest).await?;
    }
    Ok(())
}

async fn cleanup_job(app: Arc<Sentinel>) -> anyhow::Result<()> {
    app.cleanup(app.config.keep_snapshots).await?;
    Ok(())
}

fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Standard job set. The hourly portfolio job is left out when a
/// standalone watcher already runs analysis cycles.
pub fn default_jobs(app: Arc<Sentinel>, include_portfolio: bool) -> Vec<Job> {
    let mut jobs = Vec::new();

    if include_portfolio {
        let a = app.clone();
        jobs.push(Job::new("portfolio_analysis", Schedule::Every(app.config.poll_interval), move || {
            let a = a.clone();
            async move {
                run_cycle(&a.watcher, Some(&a.watcher_progress)).await?;
                Ok(())
            }
        }));
    }

    let a = app.clone();
    jobs.push(Job::new("market_scan", Schedule::Every(Duration::from_secs(SCAN_TICK_SECS)), move || {
        let a = a.clone();
        async move {
            a.scanner.scan_next().await;
            Ok(())
        }
    }));

    let a = app.clone();
    jobs.push(Job::new(
        "breaking_news",
        Schedule::Every(Duration::from_secs(BREAKING_NEWS_MINS * 60)),
        move || breaking_news_job(a.clone()),
    ));

    for (name, hour) in [("alpha_digest_morning", 9), ("alpha_digest_evening", 21)] {
        let a = app.clone();
        jobs.push(Job::new(name, Schedule::DailyAt(at(hour, 0)), move || alpha_digest_job(a.clone())));
    }

    let a = app;
    jobs.push(Job::new("snapshot_cleanup", Schedule::DailyAt(at(3, 30)), move || cleanup_job(a.clone())));

    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::testing::MemoryNotifier;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_next_fire_every() {
        let now = utc(2024, 3, 1, 10, 0);
        assert_eq!(next_fire(&Schedule::Every(Duration::from_secs(20)), now), now + ChronoDuration::seconds(20));
        // Zero intervals still advance
        assert_eq!(next_fire(&Schedule::Every(Duration::ZERO), now), now + ChronoDuration::seconds(1));
    }

    #[test]
    fn test_next_fire_daily() {
        let schedule = Schedule::DailyAt(at(9, 0));
        assert_eq!(next_fire(&schedule, utc(2024, 3, 1, 8, 59)), utc(2024, 3, 1, 9, 0));
        assert_eq!(next_fire(&schedule, utc(2024, 3, 1, 9, 0)), utc(2024, 3, 2, 9, 0));
        assert_eq!(next_fire(&schedule, utc(2024, 2, 29, 23, 0)), utc(2024, 3, 1, 9, 0));
    }

    #[test]
    fn test_next_fire_weekly() {
        // 2024-03-01 is a Friday
        let schedule = Schedule::WeeklyAt(Weekday::Mon, at(8, 0));
        assert_eq!(next_fire(&schedule, utc(2024, 3, 1, 12, 0)), utc(2024, 3, 4, 8, 0));

        let friday = Schedule::WeeklyAt(Weekday::Fri, at(8, 0));
        assert_eq!(next_fire(&friday, utc(2024, 3, 1, 7, 0)), utc(2024, 3, 1, 8, 0));
        assert_eq!(next_fire(&friday, utc(2024, 3, 1, 8, 0)), utc(2024, 3, 8, 8, 0));
    }

    fn article(title: &str, tickers: &[&str]) -> NewsArticle {
        NewsArticle {
            title: title.into(),
            news_url: Some("https://news.test/a".into()),
            source_name: Some("Wire".into()),
            date: None,
            sentiment: None,
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_breaking_headlines_filter() {
        let held: BTreeSet<String> = ["SOL".to_string(), "ETH".to_string()].into();
        let articles = vec![
            article("Solana validator exploit drains pool", &["SOL"]),
            article("ETH ETF approval expected", &[]),
            article("Bitcoin hack rumors", &["BTC"]),
            article("SOL price steady", &["SOL"]),
        ];
        let hits = breaking_headlines(&articles, &held);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, HeadlineClass::Risk);
        assert_eq!(hits[0].1, "SOL");
        assert_eq!(hits[1].0, HeadlineClass::Bullish);
        assert_eq!(hits[1].1, "ETH");

        let msg = render_breaking(hits[0].0, &hits[0].1, hits[0].2);
        assert!(msg.starts_with("**Breaking RISK: $SOL**"));
        assert!(msg.contains("https://news.test/a"));
    }

    #[tokio::test]
    async fn test_breaking_delivery_retries_after_failure() {
        let held: BTreeSet<String> = ["SOL".to_string()].into();
        let articles = vec![
            article("Solana validator exploit drains pool", &["SOL"]),
            article("SOL ETF approval expected", &["SOL"]),
        ];
        let hits = breaking_headlines(&articles, &held);
        let cooldown = Cooldown::new(ChronoDuration::hours(24));
        let notifier = MemoryNotifier::default();

        notifier.failing.store(true, Ordering::Relaxed);
        assert_eq!(deliver_breaking(&notifier, &cooldown, &hits).await, 0);
        assert!(cooldown.is_empty());

        notifier.failing.store(false, Ordering::Relaxed);
        assert_eq!(deliver_breaking(&notifier, &cooldown, &hits).await, 2);
        // Both already posted
        assert_eq!(deliver_breaking(&notifier, &cooldown, &hits).await, 0);
        assert_eq!(notifier.sent.lock().len(), 2);
    }

    #[test]
    fn test_render_digest() {
        assert!(render_digest(&[]).is_none());
        let record = ScanResultRecord {
            id: Some(1),
            symbol: "SOL".into(),
            score: 55.0,
            technical_score: Some(40.0),
            news_score: Some(30.0),
            social_score: None,
            successful_layers: 2,
            rsi: Some(28.4),
            alerted: 1,
            headline: Some("Upgrade ships".into()),
            created_at: None,
        };
        let digest = render_digest(&[record]).unwrap();
        assert!(digest.contains("1. **$SOL** 55.0 (2 layers) | RSI 28.4"));
        assert!(digest.contains("Upgrade ships"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_run_and_survive_errors() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();

        let r = runs.clone();
        scheduler.add(Job::new("counter", Schedule::Every(Duration::from_secs(20)), move || {
            let r = r.clone();
            async move {
                let n = r.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    anyhow::bail!("first run fails");
                }
                Ok(())
            }
        }));
        assert_eq!(scheduler.job_names(), &["counter".to_string()]);

        tokio::time::sleep(Duration::from_secs(65)).await;
        scheduler.shutdown().await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_running_job() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut scheduler = Scheduler::new();

        let f = finished.clone();
        scheduler.add(Job::new("slow", Schedule::Every(Duration::from_secs(1)), move || {
            let f = f.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                f.store(true, Ordering::SeqCst);
                Ok(())
            }
        }));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_long_sleep() {
        let mut scheduler = Scheduler::new();
        scheduler.add(Job::new("daily", Schedule::DailyAt(at(0, 0)), || async { Ok(()) }));
        let started = std::time::Instant::now();
        scheduler.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
