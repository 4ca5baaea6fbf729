//! Flat-file snapshots: `positions_<timestamp>.csv|json`, `latest_alerts.json`
//! and `scanner_status.json`, with keep-N pruning by modification time.
//!
//! Single-instance deployment is assumed. JSON files are replaced through a
//! temp file + rename so readers never see a half-written document.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const LATEST_ALERTS_FILE: &str = "latest_alerts.json";
pub const SCANNER_STATUS_FILE: &str = "scanner_status.json";
const POSITIONS_PREFIX: &str = "positions_";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// One row of a positions CSV. Column names follow the historical sheet layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRow {
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "Platform")]
    pub platform: String,
    #[serde(rename = "Side (LONG/SHORT)")]
    pub side: String,
    #[serde(rename = "Entry Price")]
    pub entry_price: Decimal,
    #[serde(rename = "Mark Price")]
    pub mark_price: Decimal,
    #[serde(rename = "Unrealized PnL %")]
    pub unrealized_pnl_pct: Decimal,
    #[serde(rename = "Margin Size ($)")]
    pub margin_usd: Decimal,
    #[serde(rename = "Leverage")]
    pub leverage: Decimal,
    #[serde(rename = "SL Set?", with = "check_mark")]
    pub has_stop_loss: bool,
    #[serde(rename = "TP Set?", with = "check_mark")]
    pub has_take_profit: bool,
    #[serde(rename = "Risk Tier")]
    pub risk_tier: String,
}

/// ✅ / ❌ encoding used by the sheet export
mod check_mark {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if *value { "✅" } else { "❌" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(matches!(raw.trim(), "✅" | "true" | "yes" | "1"))
    }
}

/// Files removed and kept by a cleanup pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub deleted: Vec<PathBuf>,
    pub kept: usize,
}

/// Snapshot directory handle
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open (and create if needed) a snapshot directory
    pub fn new(dir: impl AsRef<Path>) -> SnapshotResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `positions_<YYYYMMDD_HHMMSS>.csv` and the matching `.json`.
    /// Returns the CSV path.
    pub fn write_positions(
        &self,
        rows: &[PositionRow],
        at: DateTime<Utc>,
    ) -> SnapshotResult<PathBuf> {
        let stem = format!("{}{}", POSITIONS_PREFIX, at.format("%Y%m%d_%H%M%S"));
        let csv_path = self.dir.join(format!("{stem}.csv"));

        let mut writer = csv::Writer::from_path(&csv_path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;

        self.write_json(&format!("{stem}.json"), &rows)?;

        info!(path = %csv_path.display(), rows = rows.len(), "Positions snapshot written");
        Ok(csv_path)
    }

    /// Newest `positions_*.csv` by modification time
    pub fn latest_positions_csv(&self) -> SnapshotResult<Option<PathBuf>> {
        let mut files = self.list_by_mtime("csv")?;
        Ok(files.pop().map(|(path, _)| path))
    }

    pub fn read_positions_csv(&self, path: impl AsRef<Path>) -> SnapshotResult<Vec<PositionRow>> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }

    pub fn write_latest_alerts<T: Serialize>(&self, batch: &T) -> SnapshotResult<PathBuf> {
        self.write_json(LATEST_ALERTS_FILE, batch)
    }

    pub fn read_latest_alerts<T: DeserializeOwned>(&self) -> SnapshotResult<Option<T>> {
        self.read_json(LATEST_ALERTS_FILE)
    }

    pub fn write_scanner_status<T: Serialize>(&self, status: &T) -> SnapshotResult<PathBuf> {
        self.write_json(SCANNER_STATUS_FILE, status)
    }

    pub fn read_scanner_status<T: DeserializeOwned>(&self) -> SnapshotResult<Option<T>> {
        self.read_json(SCANNER_STATUS_FILE)
    }

    /// Delete all but the newest `keep` files of each positions family (csv, json)
    pub fn cleanup(&self, keep: usize) -> SnapshotResult<CleanupReport> {
        let mut report = CleanupReport::default();

        for ext in ["csv", "json"] {
            let files = self.list_by_mtime(ext)?;
            let excess = files.len().saturating_sub(keep);
            for (path, _) in files.iter().take(excess) {
                match std::fs::remove_file(path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "Deleted old snapshot");
                        report.deleted.push(path.clone());
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete snapshot"),
                }
            }
            report.kept += files.len() - excess;
        }

        info!(
            deleted = report.deleted.len(),
            kept = report.kept,
            "Snapshot cleanup completed"
        );
        Ok(report)
    }

    /// `positions_*.<ext>` sorted oldest first (ties broken by name)
    fn list_by_mtime(&self, ext: &str) -> SnapshotResult<Vec<(PathBuf, SystemTime)>> {
        let pattern = self.dir.join(format!("{POSITIONS_PREFIX}*.{ext}"));
        let mut files = Vec::new();

        for entry in glob::glob(&pattern.to_string_lossy())? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Unreadable snapshot entry");
                    continue;
                }
            };
            let modified = std::fs::metadata(&path)?.modified()?;
            files.push((path, modified));
        }

        files.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(files)
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> SnapshotResult<PathBuf> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let body = serde_json::to_vec_pretty(value)?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> SnapshotResult<Option<T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let body = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tempfile::TempDir;

    fn row(symbol: &str) -> PositionRow {
        PositionRow {
            symbol: symbol.to_string(),
            platform: "BingX".to_string(),
            side: "LONG".to_string(),
            entry_price: dec!(50000),
            mark_price: dec!(55000),
            unrealized_pnl_pct: dec!(10),
            margin_usd: dec!(5000),
            leverage: dec!(10),
            has_stop_loss: false,
            has_take_profit: true,
            risk_tier: "MEDIUM".to_string(),
        }
    }

    fn touch(path: &Path, secs_ago: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }

    #[test]
    fn test_positions_csv_roundtrip_keeps_check_marks() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path()).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();

        let path = store.write_positions(&[row("BTC")], at).unwrap();
        assert!(path.ends_with("positions_20240301_123005.csv"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("SL Set?"));
        assert!(text.contains("❌"));

        let rows = store.read_positions_csv(&path).unwrap();
        assert_eq!(rows, vec![row("BTC")]);
        assert!(tmp.path().join("positions_20240301_123005.json").exists());
    }

    #[test]
    fn test_latest_positions_csv_by_mtime() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path()).unwrap();

        let newer_name = store
            .write_positions(&[row("BTC")], Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        let older_name = store
            .write_positions(&[row("ETH")], Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
            .unwrap();
        // Name order and mtime order disagree on purpose
        touch(&older_name, 600);
        touch(&newer_name, 10);

        let latest = store.latest_positions_csv().unwrap().unwrap();
        assert_eq!(latest, newer_name);
    }

    #[test]
    fn test_cleanup_keeps_newest_n_per_family() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path()).unwrap();

        for (i, hour) in [1u32, 2, 3, 4, 5].iter().enumerate() {
            let at = Utc.with_ymd_and_hms(2024, 1, 1, *hour, 0, 0).unwrap();
            let csv = store.write_positions(&[row("BTC")], at).unwrap();
            let age = 1000 - (i as u64) * 100;
            touch(&csv, age);
            touch(&csv.with_extension("json"), age);
        }
        store.write_latest_alerts(&serde_json::json!({"total_alerts": 0})).unwrap();

        let report = store.cleanup(3).unwrap();
        assert_eq!(report.deleted.len(), 4);
        assert_eq!(report.kept, 6);
        assert!(!tmp.path().join("positions_20240101_010000.csv").exists());
        assert!(tmp.path().join("positions_20240101_050000.csv").exists());
        // Non-positions files are never pruned
        assert!(tmp.path().join(LATEST_ALERTS_FILE).exists());
    }

    #[test]
    fn test_cleanup_below_keep_is_noop() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path()).unwrap();
        store
            .write_positions(&[], Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap();

        let report = store.cleanup(3).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.kept, 2);
    }

    #[test]
    fn test_json_snapshots_overwrite() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path()).unwrap();

        assert!(store.read_scanner_status::<serde_json::Value>().unwrap().is_none());
        store.write_scanner_status(&serde_json::json!({"cursor": 1})).unwrap();
        store.write_scanner_status(&serde_json::json!({"cursor": 2})).unwrap();

        let status: serde_json::Value = store.read_scanner_status().unwrap().unwrap();
        assert_eq!(status["cursor"], 2);
    }
}
