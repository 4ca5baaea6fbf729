//! Scan results repository: history of market scanner scores

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One scored symbol from the market scanner
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanResultRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub score: f64,
    pub technical_score: Option<f64>,
    pub news_score: Option<f64>,
    pub social_score: Option<f64>,
    pub successful_layers: i64,
    pub rsi: Option<f64>,
    pub alerted: i64,
    pub headline: Option<String>,
    pub created_at: Option<i64>,
}

/// Aggregated scanner stats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_scans: i64,
    pub unique_symbols: i64,
    pub total_alerted: i64,
    pub best_symbol: Option<String>,
    pub best_score: Option<f64>,
}

/// Repository for scanner results
pub struct ScanResultRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ScanResultRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a scan result, returning its row id
    pub async fn save(&self, record: &ScanResultRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO scan_results
                (symbol, score, technical_score, news_score, social_score,
                 successful_layers, rsi, alerted, headline)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        )
        .bind(&record.symbol)
        .bind(record.score)
        .bind(record.technical_score)
        .bind(record.news_score)
        .bind(record.social_score)
        .bind(record.successful_layers)
        .bind(record.rsi)
        .bind(record.alerted)
        .bind(&record.headline)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent results, newest first
    pub async fn get_recent(&self, limit: i64) -> DbResult<Vec<ScanResultRecord>> {
        let records = sqlx::query_as::<_, ScanResultRecord>(
            r#"SELECT id, symbol, score, technical_score, news_score, social_score,
                      successful_layers, rsi, alerted, headline, created_at
               FROM scan_results
               ORDER BY created_at DESC, id DESC
               LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Best result per symbol, ordered by score
    pub async fn get_top_by_score(&self, limit: i64) -> DbResult<Vec<ScanResultRecord>> {
        let records = sqlx::query_as::<_, ScanResultRecord>(
            r#"
            WITH best_ids AS (
              SELECT id,
                ROW_NUMBER() OVER (PARTITION BY symbol ORDER BY score DESC, id DESC) as rn
              FROM scan_results
            )
            SELECT s.id, s.symbol, s.score, s.technical_score, s.news_score, s.social_score,
                   s.successful_layers, s.rsi, s.alerted, s.headline, s.created_at
            FROM scan_results s
            INNER JOIN best_ids b ON s.id = b.id
            WHERE b.rn = 1
            ORDER BY s.score DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Results for one symbol, newest first
    pub async fn get_for_symbol(&self, symbol: &str, limit: i64) -> DbResult<Vec<ScanResultRecord>> {
        let records = sqlx::query_as::<_, ScanResultRecord>(
            r#"SELECT id, symbol, score, technical_score, news_score, social_score,
                      successful_layers, rsi, alerted, headline, created_at
               FROM scan_results
               WHERE symbol = ?
               ORDER BY created_at DESC, id DESC
               LIMIT ?"#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_stats(&self) -> DbResult<ScanStats> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scan_results")
            .fetch_one(self.pool)
            .await?;

        let unique_symbols: (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT symbol) FROM scan_results")
                .fetch_one(self.pool)
                .await?;

        let alerted: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM scan_results WHERE alerted = 1")
                .fetch_one(self.pool)
                .await?;

        let best: Option<(String, f64)> = sqlx::query_as(
            "SELECT symbol, score FROM scan_results ORDER BY score DESC LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await?;

        Ok(ScanStats {
            total_scans: total.0,
            unique_symbols: unique_symbols.0,
            total_alerted: alerted.0,
            best_symbol: best.as_ref().map(|b| b.0.clone()),
            best_score: best.map(|b| b.1),
        })
    }

    /// Delete results older than `days`. Returns the number of deleted rows.
    pub async fn delete_older_than(&self, days: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM scan_results WHERE created_at < strftime('%s', 'now') - (? * 86400)",
        )
        .bind(days)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
