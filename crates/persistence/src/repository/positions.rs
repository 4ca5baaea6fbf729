//! Position history repository: normalized positions captured per analysis run

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted normalized position. Decimal fields are stored as TEXT.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionHistoryRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub platform: String,
    pub symbol: String,
    pub side: String,
    pub entry_price: String,
    pub mark_price: String,
    pub unrealized_pnl_pct: String,
    pub margin_usd: String,
    pub leverage: String,
    pub has_stop_loss: bool,
    pub has_take_profit: bool,
    pub risk_tier: String,
    pub created_at: Option<i64>,
}

/// Repository for position snapshots
pub struct PositionHistoryRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PositionHistoryRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Save every position of one run inside a single transaction
    pub async fn save_run(&self, records: &[PositionHistoryRecord]) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for record in records {
            let result = sqlx::query(
                r#"INSERT INTO position_history
                    (run_id, platform, symbol, side, entry_price, mark_price,
                     unrealized_pnl_pct, margin_usd, leverage,
                     has_stop_loss, has_take_profit, risk_tier)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            )
            .bind(&record.run_id)
            .bind(&record.platform)
            .bind(&record.symbol)
            .bind(&record.side)
            .bind(&record.entry_price)
            .bind(&record.mark_price)
            .bind(&record.unrealized_pnl_pct)
            .bind(&record.margin_usd)
            .bind(&record.leverage)
            .bind(record.has_stop_loss)
            .bind(record.has_take_profit)
            .bind(&record.risk_tier)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Positions from the most recent run
    pub async fn get_latest_run(&self) -> DbResult<Vec<PositionHistoryRecord>> {
        let records = sqlx::query_as::<_, PositionHistoryRecord>(
            r#"SELECT id, run_id, platform, symbol, side, entry_price, mark_price,
                      unrealized_pnl_pct, margin_usd, leverage,
                      has_stop_loss, has_take_profit, risk_tier, created_at
               FROM position_history
               WHERE run_id = (SELECT run_id FROM position_history ORDER BY id DESC LIMIT 1)
               ORDER BY id ASC"#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// History of one symbol across runs, newest first
    pub async fn get_symbol_history(
        &self,
        symbol: &str,
        limit: i64,
    ) -> DbResult<Vec<PositionHistoryRecord>> {
        let records = sqlx::query_as::<_, PositionHistoryRecord>(
            r#"SELECT id, run_id, platform, symbol, side, entry_price, mark_price,
                      unrealized_pnl_pct, margin_usd, leverage,
                      has_stop_loss, has_take_profit, risk_tier, created_at
               FROM position_history
               WHERE symbol = ?
               ORDER BY id DESC
               LIMIT ?"#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Keep only the newest `keep` runs. Returns the number of deleted rows.
    pub async fn prune_runs(&self, keep: i64) -> DbResult<u64> {
        let result = sqlx::query(
            r#"DELETE FROM position_history
               WHERE run_id NOT IN (
                 SELECT run_id FROM position_history
                 GROUP BY run_id
                 ORDER BY MAX(id) DESC
                 LIMIT ?
               )"#,
        )
        .bind(keep)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
