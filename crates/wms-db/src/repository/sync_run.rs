//! # Sync Run Repository
//!
//! History of orchestrator runs. The latest successful run drives the
//! staleness check for scheduled refreshes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// One stored orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncRunRow {
    pub id: String,
    /// `manual` or `scheduled`.
    pub trigger_kind: String,
    /// `success`, `partial`, `failure` or `skipped`.
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub created: i64,
    pub updated: i64,
    pub failed: i64,
    /// JSON array of log lines.
    pub log: String,
}

impl SyncRunRow {
    /// Decodes the stored log lines.
    pub fn log_lines(&self) -> DbResult<Vec<String>> {
        serde_json::from_str(&self.log).map_err(|e| DbError::Internal(e.to_string()))
    }

    /// Encodes log lines for storage.
    pub fn encode_log(lines: &[String]) -> DbResult<String> {
        serde_json::to_string(lines).map_err(|e| DbError::Internal(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct SyncRunRepository {
    pool: SqlitePool,
}

impl SyncRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncRunRepository { pool }
    }

    pub async fn record(&self, run: &SyncRunRow) -> DbResult<()> {
        debug!(id = %run.id, status = %run.status, "Recording sync run");
        sqlx::query(
            "INSERT INTO sync_runs (id, trigger_kind, status, started_at, finished_at, created, \
             updated, failed, log) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&run.id)
        .bind(&run.trigger_kind)
        .bind(&run.status)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.created)
        .bind(run.updated)
        .bind(run.failed)
        .bind(&run.log)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Finish time of the latest run with the given status.
    pub async fn last_finished_with(&self, status: &str) -> DbResult<Option<DateTime<Utc>>> {
        let finished: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT finished_at FROM sync_runs WHERE status = ?1 \
             ORDER BY finished_at DESC LIMIT 1",
        )
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;
        Ok(finished)
    }

    /// Most recent runs first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<SyncRunRow>> {
        let rows = sqlx::query_as::<_, SyncRunRow>(
            "SELECT id, trigger_kind, status, started_at, finished_at, created, updated, failed, log \
             FROM sync_runs ORDER BY started_at DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
