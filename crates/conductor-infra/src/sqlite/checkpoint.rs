//! SQLite checkpoint store implementation.
//!
//! Implements `CheckpointStore` from `conductor-core` using sqlx with split
//! read/write pools. Each record is stored as a JSON blob next to the scalar
//! columns used for filtering, ordering and retention scans.

use chrono::{DateTime, SecondsFormat, Utc};
use conductor_core::repository::CheckpointStore;
use conductor_types::checkpoint::{CheckpointFilter, CheckpointRecord};
use conductor_types::error::RepositoryError;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointStore`.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct CheckpointRow {
    record: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            record: row.try_get("record")?,
        })
    }

    fn into_record(self) -> Result<CheckpointRecord, RepositoryError> {
        serde_json::from_str(&self.record)
            .map_err(|e| RepositoryError::Serialization(format!("invalid checkpoint JSON: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fixed-width UTC timestamps so that text comparison matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Filter clause shared by `list` and `delete_older_than`. Each criterion is
/// bound twice: once for the NULL check, once for the comparison.
const FILTER_CLAUSE: &str = "(?1 IS NULL OR plan_id = ?1)
    AND (?2 IS NULL OR execution_id = ?2)
    AND (?3 IS NULL OR workspace_id = ?3)
    AND (?4 IS NULL OR user_id = ?4)";

struct FilterBinds {
    plan_id: Option<String>,
    execution_id: Option<String>,
    workspace_id: Option<String>,
    user_id: Option<String>,
}

impl From<&CheckpointFilter> for FilterBinds {
    fn from(filter: &CheckpointFilter) -> Self {
        Self {
            plan_id: filter.plan_id.map(|id| id.to_string()),
            execution_id: filter.execution_id.map(|id| id.to_string()),
            workspace_id: filter.workspace_id.clone(),
            user_id: filter.user_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore impl
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, record: &CheckpointRecord) -> Result<(), RepositoryError> {
        let record_json = serde_json::to_string(record)
            .map_err(|e| RepositoryError::Serialization(format!("serialize checkpoint: {e}")))?;

        sqlx::query(
            r#"INSERT INTO checkpoints
               (checkpoint_id, execution_id, plan_id, workspace_id, user_id,
                created_at, progress_percentage, record)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(checkpoint_id) DO UPDATE SET
                 execution_id = excluded.execution_id,
                 plan_id = excluded.plan_id,
                 workspace_id = excluded.workspace_id,
                 user_id = excluded.user_id,
                 created_at = excluded.created_at,
                 progress_percentage = excluded.progress_percentage,
                 record = excluded.record"#,
        )
        .bind(record.checkpoint_id.to_string())
        .bind(record.execution_id.to_string())
        .bind(record.plan_id.to_string())
        .bind(&record.workspace_id)
        .bind(&record.user_id)
        .bind(format_datetime(&record.created_at))
        .bind(record.progress_percentage)
        .bind(&record_json)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, checkpoint_id: &Uuid) -> Result<Option<CheckpointRecord>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM checkpoints WHERE checkpoint_id = ?")
            .bind(checkpoint_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = CheckpointRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        filter: &CheckpointFilter,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointRecord>, RepositoryError> {
        let binds = FilterBinds::from(filter);
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let sql = format!(
            "SELECT record FROM checkpoints WHERE {FILTER_CLAUSE}
             ORDER BY created_at DESC, checkpoint_id DESC LIMIT ?5"
        );
        let rows = sqlx::query(&sql)
            .bind(&binds.plan_id)
            .bind(&binds.execution_id)
            .bind(&binds.workspace_id)
            .bind(&binds.user_id)
            .bind(limit)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = CheckpointRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            records.push(r.into_record()?);
        }
        Ok(records)
    }

    async fn delete(&self, checkpoint_id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE checkpoint_id = ?")
            .bind(checkpoint_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        filter: &CheckpointFilter,
    ) -> Result<u64, RepositoryError> {
        let binds = FilterBinds::from(filter);
        let sql = format!("DELETE FROM checkpoints WHERE {FILTER_CLAUSE} AND created_at < ?5");

        let result = sqlx::query(&sql)
            .bind(&binds.plan_id)
            .bind(&binds.execution_id)
            .bind(&binds.workspace_id)
            .bind(&binds.user_id)
            .bind(format_datetime(&cutoff))
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
