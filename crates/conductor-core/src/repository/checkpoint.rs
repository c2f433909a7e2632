//! Checkpoint store trait definition and in-memory implementation.
//!
//! A checkpoint store is an opaque key/blob store keyed by `checkpoint_id`.
//! The infrastructure layer (conductor-infra) provides SQLite and filesystem
//! implementations; `MemoryCheckpointStore` here backs tests and
//! single-process runs that do not need to survive a restart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use conductor_types::checkpoint::{CheckpointFilter, CheckpointRecord};
use conductor_types::error::RepositoryError;
use dashmap::DashMap;
use uuid::Uuid;

/// Storage interface for checkpoint records.
///
/// Writes for the same `checkpoint_id` are last-writer-wins.
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    /// Insert or replace a record.
    fn put(
        &self,
        record: &CheckpointRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load a record by ID.
    fn get(
        &self,
        checkpoint_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<CheckpointRecord>, RepositoryError>> + Send;

    /// Records matching `filter`, newest first, at most `limit` when given.
    fn list(
        &self,
        filter: &CheckpointFilter,
        limit: Option<usize>,
    ) -> impl std::future::Future<Output = Result<Vec<CheckpointRecord>, RepositoryError>> + Send;

    /// Delete a record. Returns `true` if it existed.
    fn delete(
        &self,
        checkpoint_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete records matching `filter` created before `cutoff`. Returns the count deleted.
    fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        filter: &CheckpointFilter,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Shared stores are stores too.
impl<S: CheckpointStore> CheckpointStore for Arc<S> {
    async fn put(&self, record: &CheckpointRecord) -> Result<(), RepositoryError> {
        (**self).put(record).await
    }

    async fn get(&self, checkpoint_id: &Uuid) -> Result<Option<CheckpointRecord>, RepositoryError> {
        (**self).get(checkpoint_id).await
    }

    async fn list(
        &self,
        filter: &CheckpointFilter,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointRecord>, RepositoryError> {
        (**self).list(filter, limit).await
    }

    async fn delete(&self, checkpoint_id: &Uuid) -> Result<bool, RepositoryError> {
        (**self).delete(checkpoint_id).await
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        filter: &CheckpointFilter,
    ) -> Result<u64, RepositoryError> {
        (**self).delete_older_than(cutoff, filter).await
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

/// Process-local checkpoint store backed by a `DashMap`.
#[derive(Debug, Default, Clone)]
pub struct MemoryCheckpointStore {
    records: Arc<DashMap<Uuid, CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, record: &CheckpointRecord) -> Result<(), RepositoryError> {
        self.records.insert(record.checkpoint_id, record.clone());
        Ok(())
    }

    async fn get(&self, checkpoint_id: &Uuid) -> Result<Option<CheckpointRecord>, RepositoryError> {
        Ok(self.records.get(checkpoint_id).map(|r| r.value().clone()))
    }

    async fn list(
        &self,
        filter: &CheckpointFilter,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointRecord>, RepositoryError> {
        let mut records: Vec<CheckpointRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.checkpoint_id.cmp(&a.checkpoint_id))
        });
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn delete(&self, checkpoint_id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.records.remove(checkpoint_id).is_some())
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        filter: &CheckpointFilter,
    ) -> Result<u64, RepositoryError> {
        let before = self.records.len();
        self.records
            .retain(|_, r| !(r.created_at < cutoff && filter.matches(r)));
        Ok((before - self.records.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
