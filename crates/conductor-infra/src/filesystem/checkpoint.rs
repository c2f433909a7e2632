//! Filesystem checkpoint store.
//!
//! One pretty-printed JSON file per checkpoint under a root directory:
//! ```text
//! {root}/
//!   0190f1c2-....json
//!   0190f1c3-....json
//! ```
//! Writes go to a unique temporary file first and are renamed into place, so
//! readers never observe a partially written record and concurrent writes to
//! the same id resolve to whichever rename lands last.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use conductor_core::repository::CheckpointStore;
use conductor_types::checkpoint::{CheckpointFilter, CheckpointRecord};
use conductor_types::error::RepositoryError;
use uuid::Uuid;

/// Checkpoint store that keeps each record as `{root}/{checkpoint_id}.json`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `{data_dir}/checkpoints`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("checkpoints"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, checkpoint_id: &Uuid) -> PathBuf {
        self.root.join(format!("{checkpoint_id}.json"))
    }

    async fn read_record(path: &Path) -> Result<Option<CheckpointRecord>, RepositoryError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = serde_json::from_str(&content).map_err(|e| {
            RepositoryError::Serialization(format!("invalid checkpoint {}: {e}", path.display()))
        })?;
        Ok(Some(record))
    }

    /// Every readable record under the root. Unparseable files are skipped.
    async fn scan(&self) -> Result<Vec<CheckpointRecord>, RepositoryError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable checkpoint");
                }
            }
        }
        Ok(records)
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, record: &CheckpointRecord) -> Result<(), RepositoryError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let json = serde_json::to_vec_pretty(record)?;
        let target = self.path_for(&record.checkpoint_id);
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", record.checkpoint_id, Uuid::now_v7()));

        tokio::fs::write(&tmp, &json).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn get(&self, checkpoint_id: &Uuid) -> Result<Option<CheckpointRecord>, RepositoryError> {
        Self::read_record(&self.path_for(checkpoint_id)).await
    }

    async fn list(
        &self,
        filter: &CheckpointFilter,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointRecord>, RepositoryError> {
        let mut records: Vec<CheckpointRecord> = self
            .scan()
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
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
        match tokio::fs::remove_file(self.path_for(checkpoint_id)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        filter: &CheckpointFilter,
    ) -> Result<u64, RepositoryError> {
        let mut deleted = 0;
        for record in self.scan().await? {
            if record.created_at < cutoff
                && filter.matches(&record)
                && self.delete(&record.checkpoint_id).await?
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
