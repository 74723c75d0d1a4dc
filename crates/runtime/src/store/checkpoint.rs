//! Per-tenant ingestion checkpoints.
//!
//! A checkpoint is the last message `date` (epoch seconds) known to have been
//! ingested for a tenant. Advancement is monotonic: `advance` never moves the
//! value backwards, even when the provider returns pages out of order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{GrantId, StoreError};

use super::atomic_write;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    last_seen: i64,
    updated_at: String,
}

/// Disk-backed checkpoint store, one JSON file per tenant.
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, grant_id: &GrantId) -> PathBuf {
        self.root
            .join("grants")
            .join(grant_id.as_str())
            .join("checkpoint.json")
    }

    /// Read the checkpoint, `None` when the tenant has never completed a page.
    pub fn get(&self, grant_id: &GrantId) -> Result<Option<i64>, StoreError> {
        let path = self.path(grant_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file: CheckpointFile = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Some(file.last_seen))
    }

    /// Set the checkpoint unconditionally. Prefer [`CheckpointStore::advance`].
    pub fn set(&self, grant_id: &GrantId, epoch: i64) -> Result<(), StoreError> {
        let file = CheckpointFile {
            last_seen: epoch,
            updated_at: Utc::now().to_rfc3339(),
        };
        let bytes =
            serde_json::to_vec_pretty(&file).map_err(|e| StoreError::Serialization(e.to_string()))?;
        atomic_write(&self.path(grant_id), &bytes)
    }

    /// Advance to `max(current, epoch)`. Returns the stored value.
    pub fn advance(&self, grant_id: &GrantId, epoch: i64) -> Result<i64, StoreError> {
        let current = self.get(grant_id)?.unwrap_or(i64::MIN);
        let next = current.max(epoch);
        if next != current {
            self.set(grant_id, next)?;
        }
        Ok(next)
    }
}
