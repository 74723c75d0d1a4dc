//! On-disk checkpoint, job, and summary stores.
//!
//! Layout under one root data directory:
//!
//! ```text
//! grants/<grantId>/checkpoint.json
//! grants/<grantId>/summaries/<scope>/<key>.txt
//! jobs/<jobId>.json
//! ```
//!
//! All writes go through [`atomic_write`] (temp file + rename) so concurrent
//! readers always observe a previously-committed state. A process-wide
//! advisory lock per `(grantId, kind)` prevents two workers from racing on
//! the same tenant.

pub mod checkpoint;
pub mod jobs;
pub mod summaries;

pub use checkpoint::CheckpointStore;
pub use jobs::{JobPatch, JobRecord, JobStatus, JobStore};
pub use summaries::{RollupScope, SummaryKey, SummaryStore};

use dashmap::DashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::{GrantId, JobKind, StoreError};

/// Write `bytes` to `path` atomically: temp file in the same directory, then
/// rename over the target.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Io {
        path: path.display().to_string(),
        reason: "no parent directory".to_string(),
    })?;
    std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
        path: parent.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| StoreError::Io {
        path: parent.display().to_string(),
        reason: e.to_string(),
    })?;
    tmp.write_all(bytes).map_err(|e| StoreError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    tmp.persist(path).map_err(|e| StoreError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Per-`(grantId, kind)` advisory locks.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a tenant/kind pair, waiting if another worker in
    /// this process holds it.
    pub async fn acquire(&self, grant_id: &GrantId, kind: JobKind) -> OwnedMutexGuard<()> {
        let key = format!("{grant_id}:{kind}");
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Aggregate handle over the three persistent stores.
pub struct DataStore {
    root: PathBuf,
    pub checkpoints: CheckpointStore,
    pub jobs: JobStore,
    pub summaries: SummaryStore,
    pub locks: SessionLocks,
}

impl DataStore {
    /// Open (or create) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root: PathBuf = root.into();
        std::fs::create_dir_all(root.join("grants")).map_err(|e| StoreError::Io {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::create_dir_all(root.join("jobs")).map_err(|e| StoreError::Io {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            checkpoints: CheckpointStore::new(root.clone()),
            jobs: JobStore::new(root.clone()),
            summaries: SummaryStore::new(root.clone()),
            locks: SessionLocks::new(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate tenants known to this node (any grant with on-disk state).
    pub fn list_grants(&self) -> Vec<GrantId> {
        let grants_dir = self.root.join("grants");
        let Ok(entries) = std::fs::read_dir(&grants_dir) else {
            return Vec::new();
        };
        let mut grants: Vec<GrantId> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .map(GrantId::new)
            .collect();
        grants.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        grants
    }

    /// Remove all state for a tenant. Returns `(summaries, jobs)` deleted.
    pub fn purge_grant(&self, grant_id: &GrantId) -> Result<(u64, u64), StoreError> {
        let summaries = self.summaries.purge_grant(grant_id)?;
        let jobs = self.jobs.purge_grant(grant_id)?;
        let grant_dir = self.root.join("grants").join(grant_id.as_str());
        if grant_dir.exists() {
            std::fs::remove_dir_all(&grant_dir).map_err(|e| StoreError::Io {
                path: grant_dir.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok((summaries, jobs))
    }
}
