//! Durable ingestion job records, one JSON file per job.
//!
//! Status transitions are one-way: `queued -> running -> (succeeded | failed
//! | deadlettered)`. A retried delivery stays `running` with `attempt` bumped;
//! records are retained for audit and removed only by tenant purge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{GrantId, JobId, JobKind, StoreError};

use super::atomic_write;

/// Lifecycle state of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Deadlettered,
}

impl JobStatus {
    /// Whether the one-way lifecycle permits moving to `next`.
    pub fn can_transition(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (
                    JobStatus::Running,
                    JobStatus::Succeeded | JobStatus::Failed | JobStatus::Deadlettered
                )
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Deadlettered
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Deadlettered => "deadlettered",
        };
        write!(f, "{s}")
    }
}

/// Durable record of one ingestion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub grant_id: GrantId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Ingestion window start, epoch seconds.
    pub since_epoch: i64,
    /// Cap on messages processed by this job.
    pub max: u64,
    pub processed: u64,
    pub indexed_vectors: u64,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(grant_id: GrantId, kind: JobKind, since_epoch: i64, max: u64) -> Self {
        Self {
            job_id: JobId::new(),
            grant_id,
            kind,
            status: JobStatus::Queued,
            since_epoch,
            max,
            processed: 0,
            indexed_vectors: 0,
            attempt: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}

/// Partial update applied by the worker that owns the job's session.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub processed: Option<u64>,
    pub indexed_vectors: Option<u64>,
    pub attempt: Option<u32>,
    pub error: Option<String>,
}

/// Disk-backed job store.
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, job_id: JobId) -> PathBuf {
        self.root.join("jobs").join(format!("{job_id}.json"))
    }

    pub fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.write(record)
    }

    fn write(&self, record: &JobRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        atomic_write(&self.path(record.job_id), &bytes)
    }

    pub fn get(&self, job_id: JobId) -> Result<JobRecord, StoreError> {
        let path = self.path(job_id);
        if !path.exists() {
            return Err(StoreError::JobNotFound(job_id));
        }
        let bytes = std::fs::read(&path).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Apply a patch. Status changes are validated against the one-way
    /// lifecycle; terminal transitions stamp `completed_at`.
    pub fn update(&self, job_id: JobId, patch: JobPatch) -> Result<JobRecord, StoreError> {
        let mut record = self.get(job_id)?;
        if let Some(next) = patch.status {
            if next != record.status {
                if !record.status.can_transition(next) {
                    return Err(StoreError::InvalidTransition {
                        job_id,
                        from: record.status.to_string(),
                        to: next.to_string(),
                    });
                }
                record.status = next;
                if next.is_terminal() {
                    record.completed_at = Some(Utc::now());
                }
            }
        }
        if let Some(p) = patch.processed {
            record.processed = p;
        }
        if let Some(iv) = patch.indexed_vectors {
            record.indexed_vectors = iv;
        }
        if let Some(a) = patch.attempt {
            record.attempt = a;
        }
        if let Some(e) = patch.error {
            record.error = Some(e);
        }
        self.write(&record)?;
        Ok(record)
    }

    /// Jobs for a tenant, newest first.
    pub fn list(&self, grant_id: &GrantId, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        let mut jobs = self.read_all()?;
        jobs.retain(|j| &j.grant_id == grant_id);
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    fn read_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let dir = self.root.join("jobs");
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Ok(Vec::new());
        };
        let mut jobs = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            match serde_json::from_slice::<JobRecord>(&bytes) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable job file");
                }
            }
        }
        Ok(jobs)
    }

    /// Remove every job belonging to a tenant. Returns the count removed.
    pub fn purge_grant(&self, grant_id: &GrantId) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for job in self.read_all()? {
            if &job.grant_id == grant_id {
                let path = self.path(job.job_id);
                std::fs::remove_file(&path).map_err(|e| StoreError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JobStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn create_get_roundtrip() {
        let (_dir, store) = store();
        let record = JobRecord::new(GrantId::new("g1"), JobKind::Backfill, 1_700_000_000, 500);
        store.create(&record).unwrap();
        let loaded = store.get(record.job_id).unwrap();
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.max, 500);
        assert!(loaded.completed_at.is_none());
    }

    #[test]
    fn lifecycle_is_one_way() {
        let (_dir, store) = store();
        let record = JobRecord::new(GrantId::new("g1"), JobKind::Delta, 0, 100);
        store.create(&record).unwrap();

        store
            .update(
                record.job_id,
                JobPatch {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .unwrap();
        let done = store
            .update(
                record.job_id,
                JobPatch {
                    status: Some(JobStatus::Succeeded),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(done.completed_at.is_some());

        // Succeeded is terminal.
        let err = store.update(
            record.job_id,
            JobPatch {
                status: Some(JobStatus::Running),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(StoreError::InvalidTransition { .. })));
    }

    #[test]
    fn queued_cannot_jump_to_terminal() {
        let (_dir, store) = store();
        let record = JobRecord::new(GrantId::new("g1"), JobKind::Delta, 0, 100);
        store.create(&record).unwrap();
        let err = store.update(
            record.job_id,
            JobPatch {
                status: Some(JobStatus::Succeeded),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(StoreError::InvalidTransition { .. })));
    }

    #[test]
    fn list_is_newest_first_and_scoped_to_grant() {
        let (_dir, store) = store();
        let mut first = JobRecord::new(GrantId::new("g1"), JobKind::Delta, 0, 100);
        first.started_at = Utc::now() - chrono::Duration::minutes(5);
        store.create(&first).unwrap();

        let second = JobRecord::new(GrantId::new("g1"), JobKind::Delta, 0, 100);
        store.create(&second).unwrap();

        let other = JobRecord::new(GrantId::new("g2"), JobKind::Delta, 0, 100);
        store.create(&other).unwrap();

        let jobs = store.list(&GrantId::new("g1"), 10).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_id, second.job_id);

        let limited = store.list(&GrantId::new("g1"), 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn purge_removes_only_that_grant() {
        let (_dir, store) = store();
        let a = JobRecord::new(GrantId::new("g1"), JobKind::Delta, 0, 100);
        let b = JobRecord::new(GrantId::new("g2"), JobKind::Delta, 0, 100);
        store.create(&a).unwrap();
        store.create(&b).unwrap();

        assert_eq!(store.purge_grant(&GrantId::new("g1")).unwrap(), 1);
        assert!(store.get(a.job_id).is_err());
        assert!(store.get(b.job_id).is_ok());
    }
}
