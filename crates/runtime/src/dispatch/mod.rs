//! Job dispatch: turns HTTP requests, webhooks, and timer ticks into queued
//! ingestion jobs.
//!
//! Submissions are idempotent for the same `(grantId, sinceEpoch)` within a
//! short window: the duplicate returns the already-enqueued job record
//! instead of creating a second job.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::SyncConfig;
use crate::ingest::{BackfillJob, SessionQueue};
use crate::store::{DataStore, JobRecord};
use crate::types::{DispatchError, GrantId, JobId, JobKind};

/// Duplicate-submission suppression window.
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Messages per webhook-triggered delta. Webhooks fire per message, so the
/// window only needs to cover a small burst.
const WEBHOOK_DELTA_MAX: u64 = 200;

const SECONDS_PER_MONTH: i64 = 30 * 86_400;

/// Creates job records and enqueues them on the session queue.
pub struct Dispatcher {
    store: Arc<DataStore>,
    queue: SessionQueue,
    sync: SyncConfig,
    recent: Mutex<HashMap<(String, i64), (JobId, Instant)>>,
}

impl Dispatcher {
    pub fn new(store: Arc<DataStore>, queue: SessionQueue, sync: SyncConfig) -> Self {
        Self {
            store,
            queue,
            sync,
            recent: Mutex::new(HashMap::new()),
        }
    }

    fn validate_grant(grant_id: &GrantId) -> Result<(), DispatchError> {
        if grant_id.as_str().trim().is_empty() {
            return Err(DispatchError::Invalid("grantId is required".to_string()));
        }
        Ok(())
    }

    /// Return the existing job when `(grant, since)` was submitted within the
    /// dedup window, otherwise remember this submission.
    async fn deduplicate(
        &self,
        grant_id: &GrantId,
        since_epoch: i64,
    ) -> Result<Option<JobRecord>, DispatchError> {
        let key = (grant_id.as_str().to_string(), since_epoch);
        let mut recent = self.recent.lock().await;
        recent.retain(|_, (_, at)| at.elapsed() < DEDUP_WINDOW);
        if let Some((job_id, _)) = recent.get(&key) {
            if let Ok(record) = self.store.jobs.get(*job_id) {
                tracing::debug!(grant_id = %grant_id, since_epoch, "duplicate submission, reusing job");
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn remember(&self, grant_id: &GrantId, since_epoch: i64, job_id: JobId) {
        let mut recent = self.recent.lock().await;
        recent.insert(
            (grant_id.as_str().to_string(), since_epoch),
            (job_id, Instant::now()),
        );
    }

    async fn create_and_enqueue(
        &self,
        grant_id: GrantId,
        kind: JobKind,
        since_epoch: i64,
        max: u64,
    ) -> Result<JobRecord, DispatchError> {
        if let Some(existing) = self.deduplicate(&grant_id, since_epoch).await? {
            return Ok(existing);
        }

        let record = JobRecord::new(grant_id.clone(), kind, since_epoch, max);
        self.store
            .jobs
            .create(&record)
            .map_err(|e| DispatchError::QueueUnavailable(e.to_string()))?;
        self.remember(&grant_id, since_epoch, record.job_id).await;

        self.queue
            .enqueue(BackfillJob {
                job_id: record.job_id,
                grant_id,
                kind,
                since_epoch,
                max,
                attempt: 0,
            })
            .await;
        tracing::info!(
            job_id = %record.job_id,
            grant_id = %record.grant_id,
            kind = %kind,
            since_epoch,
            max,
            "ingestion job enqueued"
        );
        Ok(record)
    }

    /// Backfill: window starts `months` back (default from config), capped at
    /// 10,000 messages.
    pub async fn start_backfill(
        &self,
        grant_id: GrantId,
        months: Option<u32>,
        max: Option<u64>,
    ) -> Result<JobRecord, DispatchError> {
        Self::validate_grant(&grant_id)?;
        let months = months.unwrap_or(self.sync.delta_default_months).max(1);
        let since_epoch = Utc::now().timestamp() - i64::from(months) * SECONDS_PER_MONTH;
        let max = max.unwrap_or(10_000).clamp(1, 10_000);
        self.create_and_enqueue(grant_id, JobKind::Backfill, since_epoch, max)
            .await
    }

    /// Delta: window starts at the stored checkpoint (or the default backfill
    /// window when the tenant has none), capped to the delta window.
    pub async fn start_delta(
        &self,
        grant_id: GrantId,
        max: Option<u64>,
    ) -> Result<JobRecord, DispatchError> {
        Self::validate_grant(&grant_id)?;
        let since_epoch = match self
            .store
            .checkpoints
            .get(&grant_id)
            .map_err(|e| DispatchError::QueueUnavailable(e.to_string()))?
        {
            Some(checkpoint) => checkpoint,
            None => {
                Utc::now().timestamp()
                    - i64::from(self.sync.delta_default_months) * SECONDS_PER_MONTH
            }
        };
        let max = max
            .unwrap_or(self.sync.delta_max)
            .clamp(1, self.sync.delta_max);
        self.create_and_enqueue(grant_id, JobKind::Delta, since_epoch, max)
            .await
    }

    /// Webhook-triggered delta for one tenant: small window, small cap.
    pub async fn webhook_delta(&self, grant_id: GrantId) -> Result<JobRecord, DispatchError> {
        Self::validate_grant(&grant_id)?;
        let since_epoch = self
            .store
            .checkpoints
            .get(&grant_id)
            .map_err(|e| DispatchError::QueueUnavailable(e.to_string()))?
            .unwrap_or_else(|| Utc::now().timestamp() - 86_400);
        let max = WEBHOOK_DELTA_MAX.min(self.sync.delta_max);
        self.create_and_enqueue(grant_id, JobKind::Delta, since_epoch, max)
            .await
    }

    /// Timer tick: enqueue a delta for every known tenant. Returns how many
    /// jobs were enqueued.
    pub async fn delta_all(&self) -> usize {
        let grants = self.store.list_grants();
        let mut enqueued = 0usize;
        for grant in grants {
            match self.start_delta(grant.clone(), None).await {
                Ok(_) => enqueued += 1,
                Err(e) => {
                    tracing::warn!(grant_id = %grant, error = %e, "scheduled delta failed to enqueue");
                }
            }
        }
        enqueued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::JobHandler;
    use crate::store::JobStatus;
    use crate::types::RuntimeError;
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn handle(&self, _job: &BackfillJob) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn on_dead_letter(&self, _job: &BackfillJob, _e: &RuntimeError) {}
    }

    fn dispatcher() -> (Dispatcher, Arc<DataStore>, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(DataStore::open(dir.path()).unwrap());
        let queue = SessionQueue::start("test", 2, 3, Arc::new(NoopHandler));
        let d = Dispatcher::new(store.clone(), queue, SyncConfig::default());
        (d, store, dir)
    }

    #[tokio::test]
    async fn backfill_creates_a_queued_job() {
        let (dispatcher, store, _dir) = dispatcher();
        let record = dispatcher
            .start_backfill(GrantId::new("g1"), Some(3), Some(500))
            .await
            .unwrap();
        assert_eq!(record.kind, JobKind::Backfill);
        assert_eq!(record.max, 500);
        let now = Utc::now().timestamp();
        assert!(record.since_epoch <= now - 3 * SECONDS_PER_MONTH + 5);

        let listed = store.jobs.list(&GrantId::new("g1"), 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn backfill_max_is_capped_at_ten_thousand() {
        let (dispatcher, _store, _dir) = dispatcher();
        let record = dispatcher
            .start_backfill(GrantId::new("g1"), None, Some(50_000))
            .await
            .unwrap();
        assert_eq!(record.max, 10_000);
    }

    #[tokio::test]
    async fn delta_reads_checkpoint() {
        let (dispatcher, store, _dir) = dispatcher();
        store
            .checkpoints
            .set(&GrantId::new("g1"), 1_700_000_000)
            .unwrap();
        let record = dispatcher
            .start_delta(GrantId::new("g1"), None)
            .await
            .unwrap();
        assert_eq!(record.kind, JobKind::Delta);
        assert_eq!(record.since_epoch, 1_700_000_000);
        assert_eq!(record.max, 10_000);
    }

    #[tokio::test]
    async fn duplicate_submission_reuses_the_job() {
        let (dispatcher, store, _dir) = dispatcher();
        store.checkpoints.set(&GrantId::new("g1"), 100).unwrap();
        let first = dispatcher
            .start_delta(GrantId::new("g1"), None)
            .await
            .unwrap();
        let second = dispatcher
            .start_delta(GrantId::new("g1"), None)
            .await
            .unwrap();
        assert_eq!(first.job_id, second.job_id);

        let listed = store.jobs.list(&GrantId::new("g1"), 10).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn empty_grant_is_rejected() {
        let (dispatcher, _store, _dir) = dispatcher();
        let err = dispatcher
            .start_delta(GrantId::new("  "), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Invalid(_)));
    }

    #[tokio::test]
    async fn delta_all_enumerates_tenants() {
        let (dispatcher, store, dir) = dispatcher();
        std::fs::create_dir_all(dir.path().join("grants/g1")).unwrap();
        std::fs::create_dir_all(dir.path().join("grants/g2")).unwrap();
        store.checkpoints.set(&GrantId::new("g1"), 100).unwrap();
        store.checkpoints.set(&GrantId::new("g2"), 200).unwrap();

        let enqueued = dispatcher.delta_all().await;
        assert_eq!(enqueued, 2);
    }
}
