//! Session-serialized ingestion queue.
//!
//! The session key is the tenant id: jobs for a given grant are delivered to
//! exactly one consumer at a time, so checkpoint reads and writes for one
//! tenant are sequentially consistent without extra locking. Different
//! tenants run in parallel, bounded by worker concurrency.
//!
//! Retry policy: a delivery that fails with a transient error is retried in
//! place with exponential backoff (base 2s, factor 2, cap 60s, jitter ±25%)
//! and `attempt += 1`, keeping the session held so ordering is preserved.
//! After `max_delivery` attempts the job is dead-lettered.

use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};

use crate::types::{GrantId, JobId, JobKind, RuntimeError};

/// Queue message for one ingestion job.
#[derive(Debug, Clone)]
pub struct BackfillJob {
    pub job_id: JobId,
    pub grant_id: GrantId,
    pub kind: JobKind,
    /// Ingestion window start, epoch seconds.
    pub since_epoch: i64,
    /// Message cap for this job.
    pub max: u64,
    /// Delivery attempt, starting at 0.
    pub attempt: u32,
}

/// Consumer of queue deliveries.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one delivery. A transient error triggers a retry; any other
    /// outcome ends the delivery.
    async fn handle(&self, job: &BackfillJob) -> Result<(), RuntimeError>;

    /// Called once when a job exhausts its deliveries.
    async fn on_dead_letter(&self, job: &BackfillJob, last_error: &RuntimeError);
}

/// Exponential backoff with jitter for retry delays.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = 2.0_f64 * 2.0_f64.powi(attempt.min(16) as i32);
    let capped = exp.min(60.0);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_secs_f64(capped * jitter)
}

struct QueueState {
    pending: HashMap<String, VecDeque<BackfillJob>>,
    active: HashSet<String>,
}

struct QueueInner {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    permits: Arc<Semaphore>,
    max_delivery: u32,
    shutting_down: AtomicBool,
    idle: Notify,
}

/// Handle to the in-process session queue.
#[derive(Clone)]
pub struct SessionQueue {
    inner: Arc<QueueInner>,
}

impl SessionQueue {
    /// Start the queue dispatcher with `concurrency` parallel sessions.
    pub fn start(
        name: &str,
        concurrency: usize,
        max_delivery: u32,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let inner = Arc::new(QueueInner {
            name: name.to_string(),
            state: Mutex::new(QueueState {
                pending: HashMap::new(),
                active: HashSet::new(),
            }),
            notify: Notify::new(),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            max_delivery: max_delivery.max(1),
            shutting_down: AtomicBool::new(false),
            idle: Notify::new(),
        });

        let dispatcher = inner.clone();
        tokio::spawn(async move {
            Self::dispatch_loop(dispatcher, handler).await;
        });

        Self { inner }
    }

    /// Enqueue a job for its tenant session.
    pub async fn enqueue(&self, job: BackfillJob) {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            tracing::warn!(queue = %self.inner.name, job_id = %job.job_id, "queue shutting down, dropping job");
            return;
        }
        let session = job.grant_id.as_str().to_string();
        {
            let mut state = self.inner.state.lock().await;
            state.pending.entry(session).or_default().push_back(job);
        }
        self.inner.notify.notify_one();
    }

    /// Jobs waiting for a session slot (not counting in-flight deliveries).
    pub async fn pending_count(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.pending.values().map(VecDeque::len).sum()
    }

    /// Stop accepting work and wait for in-flight sessions to drain.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
        loop {
            // Register for the wakeup before checking state so a completion
            // between the check and the await cannot be missed.
            let notified = self.inner.idle.notified();
            {
                let state = self.inner.state.lock().await;
                let drained =
                    state.active.is_empty() && state.pending.values().all(VecDeque::is_empty);
                if drained {
                    return;
                }
            }
            notified.await;
        }
    }

    async fn dispatch_loop(inner: Arc<QueueInner>, handler: Arc<dyn JobHandler>) {
        loop {
            let next = {
                let mut state = inner.state.lock().await;
                let session = state
                    .pending
                    .iter()
                    .find(|(key, queue)| !queue.is_empty() && !state.active.contains(*key))
                    .map(|(key, _)| (*key).clone());
                match session {
                    Some(key) => {
                        let job = state
                            .pending
                            .get_mut(&key)
                            .and_then(VecDeque::pop_front)
                            .expect("session had a pending job");
                        state.active.insert(key.clone());
                        Some((key, job))
                    }
                    None => None,
                }
            };

            let Some((session, job)) = next else {
                if inner.shutting_down.load(Ordering::SeqCst) {
                    let state = inner.state.lock().await;
                    if state.active.is_empty() {
                        inner.idle.notify_waiters();
                        return;
                    }
                    drop(state);
                }
                inner.notify.notified().await;
                continue;
            };

            let permit = inner
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("queue semaphore closed");

            let task_inner = inner.clone();
            let task_handler = handler.clone();
            tokio::spawn(async move {
                let _permit = permit;
                Self::deliver(&task_inner, task_handler.as_ref(), job).await;

                let mut state = task_inner.state.lock().await;
                state.active.remove(&session);
                drop(state);
                task_inner.notify.notify_one();
                task_inner.idle.notify_waiters();
            });
        }
    }

    async fn deliver(inner: &QueueInner, handler: &dyn JobHandler, mut job: BackfillJob) {
        loop {
            match handler.handle(&job).await {
                Ok(()) => return,
                Err(e) if e.kind().is_retryable() => {
                    job.attempt += 1;
                    if job.attempt >= inner.max_delivery {
                        tracing::error!(
                            queue = %inner.name,
                            job_id = %job.job_id,
                            attempts = job.attempt,
                            error = %e,
                            "job dead-lettered"
                        );
                        handler.on_dead_letter(&job, &e).await;
                        return;
                    }
                    let delay = backoff_delay(job.attempt - 1);
                    tracing::warn!(
                        queue = %inner.name,
                        job_id = %job.job_id,
                        attempt = job.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        queue = %inner.name,
                        job_id = %job.job_id,
                        error = %e,
                        "job failed fatally"
                    );
                    return;
                }
            }
        }
    }
}
