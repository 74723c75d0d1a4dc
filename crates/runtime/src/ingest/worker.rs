//! Ingestion worker: consumes backfill/delta jobs and runs the
//! fetch → strip → chunk → embed → upsert → rollup pipeline.
//!
//! Per page, message upserts precede the checkpoint advance; the checkpoint
//! never decreases. Embedding is batched across the whole page rather than
//! per message.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::embedding::{embed_aligned, DenseEmbedder, SparseEmbedder};
use crate::mail::{ListMessagesParams, MailApi, MailMessage};
use crate::store::{DataStore, JobPatch, JobStatus, RollupScope, SummaryKey};
use crate::summarizer::{bucket, Summarizer};
use crate::types::{GrantId, RuntimeError};
use crate::vector::{RecordMetadata, SparseVector, VectorRecord, VectorStore};

use super::chunker::{chunk_id, chunk_text};
use super::queue::{BackfillJob, JobHandler};

/// Messages requested per provider page.
const PAGE_LIMIT: usize = 50;

/// Snippet length stored in vector metadata.
const SNIPPET_CHARS: usize = 160;

/// Everything the worker needs, injected so tests can run fully in memory.
pub struct IngestDeps {
    pub mail: Arc<dyn MailApi>,
    pub dense: Arc<dyn DenseEmbedder>,
    pub sparse: Option<Arc<dyn SparseEmbedder>>,
    pub vectors: Arc<dyn VectorStore>,
    pub store: Arc<DataStore>,
    /// When absent, rollups are skipped and only message vectors are written.
    pub summarizer: Option<Arc<Summarizer>>,
}

/// The ingestion job consumer.
pub struct IngestWorker {
    deps: IngestDeps,
}

struct PageOutcome {
    processed: u64,
    indexed: u64,
    max_date: Option<i64>,
    next_cursor: Option<String>,
    /// Threads touched by this page, with the messages that touched them.
    dirty_threads: BTreeMap<String, Vec<MailMessage>>,
}

impl IngestWorker {
    pub fn new(deps: IngestDeps) -> Self {
        Self { deps }
    }

    fn iso_date(epoch: i64) -> String {
        Utc.timestamp_opt(epoch, 0)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }

    fn snippet_of(message: &MailMessage, body: &str) -> String {
        message
            .snippet
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| body.chars().take(SNIPPET_CHARS).collect())
    }

    fn message_metadata(grant_id: &GrantId, message: &MailMessage, body: &str) -> RecordMetadata {
        RecordMetadata {
            record_type: crate::vector::RecordType::Message,
            grant_id: grant_id.as_str().to_string(),
            email_id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            subject: message.subject.clone(),
            from: message.sender_email(),
            from_domain: message.from_domain().unwrap_or_default(),
            to: message
                .to
                .iter()
                .filter_map(|a| a.email.clone())
                .collect(),
            date: message.date,
            date_created: Self::iso_date(message.date),
            snippet: Self::snippet_of(message, body),
            has_attachments: message.has_attachments(),
            unread: message.unread,
            bucket: None,
        }
    }

    /// Process one fetched page: chunk, embed in one batch, and upsert.
    async fn process_page(
        &self,
        grant_id: &GrantId,
        messages: Vec<MailMessage>,
        next_cursor: Option<String>,
    ) -> Result<PageOutcome, RuntimeError> {
        let mut chunk_texts: Vec<String> = Vec::new();
        // (message index, chunk index within message, metadata)
        let mut pending: Vec<(String, usize, RecordMetadata)> = Vec::new();
        let mut dirty_threads: BTreeMap<String, Vec<MailMessage>> = BTreeMap::new();
        let mut max_date: Option<i64> = None;
        let mut processed = 0u64;

        for message in &messages {
            processed += 1;
            max_date = Some(max_date.map_or(message.date, |d: i64| d.max(message.date)));

            let body = message.body_text();
            if body.is_empty() {
                tracing::debug!(message_id = %message.id, "no text after strip, skipping");
                continue;
            }
            let metadata = Self::message_metadata(grant_id, message, &body);
            // The subject leads the embedded text; short queries usually hit it.
            let text = if message.subject.is_empty() {
                body.clone()
            } else {
                format!("{}\n{body}", message.subject)
            };
            for (index, chunk) in chunk_text(&text).into_iter().enumerate() {
                chunk_texts.push(chunk);
                pending.push((message.id.clone(), index, metadata.clone()));
            }
            if !message.thread_id.is_empty() {
                dirty_threads
                    .entry(message.thread_id.clone())
                    .or_default()
                    .push(message.clone());
            }
        }

        let dense = embed_aligned(self.deps.dense.as_ref(), &chunk_texts).await?;
        let sparse: Vec<Option<SparseVector>> = match &self.deps.sparse {
            Some(embedder) => embedder
                .embed_sparse(&chunk_texts)
                .await?
                .into_iter()
                .map(Some)
                .collect(),
            None => vec![None; chunk_texts.len()],
        };

        let records: Vec<VectorRecord> = pending
            .into_iter()
            .zip(dense)
            .zip(sparse)
            .filter(|((_, vector), _)| !vector.is_empty())
            .map(|(((message_id, index, metadata), vector), sparse)| VectorRecord {
                id: chunk_id(&message_id, index),
                values: Some(vector),
                sparse_values: sparse,
                metadata: metadata.to_value(),
            })
            .collect();

        let indexed = if records.is_empty() {
            0
        } else {
            self.deps.vectors.upsert(grant_id, records).await? as u64
        };

        Ok(PageOutcome {
            processed,
            indexed,
            max_date,
            next_cursor,
            dirty_threads,
        })
    }

    /// Recompute rollups for every scope a page's messages touched. A rollup
    /// folds the previously stored summary in as a prior, so incremental
    /// ingestion stays bounded by page size.
    async fn refresh_rollups(
        &self,
        grant_id: &GrantId,
        dirty_threads: &BTreeMap<String, Vec<MailMessage>>,
    ) -> Result<u64, RuntimeError> {
        let Some(summarizer) = &self.deps.summarizer else {
            return Ok(0);
        };
        let mut upserted = 0u64;

        for (thread_id, messages) in dirty_threads {
            let mut keys: Vec<SummaryKey> = vec![SummaryKey::thread(thread_id)];
            for message in messages {
                keys.push(SummaryKey::bucketed(
                    RollupScope::Day,
                    thread_id,
                    &bucket::day_bucket(message.date),
                ));
                keys.push(SummaryKey::bucketed(
                    RollupScope::Week,
                    thread_id,
                    &bucket::week_bucket(message.date),
                ));
                keys.push(SummaryKey::bucketed(
                    RollupScope::Month,
                    thread_id,
                    &bucket::month_bucket(message.date),
                ));
            }
            let mut seen = std::collections::HashSet::new();
            keys.retain(|k| seen.insert(k.clone()));

            for key in keys {
                let in_scope: Vec<&MailMessage> = messages
                    .iter()
                    .filter(|m| match key.scope {
                        RollupScope::Thread => true,
                        RollupScope::Day => bucket::day_bucket(m.date) == key.bucket,
                        RollupScope::Week => bucket::week_bucket(m.date) == key.bucket,
                        RollupScope::Month => bucket::month_bucket(m.date) == key.bucket,
                    })
                    .collect();
                if in_scope.is_empty() {
                    continue;
                }

                let mut texts: Vec<String> = Vec::new();
                if let Some(prior) = self.deps.store.summaries.read(grant_id, &key)? {
                    texts.push(format!("Earlier summary: {prior}"));
                }
                for m in &in_scope {
                    let body = m.body_text();
                    let excerpt: String = body.chars().take(600).collect();
                    texts.push(format!("subject: {}\n{}", m.subject, excerpt));
                }

                let (summary, _validation) = match summarizer.rollup_texts(&texts).await {
                    Ok(out) => out,
                    Err(e) => {
                        // A failed rollup never fails the page; readers
                        // tolerate a momentarily stale rollup.
                        tracing::warn!(
                            grant_id = %grant_id,
                            thread_id = %thread_id,
                            scope = key.scope.as_str(),
                            error = %e,
                            "rollup skipped"
                        );
                        continue;
                    }
                };

                self.deps.store.summaries.write(grant_id, &key, &summary)?;

                let latest = in_scope
                    .iter()
                    .max_by_key(|m| m.date)
                    .expect("in_scope checked non-empty");
                let embedded = embed_aligned(self.deps.dense.as_ref(), &[summary.clone()]).await?;
                let Some(vector) = embedded.into_iter().next().filter(|v| !v.is_empty()) else {
                    continue;
                };
                let metadata = RecordMetadata {
                    record_type: key.scope.record_type(),
                    grant_id: grant_id.as_str().to_string(),
                    email_id: latest.id.clone(),
                    thread_id: thread_id.clone(),
                    subject: latest.subject.clone(),
                    from: latest.sender_email(),
                    from_domain: latest.from_domain().unwrap_or_default(),
                    to: Vec::new(),
                    date: latest.date,
                    date_created: Self::iso_date(latest.date),
                    snippet: summary.chars().take(SNIPPET_CHARS).collect(),
                    has_attachments: false,
                    unread: false,
                    bucket: match key.scope {
                        RollupScope::Thread => None,
                        _ => Some(key.bucket.clone()),
                    },
                };
                upserted += self
                    .deps
                    .vectors
                    .upsert(
                        grant_id,
                        vec![VectorRecord {
                            id: key.vector_id(),
                            values: Some(vector),
                            sparse_values: None,
                            metadata: metadata.to_value(),
                        }],
                    )
                    .await? as u64;
            }
        }
        Ok(upserted)
    }

    async fn run(&self, job: &BackfillJob) -> Result<(), RuntimeError> {
        let grant_id = &job.grant_id;
        let mut page_token: Option<String> = None;
        let mut processed = 0u64;
        let mut indexed = 0u64;

        loop {
            let remaining = job.max.saturating_sub(processed);
            if remaining == 0 {
                break;
            }
            let params = ListMessagesParams {
                grant_id: grant_id.clone(),
                limit: (remaining as usize).min(PAGE_LIMIT),
                page_token: page_token.clone(),
                received_after: Some(job.since_epoch),
                view: Some("expanded".to_string()),
            };
            let page = self.deps.mail.list_messages_page(&params).await?;
            if page.messages.is_empty() {
                break;
            }

            let outcome = self
                .process_page(grant_id, page.messages, page.next_cursor)
                .await?;
            indexed += outcome.indexed;
            indexed += self
                .refresh_rollups(grant_id, &outcome.dirty_threads)
                .await?;
            processed += outcome.processed;

            // Upserts for the page are durable; only now may the checkpoint
            // move, and it never moves backwards.
            if let Some(max_date) = outcome.max_date {
                self.deps.store.checkpoints.advance(grant_id, max_date)?;
            }
            self.deps.store.jobs.update(
                job.job_id,
                JobPatch {
                    processed: Some(processed),
                    indexed_vectors: Some(indexed),
                    ..Default::default()
                },
            )?;

            tracing::info!(
                grant_id = %grant_id,
                job_id = %job.job_id,
                processed,
                indexed,
                "ingestion page complete"
            );

            match outcome.next_cursor {
                Some(cursor) => page_token = Some(cursor),
                None => break,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for IngestWorker {
    async fn handle(&self, job: &BackfillJob) -> Result<(), RuntimeError> {
        // Session queue already serializes per tenant; the advisory lock
        // guards against a second worker pool on the same store.
        let _guard = self
            .deps
            .store
            .locks
            .acquire(&job.grant_id, job.kind)
            .await;

        let record = self.deps.store.jobs.get(job.job_id)?;
        if record.status == JobStatus::Queued {
            self.deps.store.jobs.update(
                job.job_id,
                JobPatch {
                    status: Some(JobStatus::Running),
                    attempt: Some(job.attempt),
                    ..Default::default()
                },
            )?;
        } else if record.status.is_terminal() {
            tracing::warn!(job_id = %job.job_id, status = %record.status, "job already terminal, skipping");
            return Ok(());
        } else {
            self.deps.store.jobs.update(
                job.job_id,
                JobPatch {
                    attempt: Some(job.attempt),
                    ..Default::default()
                },
            )?;
        }

        let outcome = self.run(job).await.map_err(|e| {
            RuntimeError::Ingest(crate::types::IngestError::Page {
                grant_id: job.grant_id.clone(),
                job_id: job.job_id,
                source: Box::new(e),
            })
        });
        match outcome {
            Ok(()) => {
                self.deps.store.jobs.update(
                    job.job_id,
                    JobPatch {
                        status: Some(JobStatus::Succeeded),
                        ..Default::default()
                    },
                )?;
                Ok(())
            }
            Err(e) if e.kind().is_retryable() => {
                // Keep the last error on the record; the queue re-delivers.
                let _ = self.deps.store.jobs.update(
                    job.job_id,
                    JobPatch {
                        error: Some(e.to_string()),
                        ..Default::default()
                    },
                );
                Err(e)
            }
            Err(e) => {
                tracing::error!(
                    grant_id = %job.grant_id,
                    job_id = %job.job_id,
                    error = %e,
                    "job failed fatally"
                );
                let _ = self.deps.store.jobs.update(
                    job.job_id,
                    JobPatch {
                        status: Some(JobStatus::Failed),
                        error: Some(e.to_string()),
                        ..Default::default()
                    },
                );
                Ok(())
            }
        }
    }

    async fn on_dead_letter(&self, job: &BackfillJob, last_error: &RuntimeError) {
        let error = crate::types::IngestError::DeadLettered {
            job_id: job.job_id,
            attempts: job.attempt,
            last_error: last_error.to_string(),
        };
        let _ = self.deps.store.jobs.update(
            job.job_id,
            JobPatch {
                status: Some(JobStatus::Deadlettered),
                attempt: Some(job.attempt),
                error: Some(error.to_string()),
                ..Default::default()
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockDenseEmbedder;
    use crate::mail::{EmailAddress, MessagePage};
    use crate::store::JobRecord;
    use crate::types::{JobKind, MailError};
    use crate::vector::{InMemoryVectorStore, QueryRequest};
    use tokio::sync::Mutex;

    struct FakeMail {
        pages: Mutex<Vec<MessagePage>>,
        fail_first: Mutex<bool>,
    }

    #[async_trait]
    impl MailApi for FakeMail {
        async fn list_messages_page(
            &self,
            _params: &ListMessagesParams,
        ) -> Result<MessagePage, MailError> {
            let mut fail_first = self.fail_first.lock().await;
            if *fail_first {
                *fail_first = false;
                return Err(MailError::Network("connection reset".to_string()));
            }
            drop(fail_first);
            let mut pages = self.pages.lock().await;
            if pages.is_empty() {
                Ok(MessagePage::default())
            } else {
                Ok(pages.remove(0))
            }
        }

        async fn list_unread(
            &self,
            _grant_id: &GrantId,
            _limit: usize,
            _received_after: Option<i64>,
        ) -> Result<Vec<MailMessage>, MailError> {
            Ok(Vec::new())
        }

        async fn list_contacts(
            &self,
            _grant_id: &GrantId,
            _limit: usize,
        ) -> Result<Vec<crate::mail::Contact>, MailError> {
            Ok(Vec::new())
        }

        async fn list_events(
            &self,
            _grant_id: &GrantId,
            _limit: usize,
        ) -> Result<Vec<crate::mail::CalendarEvent>, MailError> {
            Ok(Vec::new())
        }
    }

    fn message(id: &str, thread: &str, date: i64, body: &str) -> MailMessage {
        MailMessage {
            id: id.to_string(),
            thread_id: thread.to_string(),
            subject: format!("subject {id}"),
            from: vec![EmailAddress::new(Some("Ann"), Some("ann@corp.example"))],
            date,
            unread: true,
            body: Some(body.to_string()),
            ..Default::default()
        }
    }

    fn worker_with(
        pages: Vec<MessagePage>,
        fail_first: bool,
    ) -> (IngestWorker, Arc<InMemoryVectorStore>, Arc<DataStore>, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(DataStore::open(dir.path()).unwrap());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let worker = IngestWorker::new(IngestDeps {
            mail: Arc::new(FakeMail {
                pages: Mutex::new(pages),
                fail_first: Mutex::new(fail_first),
            }),
            dense: Arc::new(MockDenseEmbedder::new(64)),
            sparse: None,
            vectors: vectors.clone(),
            store: store.clone(),
            summarizer: None,
        });
        (worker, vectors, store, dir)
    }

    fn queued_job(store: &DataStore, grant: &str, max: u64) -> BackfillJob {
        let record = JobRecord::new(GrantId::new(grant), JobKind::Backfill, 0, max);
        store.jobs.create(&record).unwrap();
        BackfillJob {
            job_id: record.job_id,
            grant_id: record.grant_id.clone(),
            kind: record.kind,
            since_epoch: record.since_epoch,
            max: record.max,
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn pipeline_indexes_and_advances_checkpoint() {
        let page = MessagePage {
            messages: vec![
                message("m1", "t1", 1_700_000_010, "first message body"),
                message("m2", "t1", 1_700_000_020, "second message body"),
            ],
            next_cursor: None,
        };
        let (worker, vectors, store, _dir) = worker_with(vec![page], false);
        let grant = GrantId::new("g1");
        let job = queued_job(&store, "g1", 100);

        worker.handle(&job).await.unwrap();

        let record = store.jobs.get(job.job_id).unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.processed, 2);
        assert_eq!(record.indexed_vectors, 2);
        assert!(record.completed_at.is_some());

        assert_eq!(store.checkpoints.get(&grant).unwrap(), Some(1_700_000_020));

        let stats = vectors.describe_stats(Some(&grant), None).await.unwrap();
        assert_eq!(stats.total, 2);
    }

    #[tokio::test]
    async fn empty_body_messages_are_skipped() {
        let page = MessagePage {
            messages: vec![
                message("m1", "t1", 100, ""),
                message("m2", "t1", 200, "<div>  </div>"),
                message("m3", "t1", 300, "real content"),
            ],
            next_cursor: None,
        };
        let (worker, vectors, store, _dir) = worker_with(vec![page], false);
        let job = queued_job(&store, "g1", 100);
        worker.handle(&job).await.unwrap();

        let grant = GrantId::new("g1");
        let stats = vectors.describe_stats(Some(&grant), None).await.unwrap();
        assert_eq!(stats.total, 1);
        // Skipped messages still count as processed and move the checkpoint.
        let record = store.jobs.get(job.job_id).unwrap();
        assert_eq!(record.processed, 3);
        assert_eq!(store.checkpoints.get(&grant).unwrap(), Some(300));
    }

    #[tokio::test]
    async fn zero_message_page_terminates_before_max() {
        let (worker, _vectors, store, _dir) = worker_with(vec![MessagePage::default()], false);
        let job = queued_job(&store, "g1", 100);
        worker.handle(&job).await.unwrap();
        let record = store.jobs.get(job.job_id).unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.processed, 0);
    }

    #[tokio::test]
    async fn transient_mail_failure_bubbles_for_retry() {
        let page = MessagePage {
            messages: vec![message("m1", "t1", 100, "body")],
            next_cursor: None,
        };
        let (worker, _vectors, store, _dir) = worker_with(vec![page], true);
        let job = queued_job(&store, "g1", 100);

        let err = worker.handle(&job).await.unwrap_err();
        assert!(err.kind().is_retryable());
        // Not terminal: the queue will redeliver.
        let record = store.jobs.get(job.job_id).unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert!(record.error.is_some());

        // Second delivery succeeds.
        let retry = BackfillJob {
            attempt: 1,
            ..job.clone()
        };
        worker.handle(&retry).await.unwrap();
        let record = store.jobs.get(job.job_id).unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.attempt, 1);
    }

    #[tokio::test]
    async fn auth_failure_is_fatal_and_leaves_checkpoint() {
        struct AuthFailMail;
        #[async_trait]
        impl MailApi for AuthFailMail {
            async fn list_messages_page(
                &self,
                _params: &ListMessagesParams,
            ) -> Result<MessagePage, MailError> {
                Err(MailError::Auth {
                    status: 401,
                    body: "invalid grant".to_string(),
                })
            }
            async fn list_unread(
                &self,
                _g: &GrantId,
                _l: usize,
                _r: Option<i64>,
            ) -> Result<Vec<MailMessage>, MailError> {
                Ok(Vec::new())
            }
            async fn list_contacts(
                &self,
                _g: &GrantId,
                _l: usize,
            ) -> Result<Vec<crate::mail::Contact>, MailError> {
                Ok(Vec::new())
            }
            async fn list_events(
                &self,
                _g: &GrantId,
                _l: usize,
            ) -> Result<Vec<crate::mail::CalendarEvent>, MailError> {
                Ok(Vec::new())
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(DataStore::open(dir.path()).unwrap());
        let worker = IngestWorker::new(IngestDeps {
            mail: Arc::new(AuthFailMail),
            dense: Arc::new(MockDenseEmbedder::new(64)),
            sparse: None,
            vectors: Arc::new(InMemoryVectorStore::new()),
            store: store.clone(),
            summarizer: None,
        });
        let job = queued_job(&store, "g1", 100);

        // Fatal errors resolve the delivery (no retry) and mark the job.
        worker.handle(&job).await.unwrap();
        let record = store.jobs.get(job.job_id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("invalid grant"));
        assert_eq!(store.checkpoints.get(&GrantId::new("g1")).unwrap(), None);
    }

    #[tokio::test]
    async fn reingestion_produces_no_duplicates() {
        let page = || MessagePage {
            messages: vec![message("m1", "t1", 100, "stable body")],
            next_cursor: None,
        };
        let (worker, vectors, store, _dir) = worker_with(vec![page()], false);
        let job = queued_job(&store, "g1", 100);
        worker.handle(&job).await.unwrap();

        // Same message again under a new job, same stores.
        let worker2 = IngestWorker::new(IngestDeps {
            mail: Arc::new(FakeMail {
                pages: Mutex::new(vec![page()]),
                fail_first: Mutex::new(false),
            }),
            dense: Arc::new(MockDenseEmbedder::new(64)),
            sparse: None,
            vectors: vectors.clone(),
            store: store.clone(),
            summarizer: None,
        });
        let job2 = queued_job(&store, "g1", 100);
        worker2.handle(&job2).await.unwrap();

        let grant = GrantId::new("g1");
        let stats = vectors.describe_stats(Some(&grant), None).await.unwrap();
        assert_eq!(stats.total, 1);

        let matches = vectors
            .query(QueryRequest {
                vector: crate::embedding::MockDenseEmbedder::new(64)
                    .embed(&["stable body".to_string()])
                    .await
                    .unwrap()
                    .remove(0),
                top_k: 10,
                namespace: grant,
                filter: None,
                include_metadata: true,
            })
            .await
            .unwrap();
        assert_eq!(matches[0].metadata["type"], "message");
        assert_eq!(matches[0].metadata["grant_id"], "g1");
    }
}
