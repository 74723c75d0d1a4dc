//! Persisted rollup summaries, keyed by `(grantId, scope, threadId?, bucket)`.
//!
//! Summaries are overwritten in place on each new rollup for the same key.

use std::path::PathBuf;

use crate::types::{GrantId, StoreError};
use crate::vector::RecordType;

/// Rollup scope. Maps one-to-one onto the non-message [`RecordType`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollupScope {
    Thread,
    Day,
    Week,
    Month,
}

impl RollupScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollupScope::Thread => "thread",
            RollupScope::Day => "thread_day",
            RollupScope::Week => "thread_week",
            RollupScope::Month => "thread_month",
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            RollupScope::Thread => RecordType::Thread,
            RollupScope::Day => RecordType::ThreadDay,
            RollupScope::Week => RecordType::ThreadWeek,
            RollupScope::Month => RecordType::ThreadMonth,
        }
    }
}

/// Identity of one summary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryKey {
    pub scope: RollupScope,
    pub thread_id: String,
    /// Temporal bucket (`YYYY-MM-DD`, `YYYY-Www`, `YYYY-MM`); for the thread
    /// scope this equals the thread id.
    pub bucket: String,
}

impl SummaryKey {
    pub fn thread(thread_id: &str) -> Self {
        Self {
            scope: RollupScope::Thread,
            thread_id: thread_id.to_string(),
            bucket: thread_id.to_string(),
        }
    }

    pub fn bucketed(scope: RollupScope, thread_id: &str, bucket: &str) -> Self {
        Self {
            scope,
            thread_id: thread_id.to_string(),
            bucket: bucket.to_string(),
        }
    }

    /// Stable vector-record id for the summary's embedding.
    pub fn vector_id(&self) -> String {
        match self.scope {
            RollupScope::Thread => format!("thread:{}", self.thread_id),
            _ => format!("{}:{}:{}", self.scope.as_str(), self.thread_id, self.bucket),
        }
    }

    fn file_stem(&self) -> String {
        let raw = match self.scope {
            RollupScope::Thread => self.thread_id.clone(),
            _ => format!("{}@{}", self.thread_id, self.bucket),
        };
        sanitize(&raw)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '@' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Disk-backed summary store.
pub struct SummaryStore {
    root: PathBuf,
}

impl SummaryStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, grant_id: &GrantId, key: &SummaryKey) -> PathBuf {
        self.root
            .join("grants")
            .join(grant_id.as_str())
            .join("summaries")
            .join(key.scope.as_str())
            .join(format!("{}.txt", key.file_stem()))
    }

    pub fn write(&self, grant_id: &GrantId, key: &SummaryKey, text: &str) -> Result<(), StoreError> {
        super::atomic_write(&self.path(grant_id, key), text.as_bytes())
    }

    pub fn read(&self, grant_id: &GrantId, key: &SummaryKey) -> Result<Option<String>, StoreError> {
        let path = self.path(grant_id, key);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Count and remove every summary for a tenant.
    pub fn purge_grant(&self, grant_id: &GrantId) -> Result<u64, StoreError> {
        let dir = self
            .root
            .join("grants")
            .join(grant_id.as_str())
            .join("summaries");
        if !dir.exists() {
            return Ok(0);
        }
        let count = count_files(&dir);
        std::fs::remove_dir_all(&dir).map_err(|e| StoreError::Io {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(count)
    }
}

fn count_files(dir: &std::path::Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
