//! Core identifier and shared types for the Voxmail runtime.

pub mod error;

pub use error::{
    AgentError, ConfigError, DispatchError, EmbeddingError, ErrorKind, IngestError, MailError,
    RuntimeError, StoreError, SummarizerError, VectorError, VoiceError,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Tenant identifier. One grant = one authenticated mailbox linkage.
///
/// Every piece of per-tenant state (vector namespace, checkpoint, job records,
/// summary files) is keyed and isolated by this id. The value is opaque; it is
/// assigned by the mail provider when the mailbox is linked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantId(String);

impl GrantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The vector-store namespace for this tenant (equal to the grant id).
    pub fn namespace(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GrantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for GrantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of ingestion job: backfill starts from `now - N months`, delta starts
/// from the stored checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Backfill,
    Delta,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Backfill => write!(f, "backfill"),
            JobKind::Delta => write!(f, "delta"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_id_roundtrips_through_serde() {
        let id = GrantId::new("grant-abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"grant-abc\"");
        let back: GrantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn namespace_equals_grant_id() {
        let id = GrantId::new("g1");
        assert_eq!(id.namespace(), "g1");
    }

    #[test]
    fn job_id_parses_its_display_form() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn job_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobKind::Backfill).unwrap(),
            "\"backfill\""
        );
        assert_eq!(serde_json::to_string(&JobKind::Delta).unwrap(), "\"delta\"");
    }
}
