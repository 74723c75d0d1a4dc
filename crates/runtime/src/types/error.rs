//! Error types for the Voxmail runtime.
//!
//! Every subsystem has its own `thiserror` enum, aggregated into
//! [`RuntimeError`]. Each error maps to an [`ErrorKind`] that drives the retry
//! policy: workers and the bridge translate provider failures into a kind
//! before they cross a component boundary, and only `ErrorKind::is_retryable`
//! decides whether a job is re-enqueued.

use thiserror::Error;

use super::{GrantId, JobId};

/// Classification of a failure, independent of which subsystem produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request body or query. Returned as 4xx with no side effects.
    Validation,
    /// Provider 401/403 or signature failure. Fatal; never retried.
    Auth,
    /// 5xx, network, or timeout. Retried with exponential backoff.
    Transient,
    /// Part of a batch failed while the rest succeeded. Recorded, not retried.
    Partial,
    /// Input produced nothing to process (e.g. empty text after strip).
    Data,
    /// Unexpected internal failure. Job is marked failed.
    Internal,
}

impl ErrorKind {
    /// Whether a job that failed with this kind should be re-enqueued.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// Top-level runtime error.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Mail provider error: {0}")]
    Mail(#[from] MailError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector store error: {0}")]
    Vector(#[from] VectorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Summarizer error: {0}")]
    Summarizer(#[from] SummarizerError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Voice error: {0}")]
    Voice(#[from] VoiceError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Configuration(_) => ErrorKind::Validation,
            RuntimeError::Mail(e) => e.kind(),
            RuntimeError::Embedding(e) => e.kind(),
            RuntimeError::Vector(e) => e.kind(),
            RuntimeError::Store(e) => e.kind(),
            RuntimeError::Summarizer(e) => e.kind(),
            RuntimeError::Ingest(e) => e.kind(),
            RuntimeError::Dispatch(e) => e.kind(),
            RuntimeError::Agent(e) => e.kind(),
            RuntimeError::Voice(_) => ErrorKind::Internal,
            RuntimeError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Configuration resolution errors.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("missing required variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Mail provider errors.
///
/// 401/403 are fatal and surfaced verbatim; other 4xx are fatal to the request
/// but classified as validation; 5xx and network failures are retryable.
#[derive(Error, Debug, Clone)]
pub enum MailError {
    #[error("mail provider auth failure ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("mail provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("mail provider request failed: {0}")]
    Network(String),

    #[error("failed to parse mail provider response: {0}")]
    Response(String),
}

impl MailError {
    /// Build the right variant from an HTTP status + body.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 401 || status == 403 {
            MailError::Auth { status, body }
        } else {
            MailError::Api { status, body }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MailError::Auth { .. } => ErrorKind::Auth,
            MailError::Api { status, .. } if *status >= 500 => ErrorKind::Transient,
            MailError::Api { .. } => ErrorKind::Validation,
            MailError::Network(_) => ErrorKind::Transient,
            MailError::Response(_) => ErrorKind::Internal,
        }
    }
}

/// Embedding provider errors. Surfaced with status + body for diagnosis;
/// callers treat provider-side failures as retryable.
#[derive(Error, Debug, Clone)]
pub enum EmbeddingError {
    #[error("embedding provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("embedding request failed: {0}")]
    Network(String),

    #[error("invalid embedding response: {0}")]
    Response(String),
}

impl EmbeddingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EmbeddingError::Http { status, .. } if *status == 401 || *status == 403 => {
                ErrorKind::Auth
            }
            EmbeddingError::Http { .. } | EmbeddingError::Network(_) => ErrorKind::Transient,
            EmbeddingError::Response(_) => ErrorKind::Internal,
        }
    }
}

/// Vector store errors.
#[derive(Error, Debug, Clone)]
pub enum VectorError {
    #[error("vector store returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("vector store request failed: {0}")]
    Network(String),

    #[error("invalid vector store response: {0}")]
    Response(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

impl VectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VectorError::Http { status, .. } if *status == 401 || *status == 403 => ErrorKind::Auth,
            VectorError::Http { .. } | VectorError::Network(_) => ErrorKind::Transient,
            VectorError::Response(_) => ErrorKind::Internal,
            VectorError::Dimension { .. } => ErrorKind::Validation,
        }
    }
}

/// Checkpoint / job / summary store errors.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("store serialization error: {0}")]
    Serialization(String),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("invalid job transition for {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: String,
        to: String,
    },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Io { .. } => ErrorKind::Internal,
            StoreError::Serialization(_) => ErrorKind::Internal,
            StoreError::JobNotFound(_) => ErrorKind::Validation,
            StoreError::InvalidTransition { .. } => ErrorKind::Internal,
        }
    }
}

/// Summarizer errors. A failed map chunk is *not* an error — it is recorded in
/// the rollup's validation block. These variants cover whole-call failures.
#[derive(Error, Debug, Clone)]
pub enum SummarizerError {
    #[error("chat model returned {status}: {body}")]
    Model { status: u16, body: String },

    #[error("chat model request failed: {0}")]
    Network(String),

    #[error("could not parse model output as JSON: {0}")]
    Parse(String),

    #[error("all {0} map chunks failed")]
    AllChunksFailed(usize),
}

impl SummarizerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SummarizerError::Model { status, .. } if *status == 401 || *status == 403 => {
                ErrorKind::Auth
            }
            SummarizerError::Model { .. } | SummarizerError::Network(_) => ErrorKind::Transient,
            SummarizerError::Parse(_) => ErrorKind::Internal,
            SummarizerError::AllChunksFailed(_) => ErrorKind::Partial,
        }
    }
}

/// Ingestion worker errors, carrying tenant + job context for the logs.
#[derive(Error, Debug, Clone)]
pub enum IngestError {
    #[error("job {job_id} for {grant_id} failed: {source}")]
    Page {
        grant_id: GrantId,
        job_id: JobId,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("job {job_id} dead-lettered after {attempts} attempts: {last_error}")]
    DeadLettered {
        job_id: JobId,
        attempts: u32,
        last_error: String,
    },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Page { source, .. } => source.kind(),
            IngestError::DeadLettered { .. } => ErrorKind::Internal,
        }
    }
}

/// Job dispatch errors.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("webhook signature verification failed: {0}")]
    SignatureFailed(String),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Invalid(_) => ErrorKind::Validation,
            DispatchError::SignatureFailed(_) => ErrorKind::Auth,
            DispatchError::QueueUnavailable(_) => ErrorKind::Internal,
        }
    }
}

/// Backend agent runtime errors.
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("no specialist can handle: {0}")]
    NoRoute(String),

    #[error("tool '{name}' failed: {reason}")]
    Tool { name: String, reason: String },

    #[error("model call failed: {0}")]
    Model(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::NoRoute(_) => ErrorKind::Validation,
            AgentError::Tool { .. } => ErrorKind::Internal,
            AgentError::Model(_) => ErrorKind::Transient,
        }
    }
}

/// Voice narration layer errors. Never shown to the user verbatim — the
/// narration layer surfaces a generic message instead.
#[derive(Error, Debug, Clone)]
pub enum VoiceError {
    #[error("realtime session error: {0}")]
    Session(String),

    #[error("narration queue closed")]
    QueueClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_auth_kind() {
        let e = MailError::from_status(401, "unauthorized".into());
        assert_eq!(e.kind(), ErrorKind::Auth);
        let e = MailError::from_status(403, "forbidden".into());
        assert_eq!(e.kind(), ErrorKind::Auth);
    }

    #[test]
    fn server_errors_are_retryable() {
        let e = MailError::from_status(502, "bad gateway".into());
        assert_eq!(e.kind(), ErrorKind::Transient);
        assert!(e.kind().is_retryable());
    }

    #[test]
    fn client_errors_are_fatal() {
        let e = MailError::from_status(422, "bad cursor".into());
        assert_eq!(e.kind(), ErrorKind::Validation);
        assert!(!e.kind().is_retryable());
    }

    #[test]
    fn page_error_kind_follows_source() {
        let inner = RuntimeError::Mail(MailError::Network("timed out".into()));
        let e = IngestError::Page {
            grant_id: GrantId::new("g"),
            job_id: JobId::new(),
            source: Box::new(inner),
        };
        assert_eq!(e.kind(), ErrorKind::Transient);
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Auth,
            ErrorKind::Partial,
            ErrorKind::Data,
            ErrorKind::Internal,
        ] {
            assert!(!kind.is_retryable());
        }
    }
}
