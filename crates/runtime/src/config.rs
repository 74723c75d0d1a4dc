//! Runtime configuration resolved from environment variables.
//!
//! Each provider-facing component has its own config struct with a
//! `from_env()` constructor. Components that cannot operate without
//! credentials resolve to `None`, which signals callers to fall back to mock
//! implementations (used heavily in tests and local development).

use std::path::PathBuf;
use std::time::Duration;

use crate::types::ConfigError;

/// Read an env var, treating empty strings as unset.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name)
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_csv(name: &str) -> Vec<String> {
    env_var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Mail provider (messages / contacts / events fetch).
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_key: String,
    pub base_url: String,
    /// Default grant used by the CLI when none is given.
    pub default_grant: Option<String>,
    pub timeout: Duration,
}

impl MailConfig {
    /// Resolve from `MAIL_API_KEY`, `MAIL_BASE`, `MAIL_GRANT_ID`.
    pub fn from_env() -> Option<Self> {
        let api_key = env_var("MAIL_API_KEY")?;
        let base_url =
            env_var("MAIL_BASE").unwrap_or_else(|| "https://api.us.nylas.com".to_string());
        Some(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_grant: env_var("MAIL_GRANT_ID"),
            timeout: Duration::from_secs(30),
        })
    }
}

/// Dense embedding model (OpenAI-compatible `/embeddings`).
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub dimension: usize,
    /// Max texts per provider call.
    pub batch_size: usize,
    pub timeout: Duration,
}

impl EmbeddingConfig {
    /// Resolve from `OPENAI_API_KEY` (or `EMBEDDING_API_KEY`) and
    /// `EMBEDDING_MODEL`. Default model is 1,536-dimensional.
    pub fn from_env() -> Option<Self> {
        let api_key = env_var("EMBEDDING_API_KEY").or_else(|| env_var("OPENAI_API_KEY"))?;
        let base_url =
            env_var("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Some(Self {
            api_key,
            model: env_var("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            dimension: env_parse("VECTOR_DIMENSION", 1536),
            batch_size: env_parse("EMBEDDING_BATCH_SIZE", 64),
            timeout: Duration::from_secs(30),
        })
    }
}

/// Chat-completion models for rollups, triage, and the backend agent.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: String,
    pub base_url: String,
    /// Model for the backend agent and rollup summaries (`TEXT_MODEL`).
    pub text_model: String,
    /// Model for priority triage (`PRIORITY_MODEL`, defaults to `text_model`).
    pub priority_model: String,
    pub timeout: Duration,
}

impl ChatConfig {
    pub fn from_env() -> Option<Self> {
        let api_key = env_var("OPENAI_API_KEY")?;
        let base_url =
            env_var("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let text_model = env_var("TEXT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let priority_model = env_var("PRIORITY_MODEL").unwrap_or_else(|| text_model.clone());
        Some(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            text_model,
            priority_model,
            timeout: Duration::from_secs(60),
        })
    }
}

/// Vector store (provider HTTP API; namespace = tenant).
#[derive(Debug, Clone)]
pub struct VectorConfig {
    pub api_key: String,
    pub index_host: String,
    pub dense_index: String,
    /// When set, a sparse index exists and hybrid retrieval is enabled.
    pub sparse_index: Option<String>,
    pub timeout: Duration,
}

impl VectorConfig {
    pub fn from_env() -> Option<Self> {
        let api_key = env_var("VECTOR_API_KEY")?;
        let index_host = env_var("VECTOR_INDEX_HOST")?;
        Some(Self {
            api_key,
            index_host: index_host.trim_end_matches('/').to_string(),
            dense_index: env_var("VECTOR_DENSE_INDEX_NAME").unwrap_or_else(|| "emails".to_string()),
            sparse_index: env_var("VECTOR_SPARSE_INDEX_NAME"),
            timeout: Duration::from_secs(30),
        })
    }
}

/// Priority-triage summarizer behavior.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Items per map chunk.
    pub map_chunk: usize,
    /// Body excerpt length fed to the model.
    pub body_chars: usize,
    /// Cap on candidates entering the reduce stage.
    pub max_candidates: usize,
    pub hint_senders: Vec<String>,
    pub hint_domains: Vec<String>,
    pub hint_keywords: Vec<String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            map_chunk: 8,
            body_chars: 500,
            max_candidates: 24,
            hint_senders: Vec::new(),
            hint_domains: Vec::new(),
            hint_keywords: Vec::new(),
        }
    }
}

impl TriageConfig {
    pub fn from_env() -> Self {
        Self {
            map_chunk: env_parse("PRIORITY_MAP_CHUNK", 8).max(1),
            body_chars: env_parse("PRIORITY_BODY_CHARS", 500),
            max_candidates: env_parse("PRIORITY_MAX_CANDIDATES", 24).max(3),
            hint_senders: env_csv("PRIORITY_HINT_SENDERS"),
            hint_domains: env_csv("PRIORITY_HINT_DOMAINS"),
            hint_keywords: env_csv("PRIORITY_HINT_KEYWORDS"),
        }
    }
}

/// Ingestion pacing and retry policy.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backfill window when the request does not specify one.
    pub delta_default_months: u32,
    /// Hard cap on messages per delta job.
    pub delta_max: u64,
    /// Attempts before a job is dead-lettered.
    pub max_delivery: u32,
    /// Cross-tenant worker parallelism.
    pub worker_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            delta_default_months: 6,
            delta_max: 10_000,
            max_delivery: 10,
            worker_concurrency: 4,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            delta_default_months: env_parse("DELTA_DEFAULT_MONTHS", 6).max(1),
            delta_max: env_parse::<u64>("DELTA_MAX", 10_000).min(10_000),
            max_delivery: env_parse("SYNC_MAX_DELIVERY", 10).max(1),
            worker_concurrency: env_parse("WORKER_CONCURRENCY", 4).max(1),
        }
    }
}

/// Periodic delta timer.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Six-field cron expression, seconds first. Default: top of each hour.
    pub schedule: String,
    pub run_on_startup: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            schedule: "0 0 * * * *".to_string(),
            run_on_startup: false,
        }
    }
}

impl TimerConfig {
    pub fn from_env() -> Self {
        Self {
            schedule: env_var("DELTA_TIMER_SCHEDULE").unwrap_or_else(|| "0 0 * * * *".to_string()),
            run_on_startup: env_var("DELTA_TIMER_RUN_ON_STARTUP").as_deref() == Some("1"),
        }
    }
}

/// Realtime speech session (ephemeral token mint).
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl RealtimeConfig {
    pub fn from_env() -> Option<Self> {
        let api_key = env_var("OPENAI_API_KEY")?;
        Some(Self {
            api_key,
            model: env_var("REALTIME_MODEL")
                .unwrap_or_else(|| "gpt-4o-realtime-preview".to_string()),
            base_url: env_var("REALTIME_BASE")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

/// HTTP server bind address.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl HttpConfig {
    pub fn from_env() -> Self {
        Self {
            bind_address: env_var("VOXMAIL_BIND").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env_parse("VOXMAIL_PORT", 8080),
        }
    }
}

/// Session-enabled ingestion queue.
///
/// When `connection` is unset the in-process session queue is used; the name
/// still identifies the queue in logs and job records.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub connection: Option<String>,
    pub name: String,
}

impl QueueConfig {
    pub fn from_env() -> Self {
        Self {
            connection: env_var("QUEUE_CONNECTION"),
            name: env_var("QUEUE_NAME").unwrap_or_else(|| "voxmail-ingest".to_string()),
        }
    }
}

/// Aggregate runtime settings.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub mail: Option<MailConfig>,
    pub embedding: Option<EmbeddingConfig>,
    pub chat: Option<ChatConfig>,
    pub vector: Option<VectorConfig>,
    pub realtime: Option<RealtimeConfig>,
    pub triage: TriageConfig,
    pub sync: SyncConfig,
    pub timer: TimerConfig,
    pub http: HttpConfig,
    pub queue: QueueConfig,
    /// Root of the on-disk state tree (`grants/`, `jobs/`).
    pub data_dir: PathBuf,
    /// Shared secret for webhook HMAC verification.
    pub webhook_secret: Option<String>,
}

impl RuntimeSettings {
    pub fn from_env() -> Self {
        Self {
            mail: MailConfig::from_env(),
            embedding: EmbeddingConfig::from_env(),
            chat: ChatConfig::from_env(),
            vector: VectorConfig::from_env(),
            realtime: RealtimeConfig::from_env(),
            triage: TriageConfig::from_env(),
            sync: SyncConfig::from_env(),
            timer: TimerConfig::from_env(),
            http: HttpConfig::from_env(),
            queue: QueueConfig::from_env(),
            data_dir: env_var("VOXMAIL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            webhook_secret: env_var("WEBHOOK_SECRET"),
        }
    }

    /// Validate that the settings can run a live ingestion (all providers
    /// configured). Mock-backed operation does not require this.
    pub fn require_providers(&self) -> Result<(), ConfigError> {
        if self.mail.is_none() {
            return Err(ConfigError::MissingVar("MAIL_API_KEY".to_string()));
        }
        if self.embedding.is_none() {
            return Err(ConfigError::MissingVar("OPENAI_API_KEY".to_string()));
        }
        if self.vector.is_none() {
            return Err(ConfigError::MissingVar(
                "VECTOR_API_KEY / VECTOR_INDEX_HOST".to_string(),
            ));
        }
        Ok(())
    }
}
