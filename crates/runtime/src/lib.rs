//! Voxmail runtime: mailbox ingestion, semantic retrieval, and hybrid voice
//! agent orchestration.
//!
//! The runtime is split along the data path. Ingestion runs mail pages
//! through chunking, embedding, and the vector store, with per-tenant
//! checkpoints and hierarchical rollups. Retrieval serves filtered search,
//! aggregation, and counts over the same index. The agent layer drives both:
//! a backend router plans tool calls and streams lifecycle events; the voice
//! layer acknowledges immediately, narrates those events in order, and
//! summarizes at the end.

pub mod agents;
pub mod api;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod embedding;
pub mod ingest;
pub mod mail;
pub mod retrieval;
pub mod scheduler;
pub mod store;
pub mod summarizer;
pub mod tools;
pub mod types;
pub mod vector;
pub mod voice;

pub use agents::{
    run_backend_agent, spawn_backend_agent, AgentBundle, AgentDeps, AgentEvent, AgentRunner,
    BackendRunResult, EventSink, LlmAgentRunner, RunOptions, ScratchpadStore, SpecialistKind,
};
pub use bridge::{CallGraph, CallGraphNode, HybridBridge, UIDashboardEvent};
pub use config::RuntimeSettings;
pub use dispatch::Dispatcher;
pub use ingest::{BackfillJob, IngestDeps, IngestWorker, SessionQueue};
pub use retrieval::RetrievalEngine;
pub use scheduler::DeltaTimer;
pub use store::{DataStore, JobRecord, JobStatus};
pub use summarizer::Summarizer;
pub use types::{ErrorKind, GrantId, JobId, JobKind, RuntimeError};
pub use vector::{InMemoryVectorStore, PineconeVectorStore, VectorStore};
pub use voice::{NarrationMode, Narrator, RealtimeVoiceSession, VoiceSession};

use std::sync::Arc;

use crate::embedding::{
    dense_embedder_from_config, DenseEmbedder, ProviderSparseEmbedder, SparseEmbedder,
};
use crate::mail::{MailApi, NullMailClient, NylasMailClient};
use crate::summarizer::OpenAiChatModel;
use crate::types::ConfigError;

/// Sparse model used when a sparse index pair is configured.
const SPARSE_EMBED_MODEL: &str = "pinecone-sparse-english-v0";
const SPARSE_EMBED_BASE: &str = "https://api.pinecone.io";

/// Fully wired runtime: adapters, stores, queue, dispatcher, retrieval.
///
/// Components fall back to in-memory/mock implementations when their
/// provider is not configured, so a credential-less environment still runs
/// end to end.
pub struct AssistantRuntime {
    pub settings: RuntimeSettings,
    pub store: Arc<DataStore>,
    pub mail: Arc<dyn MailApi>,
    pub dense: Arc<dyn DenseEmbedder>,
    pub sparse: Option<Arc<dyn SparseEmbedder>>,
    pub vectors: Arc<dyn VectorStore>,
    pub summarizer: Option<Arc<Summarizer>>,
    pub retrieval: Arc<RetrievalEngine>,
    pub queue: SessionQueue,
    pub dispatcher: Arc<Dispatcher>,
}

impl AssistantRuntime {
    /// Wire every component from settings, starting the ingestion queue.
    pub fn from_settings(settings: RuntimeSettings) -> Result<Self, RuntimeError> {
        let store = Arc::new(DataStore::open(&settings.data_dir)?);

        let mail: Arc<dyn MailApi> = match &settings.mail {
            Some(config) => Arc::new(NylasMailClient::new(config)?),
            None => {
                tracing::warn!("MAIL_API_KEY not set; mail adapter is inert");
                Arc::new(NullMailClient)
            }
        };

        let dimension = settings
            .embedding
            .as_ref()
            .map(|e| e.dimension)
            .unwrap_or(1536);
        let dense = dense_embedder_from_config(settings.embedding.as_ref(), dimension)?;

        let sparse: Option<Arc<dyn SparseEmbedder>> = match &settings.vector {
            Some(vector) if vector.sparse_index.is_some() => Some(Arc::new(
                ProviderSparseEmbedder::new(&vector.api_key, SPARSE_EMBED_BASE, SPARSE_EMBED_MODEL)?,
            )),
            _ => None,
        };

        let vectors: Arc<dyn VectorStore> = match &settings.vector {
            Some(config) => Arc::new(PineconeVectorStore::new(config)?),
            None => {
                tracing::warn!("VECTOR_INDEX_HOST not set; using in-memory vector store");
                Arc::new(InMemoryVectorStore::new())
            }
        };

        let summarizer = match &settings.chat {
            Some(chat) => {
                let model = Arc::new(OpenAiChatModel::new(chat)?);
                Some(Arc::new(Summarizer::new(
                    model,
                    chat.text_model.clone(),
                    chat.priority_model.clone(),
                    settings.triage.clone(),
                )))
            }
            None => {
                tracing::warn!("OPENAI_API_KEY not set; rollups and triage disabled");
                None
            }
        };

        let worker = IngestWorker::new(IngestDeps {
            mail: mail.clone(),
            dense: dense.clone(),
            sparse: sparse.clone(),
            vectors: vectors.clone(),
            store: store.clone(),
            summarizer: summarizer.clone(),
        });
        let queue = SessionQueue::start(
            &settings.queue.name,
            settings.sync.worker_concurrency,
            settings.sync.max_delivery,
            Arc::new(worker),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            queue.clone(),
            settings.sync.clone(),
        ));

        let retrieval = Arc::new(RetrievalEngine::new(
            dense.clone(),
            sparse.clone(),
            vectors.clone(),
            summarizer.clone(),
        ));

        Ok(Self {
            settings,
            store,
            mail,
            dense,
            sparse,
            vectors,
            summarizer,
            retrieval,
            queue,
            dispatcher,
        })
    }

    /// State for the HTTP API.
    pub fn app_state(&self) -> Arc<api::AppState> {
        Arc::new(api::AppState {
            retrieval: self.retrieval.clone(),
            dispatcher: self.dispatcher.clone(),
            store: self.store.clone(),
            vectors: self.vectors.clone(),
            webhook_secret: self.settings.webhook_secret.clone(),
            realtime: self.settings.realtime.clone(),
            default_grant: self
                .settings
                .mail
                .as_ref()
                .and_then(|m| m.default_grant.clone()),
        })
    }

    /// Build the hybrid bridge for one tenant and voice session. Requires a
    /// chat model for the backend planner.
    pub fn build_bridge(
        &self,
        grant_id: GrantId,
        session: Arc<dyn VoiceSession>,
    ) -> Result<HybridBridge, RuntimeError> {
        let chat = self.settings.chat.as_ref().ok_or_else(|| {
            RuntimeError::Configuration(ConfigError::MissingVar("OPENAI_API_KEY".to_string()))
        })?;
        let model = Arc::new(OpenAiChatModel::new(chat)?);
        let runner = Arc::new(LlmAgentRunner::new(model, chat.text_model.clone()));
        let toolbox = Arc::new(tools::Toolbox::new(
            self.retrieval.clone(),
            self.mail.clone(),
            self.dispatcher.clone(),
            self.summarizer.clone(),
        ));
        let deps = AgentDeps {
            toolbox,
            runner,
            scratchpads: Arc::new(ScratchpadStore::new()),
        };
        let narrator = Arc::new(Narrator::new(session, NarrationMode::default()));
        Ok(HybridBridge::new(AgentBundle::new(grant_id), deps, narrator))
    }

    /// Spawn the periodic delta timer.
    pub fn spawn_delta_timer(&self) -> Result<tokio::task::JoinHandle<()>, ConfigError> {
        let timer = DeltaTimer::new(&self.settings.timer, self.dispatcher.clone())?;
        Ok(timer.spawn())
    }

    /// Drain the ingestion queue and stop accepting work.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        tracing::info!("runtime shutdown complete");
    }
}
