//! Hybrid bridge ordering: acknowledgement first, one narration per backend
//! event in order, final summary last, with no interleaving.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use voxmail_runtime::agents::{
    AgentPlan, AgentRunner, ConcludeInput, PlanInput, PlannedCall,
};
use voxmail_runtime::config::SyncConfig;
use voxmail_runtime::embedding::MockDenseEmbedder;
use voxmail_runtime::ingest::{BackfillJob, JobHandler, SessionQueue};
use voxmail_runtime::mail::NullMailClient;
use voxmail_runtime::retrieval::RetrievalEngine;
use voxmail_runtime::store::DataStore;
use voxmail_runtime::tools::{ToolName, Toolbox};
use voxmail_runtime::types::{AgentError, GrantId, RuntimeError, VoiceError};
use voxmail_runtime::vector::InMemoryVectorStore;
use voxmail_runtime::voice::{NarrationMode, Narrator, VoiceSession};
use voxmail_runtime::{
    AgentBundle, AgentDeps, AgentEvent, Dispatcher, HybridBridge, ScratchpadStore, SpecialistKind,
};

struct RecordingSession {
    lines: Mutex<Vec<String>>,
}

impl RecordingSession {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl VoiceSession for RecordingSession {
    async fn acknowledge(&self, text: &str) -> Result<(), VoiceError> {
        self.lines.lock().await.push(format!("ack|{text}"));
        Ok(())
    }
    async fn narrate(&self, text: &str) -> Result<(), VoiceError> {
        self.lines.lock().await.push(format!("say|{text}"));
        Ok(())
    }
    async fn final_summary(&self, text: &str) -> Result<(), VoiceError> {
        self.lines.lock().await.push(format!("end|{text}"));
        Ok(())
    }
    async fn disconnect(&self) {}
}

struct NoopHandler;

#[async_trait]
impl JobHandler for NoopHandler {
    async fn handle(&self, _job: &BackfillJob) -> Result<(), RuntimeError> {
        Ok(())
    }
    async fn on_dead_letter(&self, _job: &BackfillJob, _e: &RuntimeError) {}
}

struct OneCountRunner;

#[async_trait]
impl AgentRunner for OneCountRunner {
    async fn plan(&self, _input: &PlanInput<'_>) -> Result<AgentPlan, AgentError> {
        Ok(AgentPlan {
            specialist: SpecialistKind::Insight,
            reason: "counting request".to_string(),
            calls: vec![PlannedCall {
                tool: ToolName::CountEmails,
                parameters: json!({}),
            }],
        })
    }
    async fn conclude(&self, _input: &ConcludeInput<'_>) -> Result<String, AgentError> {
        Ok("Nothing matched.".to_string())
    }
}

fn bridge(dir: &tempfile::TempDir, session: Arc<RecordingSession>) -> HybridBridge {
    let store = Arc::new(DataStore::open(dir.path()).unwrap());
    let queue = SessionQueue::start("bridge-test", 1, 3, Arc::new(NoopHandler));
    let dispatcher = Arc::new(Dispatcher::new(store, queue, SyncConfig::default()));
    let retrieval = Arc::new(RetrievalEngine::new(
        Arc::new(MockDenseEmbedder::new(32)),
        None,
        Arc::new(InMemoryVectorStore::new()),
        None,
    ));
    let toolbox = Arc::new(Toolbox::new(
        retrieval,
        Arc::new(NullMailClient),
        dispatcher,
        None,
    ));
    let deps = AgentDeps {
        toolbox,
        runner: Arc::new(OneCountRunner),
        scratchpads: Arc::new(ScratchpadStore::new()),
    };
    let narrator = Arc::new(Narrator::new(session, NarrationMode::Serialize));
    HybridBridge::new(AgentBundle::new(GrantId::new("g1")), deps, narrator)
}

/// The literal §-style sequence: ack, one narration per narratable event in
/// emission order, final summary. No interleaving.
#[tokio::test]
async fn narration_order_matches_event_order() {
    let session = RecordingSession::new();
    let narrator = Narrator::new(session.clone(), NarrationMode::Serialize);

    let events = [
        AgentEvent::AgentStarted {
            timestamp: Utc::now(),
            agent_id: "router".to_string(),
            input_preview: "find the contract".to_string(),
        },
        AgentEvent::ToolStarted {
            timestamp: Utc::now(),
            agent_id: "router".to_string(),
            call_id: "T".to_string(),
            tool: "search_emails".to_string(),
            filter_summary: "no filters".to_string(),
        },
        AgentEvent::ToolCompleted {
            timestamp: Utc::now(),
            agent_id: "router".to_string(),
            call_id: "T".to_string(),
            tool: "search_emails".to_string(),
            summary: "total=1".to_string(),
            error: None,
        },
        AgentEvent::AgentCompleted {
            timestamp: Utc::now(),
            agent_id: "router".to_string(),
            result_summary: "found it".to_string(),
        },
    ];

    narrator.enqueue_acknowledgement("t1", "On it.").await;
    for event in &events {
        narrator.enqueue_event("t1", event).await;
    }
    narrator.enqueue_final("t1", "Found the contract.").await;
    narrator.drain().await.unwrap();

    let lines = session.lines.lock().await.clone();
    assert_eq!(
        lines,
        vec![
            "ack|On it.".to_string(),
            "say|Working on it.".to_string(),
            "say|Starting a mail search.".to_string(),
            "say|Finished a mail search: total=1.".to_string(),
            "end|Found the contract.".to_string(),
        ]
    );
}

#[tokio::test]
async fn full_bridge_turn_keeps_the_same_shape() {
    let dir = tempfile::TempDir::new().unwrap();
    let session = RecordingSession::new();
    let bridge = bridge(&dir, session.clone());

    let result = bridge.process_user_request("how much mail is there").await.unwrap();
    assert_eq!(result.final_text, "Nothing matched.");

    let lines = session.lines.lock().await.clone();
    assert!(lines.first().unwrap().starts_with("ack|"));
    assert!(lines.last().unwrap().starts_with("end|"));
    // Everything between is narration, in order, with no interleaved acks.
    for line in &lines[1..lines.len() - 1] {
        assert!(line.starts_with("say|"), "unexpected line {line}");
    }
}

#[tokio::test]
async fn consecutive_turns_reset_the_call_graph() {
    let dir = tempfile::TempDir::new().unwrap();
    let session = RecordingSession::new();
    let bridge = bridge(&dir, session.clone());

    bridge.process_user_request("first question").await.unwrap();
    let first = bridge.get_call_graph().await;

    bridge.process_user_request("second question").await.unwrap();
    let second = bridge.get_call_graph().await;

    // One router, one specialist, one tool node per turn.
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    let first_tool = first.iter().find(|n| n.parent_id.as_deref() == Some("insight")).unwrap();
    let second_tool = second.iter().find(|n| n.parent_id.as_deref() == Some("insight")).unwrap();
    assert_ne!(first_tool.id, second_tool.id, "tool nodes are per-turn");
}
