//! Hybrid bridge: orchestrates one user turn across the voice layer and the
//! backend agent runtime.
//!
//! The flow is unidirectional per turn: voice -> bridge -> backend -> event
//! stream -> voice. The voice layer is a pure subscriber of backend events
//! plus an acknowledgement/summary emitter.

pub mod callgraph;

pub use callgraph::{CallGraph, CallGraphNode, NodeKind, NodeStatus};

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::agents::{
    spawn_backend_agent, AgentBundle, AgentDeps, AgentEvent, BackendRunResult, RunOptions,
    ScratchpadStore,
};
use crate::tools::TimeResolver;
use crate::types::RuntimeError;
use crate::voice::Narrator;

/// Event delivered to UI dashboard subscribers: the backend event plus a
/// turn-scoped sequence number.
#[derive(Debug, Clone, Serialize)]
pub struct UIDashboardEvent {
    pub turn: u64,
    pub sequence: u64,
    pub event: AgentEvent,
}

/// Orchestrates acknowledge -> run -> narrate -> summarize for each turn and
/// maintains the live call graph.
pub struct HybridBridge {
    bundle: AgentBundle,
    deps: AgentDeps,
    narrator: Arc<Narrator>,
    graph: Mutex<CallGraph>,
    dashboard: broadcast::Sender<UIDashboardEvent>,
    time_resolver: Mutex<TimeResolver>,
    turns: AtomicU64,
}

impl HybridBridge {
    pub fn new(bundle: AgentBundle, deps: AgentDeps, narrator: Arc<Narrator>) -> Self {
        let (dashboard, _) = broadcast::channel(256);
        Self {
            bundle,
            deps,
            narrator,
            graph: Mutex::new(CallGraph::new()),
            dashboard,
            time_resolver: Mutex::new(TimeResolver::new()),
            turns: AtomicU64::new(0),
        }
    }

    /// Subscribe to dashboard events for the live call-graph UI.
    pub fn subscribe_dashboard(&self) -> broadcast::Receiver<UIDashboardEvent> {
        self.dashboard.subscribe()
    }

    /// Snapshot of the current turn's call graph.
    pub async fn get_call_graph(&self) -> Vec<CallGraphNode> {
        self.graph.lock().await.nodes().to_vec()
    }

    /// Per-tenant scratchpads retained across turns.
    pub fn get_scratchpads(&self) -> Arc<ScratchpadStore> {
        self.deps.scratchpads.clone()
    }

    fn acknowledgement_for(user_input: &str) -> String {
        let preview: String = user_input.chars().take(60).collect();
        if preview.is_empty() {
            "Got it. Give me a moment.".to_string()
        } else {
            "Got it. Let me check your mail for that.".to_string()
        }
    }

    /// Process one user turn end to end. Returns the backend result after
    /// narration has drained.
    pub async fn process_user_request(
        &self,
        user_input: &str,
    ) -> Result<BackendRunResult, RuntimeError> {
        let turn = self.turns.fetch_add(1, Ordering::SeqCst) + 1;
        let task_id = format!("turn-{turn}");

        // 1. Immediate acknowledgement, spoken before any backend call.
        self.narrator
            .enqueue_acknowledgement(&task_id, &Self::acknowledgement_for(user_input))
            .await;
        if let Err(e) = self.narrator.drain().await {
            tracing::warn!(error = %e, "acknowledgement drain failed");
        }

        // 2. Relative-time resolution from the utterance.
        let time_window = {
            let mut resolver = self.time_resolver.lock().await;
            resolver.resolve(user_input, chrono::Utc::now())
        };

        // 3. Fresh call graph for this turn.
        {
            let mut graph = self.graph.lock().await;
            *graph = CallGraph::new();
        }

        // 4. Run the backend, fanning every event out to the narration queue,
        //    the call graph, and dashboard subscribers.
        let options = RunOptions {
            time_window,
            ..Default::default()
        };
        let (mut events, handle) = spawn_backend_agent(
            self.bundle.clone(),
            user_input.to_string(),
            options,
            self.deps.clone(),
        );

        let mut sequence = 0u64;
        while let Some(event) = events.recv().await {
            {
                let mut graph = self.graph.lock().await;
                graph.apply(&event);
            }
            self.narrator.enqueue_event(&task_id, &event).await;
            if let Err(e) = self.narrator.drain().await {
                tracing::warn!(error = %e, "narration drain failed");
            }
            sequence += 1;
            let _ = self.dashboard.send(UIDashboardEvent {
                turn,
                sequence,
                event,
            });
        }

        let result = match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.graph.lock().await.abort();
                self.narrator
                    .enqueue_final(&task_id, "I hit an error processing that.")
                    .await;
                let _ = self.narrator.drain().await;
                return Err(RuntimeError::Agent(e));
            }
            Err(join_error) => {
                self.graph.lock().await.abort();
                self.narrator
                    .enqueue_final(&task_id, "I hit an error processing that.")
                    .await;
                let _ = self.narrator.drain().await;
                return Err(RuntimeError::Internal(format!(
                    "backend task panicked: {join_error}"
                )));
            }
        };

        // 5. Final summary from the backend's answer.
        self.narrator
            .enqueue_final(&task_id, &result.final_text)
            .await;
        if let Err(e) = self.narrator.drain().await {
            tracing::warn!(error = %e, "final summary drain failed");
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{
        AgentPlan, AgentRunner, ConcludeInput, PlanInput, PlannedCall, SpecialistKind,
    };
    use crate::config::SyncConfig;
    use crate::dispatch::Dispatcher;
    use crate::embedding::MockDenseEmbedder;
    use crate::ingest::{BackfillJob, JobHandler, SessionQueue};
    use crate::mail::{ListMessagesParams, MailApi, MessagePage};
    use crate::retrieval::RetrievalEngine;
    use crate::store::DataStore;
    use crate::tools::Toolbox;
    use crate::types::{AgentError, GrantId, MailError, RuntimeError, VoiceError};
    use crate::vector::InMemoryVectorStore;
    use crate::voice::{NarrationMode, VoiceSession};
    use async_trait::async_trait;

    struct EmptyMail;

    #[async_trait]
    impl MailApi for EmptyMail {
        async fn list_messages_page(
            &self,
            _p: &ListMessagesParams,
        ) -> Result<MessagePage, MailError> {
            Ok(MessagePage::default())
        }
        async fn list_unread(
            &self,
            _g: &GrantId,
            _l: usize,
            _r: Option<i64>,
        ) -> Result<Vec<crate::mail::MailMessage>, MailError> {
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

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn handle(&self, _job: &BackfillJob) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn on_dead_letter(&self, _job: &BackfillJob, _e: &RuntimeError) {}
    }

    struct OneSearchRunner;

    #[async_trait]
    impl AgentRunner for OneSearchRunner {
        async fn plan(&self, _input: &PlanInput<'_>) -> Result<AgentPlan, AgentError> {
            Ok(AgentPlan {
                specialist: SpecialistKind::Insight,
                reason: "count request".to_string(),
                calls: vec![PlannedCall {
                    tool: crate::tools::ToolName::CountEmails,
                    parameters: serde_json::json!({}),
                }],
            })
        }
        async fn conclude(&self, _input: &ConcludeInput<'_>) -> Result<String, AgentError> {
            Ok("You have no matching mail.".to_string())
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl AgentRunner for FailingRunner {
        async fn plan(&self, _input: &PlanInput<'_>) -> Result<AgentPlan, AgentError> {
            Err(AgentError::Model("provider 500: internal".to_string()))
        }
        async fn conclude(&self, _input: &ConcludeInput<'_>) -> Result<String, AgentError> {
            unreachable!("plan fails first")
        }
    }

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
            self.lines.lock().await.push(format!("ack: {text}"));
            Ok(())
        }
        async fn narrate(&self, text: &str) -> Result<(), VoiceError> {
            self.lines.lock().await.push(format!("say: {text}"));
            Ok(())
        }
        async fn final_summary(&self, text: &str) -> Result<(), VoiceError> {
            self.lines.lock().await.push(format!("end: {text}"));
            Ok(())
        }
        async fn disconnect(&self) {}
    }

    fn bridge_with(runner: Arc<dyn AgentRunner>, dir: &tempfile::TempDir) -> (HybridBridge, Arc<RecordingSession>) {
        let store = Arc::new(DataStore::open(dir.path()).unwrap());
        let queue = SessionQueue::start("test", 1, 3, Arc::new(NoopHandler));
        let dispatcher = Arc::new(Dispatcher::new(store, queue, SyncConfig::default()));
        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::new(MockDenseEmbedder::new(32)),
            None,
            Arc::new(InMemoryVectorStore::new()),
            None,
        ));
        let toolbox = Arc::new(Toolbox::new(retrieval, Arc::new(EmptyMail), dispatcher, None));
        let deps = AgentDeps {
            toolbox,
            runner,
            scratchpads: Arc::new(ScratchpadStore::new()),
        };
        let session = RecordingSession::new();
        let narrator = Arc::new(Narrator::new(session.clone(), NarrationMode::Serialize));
        let bridge = HybridBridge::new(AgentBundle::new(GrantId::new("g1")), deps, narrator);
        (bridge, session)
    }

    #[tokio::test]
    async fn turn_narrates_ack_events_then_summary_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let (bridge, session) = bridge_with(Arc::new(OneSearchRunner), &dir);

        let result = bridge.process_user_request("how many emails").await.unwrap();
        assert_eq!(result.final_text, "You have no matching mail.");

        let lines = session.lines.lock().await.clone();
        // Acknowledgement first, final summary last, narrations between.
        assert!(lines[0].starts_with("ack: "));
        assert_eq!(lines.last().unwrap(), "end: You have no matching mail.");
        let narrations: Vec<&String> =
            lines.iter().filter(|l| l.starts_with("say: ")).collect();
        assert_eq!(
            narrations,
            vec![
                "say: Working on it.",
                "say: Bringing in the insight specialist.",
                "say: Starting a count.",
                "say: Finished a count: total=0.",
            ]
        );
    }

    #[tokio::test]
    async fn call_graph_reflects_the_turn() {
        let dir = tempfile::TempDir::new().unwrap();
        let (bridge, _session) = bridge_with(Arc::new(OneSearchRunner), &dir);
        bridge.process_user_request("count my mail").await.unwrap();

        let nodes = bridge.get_call_graph().await;
        let root = nodes.iter().find(|n| n.parent_id.is_none()).unwrap();
        assert_eq!(root.id, "router");
        assert_eq!(root.status, NodeStatus::Completed);

        let tool = nodes.iter().find(|n| n.kind == NodeKind::Tool).unwrap();
        assert_eq!(tool.parent_id.as_deref(), Some("insight"));
        assert!(tool.ended_at.is_some());
    }

    #[tokio::test]
    async fn dashboard_subscribers_see_every_event() {
        let dir = tempfile::TempDir::new().unwrap();
        let (bridge, _session) = bridge_with(Arc::new(OneSearchRunner), &dir);
        let mut rx = bridge.subscribe_dashboard();

        bridge.process_user_request("count my mail").await.unwrap();

        let mut got = Vec::new();
        while let Ok(e) = rx.try_recv() {
            got.push(e);
        }
        // started(router), handoff, started(specialist), tool x2, completed x2.
        assert_eq!(got.len(), 7);
        assert!(got.iter().enumerate().all(|(i, e)| e.sequence == i as u64 + 1));
    }

    #[tokio::test]
    async fn backend_failure_narrates_generic_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let (bridge, session) = bridge_with(Arc::new(FailingRunner), &dir);

        let err = bridge.process_user_request("anything").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Agent(_)));

        let lines = session.lines.lock().await.clone();
        assert_eq!(lines.last().unwrap(), "end: I hit an error processing that.");
        // The provider error text never reaches the voice layer.
        assert!(lines.iter().all(|l| !l.contains("500")));
    }

    #[tokio::test]
    async fn scratchpads_survive_across_turns() {
        let dir = tempfile::TempDir::new().unwrap();
        let (bridge, _session) = bridge_with(Arc::new(OneSearchRunner), &dir);
        bridge.process_user_request("count my mail").await.unwrap();
        bridge.process_user_request("count again").await.unwrap();

        let pads = bridge.get_scratchpads();
        let entries = pads.entries(&GrantId::new("g1"));
        assert_eq!(entries.len(), 2);
    }
}
