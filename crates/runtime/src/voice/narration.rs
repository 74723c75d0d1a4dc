//! Narration queue: turns backend events into speech, strictly in order.
//!
//! `serialize` mode (default) drains FIFO so narrations never interleave
//! mid-sentence. `prioritize` mode drops pending items older than a newly
//! prioritized task.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::agents::AgentEvent;
use crate::types::VoiceError;

use super::VoiceSession;

/// Queue discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NarrationMode {
    #[default]
    Serialize,
    Prioritize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Acknowledgement,
    Narration,
    FinalSummary,
}

#[derive(Debug, Clone)]
struct NarrationItem {
    seq: u64,
    task_id: String,
    kind: ItemKind,
    text: String,
}

struct NarratorState {
    queue: VecDeque<NarrationItem>,
    next_seq: u64,
    paused: bool,
    mode: NarrationMode,
}

/// The narration layer: a queue in front of a [`VoiceSession`].
pub struct Narrator {
    session: Mutex<Arc<dyn VoiceSession>>,
    state: Mutex<NarratorState>,
    /// Held while speaking so drains never interleave.
    speaking: Mutex<()>,
}

impl Narrator {
    pub fn new(session: Arc<dyn VoiceSession>, mode: NarrationMode) -> Self {
        Self {
            session: Mutex::new(session),
            state: Mutex::new(NarratorState {
                queue: VecDeque::new(),
                next_seq: 0,
                paused: false,
                mode,
            }),
            speaking: Mutex::new(()),
        }
    }

    /// Swap the underlying session (test injection).
    pub async fn set_session(&self, session: Arc<dyn VoiceSession>) {
        *self.session.lock().await = session;
    }

    async fn push(&self, task_id: &str, kind: ItemKind, text: String) {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push_back(NarrationItem {
            seq,
            task_id: task_id.to_string(),
            kind,
            text,
        });
    }

    /// Queue the immediate acknowledgement for a task.
    pub async fn enqueue_acknowledgement(&self, task_id: &str, text: &str) {
        self.push(task_id, ItemKind::Acknowledgement, text.to_string())
            .await;
    }

    /// Queue the narration for one backend event, if it narrates.
    pub async fn enqueue_event(&self, task_id: &str, event: &AgentEvent) {
        if let Some(text) = narration_for_event(event) {
            self.push(task_id, ItemKind::Narration, text).await;
        }
    }

    /// Queue the final summary for a task.
    pub async fn enqueue_final(&self, task_id: &str, text: &str) {
        self.push(task_id, ItemKind::FinalSummary, text.to_string())
            .await;
    }

    pub async fn pause(&self) {
        self.state.lock().await.paused = true;
    }

    pub async fn resume(&self) {
        self.state.lock().await.paused = false;
    }

    /// In `prioritize` mode, drop pending items older than `task_id`'s first
    /// queued item (other tasks' leftovers).
    pub async fn prioritize_task(&self, task_id: &str) {
        let mut state = self.state.lock().await;
        if state.mode != NarrationMode::Prioritize {
            return;
        }
        let Some(first_seq) = state
            .queue
            .iter()
            .filter(|i| i.task_id == task_id)
            .map(|i| i.seq)
            .min()
        else {
            return;
        };
        state
            .queue
            .retain(|i| i.task_id == task_id || i.seq > first_seq);
    }

    /// Prioritize the newest task in the queue.
    pub async fn prioritize_latest(&self) {
        let latest = {
            let state = self.state.lock().await;
            state.queue.back().map(|i| i.task_id.clone())
        };
        if let Some(task_id) = latest {
            self.prioritize_task(&task_id).await;
        }
    }

    /// Speak everything queued, FIFO. Stops early when paused.
    pub async fn drain(&self) -> Result<(), VoiceError> {
        let _speaking = self.speaking.lock().await;
        loop {
            let item = {
                let mut state = self.state.lock().await;
                if state.paused {
                    return Ok(());
                }
                state.queue.pop_front()
            };
            let Some(item) = item else {
                return Ok(());
            };
            let session = self.session.lock().await.clone();
            let spoken = match item.kind {
                ItemKind::Acknowledgement => session.acknowledge(&item.text).await,
                ItemKind::Narration => session.narrate(&item.text).await,
                ItemKind::FinalSummary => session.final_summary(&item.text).await,
            };
            if let Err(e) = spoken {
                // Speech failures never take the turn down; drop the line.
                tracing::warn!(error = %e, "narration line dropped");
            }
        }
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }
}

fn humanize_tool(tool: &str) -> &str {
    match tool {
        "search_emails" => "a mail search",
        "list_unread_messages" => "an unread sweep",
        "list_recent_emails" => "a recent-mail listing",
        "triage_recent_emails" => "a priority triage",
        "list_contacts" => "a contacts lookup",
        "list_events" => "a calendar lookup",
        "sync_start" => "a mailbox sync",
        "backfill_start" => "a mailbox backfill",
        "aggregate_emails" => "a breakdown",
        "analyze_emails" => "an analysis",
        "count_emails" => "a count",
        other => other,
    }
}

/// Canonical narration line per event type. `None` for events that stay
/// silent (the final summary covers agent completion).
pub fn narration_for_event(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::AgentStarted { agent_id, .. } if agent_id == "router" => {
            Some("Working on it.".to_string())
        }
        AgentEvent::AgentStarted { .. } => None,
        AgentEvent::AgentHandoff { to_agent, .. } => Some(format!(
            "Bringing in the {} specialist.",
            to_agent.replace('_', " ")
        )),
        AgentEvent::ToolStarted { tool, .. } => {
            Some(format!("Starting {}.", humanize_tool(tool)))
        }
        AgentEvent::ToolCompleted {
            tool,
            summary,
            error,
            ..
        } => match error {
            Some(_) => Some("I hit an error processing that.".to_string()),
            None => Some(format!("Finished {}: {}.", humanize_tool(tool), summary)),
        },
        AgentEvent::ProgressUpdate { message, .. } => Some(message.clone()),
        AgentEvent::AgentCompleted { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Records everything spoken, in order.
    pub(crate) struct RecordingSession {
        pub lines: Mutex<Vec<String>>,
    }

    impl RecordingSession {
        pub fn new() -> Arc<Self> {
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

    fn tool_started(tool: &str) -> AgentEvent {
        AgentEvent::ToolStarted {
            timestamp: Utc::now(),
            agent_id: "email_ops".to_string(),
            call_id: "c1".to_string(),
            tool: tool.to_string(),
            filter_summary: "no filters".to_string(),
        }
    }

    fn tool_completed(tool: &str, error: Option<String>) -> AgentEvent {
        AgentEvent::ToolCompleted {
            timestamp: Utc::now(),
            agent_id: "email_ops".to_string(),
            call_id: "c1".to_string(),
            tool: tool.to_string(),
            summary: "total=2".to_string(),
            error,
        }
    }

    #[tokio::test]
    async fn fifo_drain_never_reorders() {
        let session = RecordingSession::new();
        let narrator = Narrator::new(session.clone(), NarrationMode::Serialize);

        narrator.enqueue_acknowledgement("t1", "Sure, checking.").await;
        narrator
            .enqueue_event("t1", &tool_started("search_emails"))
            .await;
        narrator
            .enqueue_event("t1", &tool_completed("search_emails", None))
            .await;
        narrator.enqueue_final("t1", "Found two.").await;
        narrator.drain().await.unwrap();

        let lines = session.lines.lock().await;
        assert_eq!(
            *lines,
            vec![
                "ack: Sure, checking.".to_string(),
                "say: Starting a mail search.".to_string(),
                "say: Finished a mail search: total=2.".to_string(),
                "end: Found two.".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn tool_errors_narrate_generically() {
        let event = tool_completed("search_emails", Some("provider 500".to_string()));
        let line = narration_for_event(&event).unwrap();
        assert_eq!(line, "I hit an error processing that.");
        // Provider details never reach the user.
        assert!(!line.contains("500"));
    }

    #[tokio::test]
    async fn pause_stops_drain_and_resume_continues() {
        let session = RecordingSession::new();
        let narrator = Narrator::new(session.clone(), NarrationMode::Serialize);
        narrator.enqueue_acknowledgement("t1", "One sec.").await;
        narrator.pause().await;
        narrator.drain().await.unwrap();
        assert_eq!(session.lines.lock().await.len(), 0);
        assert_eq!(narrator.pending().await, 1);

        narrator.resume().await;
        narrator.drain().await.unwrap();
        assert_eq!(session.lines.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn prioritize_drops_older_tasks_items() {
        let session = RecordingSession::new();
        let narrator = Narrator::new(session.clone(), NarrationMode::Prioritize);

        narrator.enqueue_acknowledgement("t1", "On the first thing.").await;
        narrator
            .enqueue_event("t1", &tool_started("search_emails"))
            .await;
        narrator.enqueue_acknowledgement("t2", "Switching to that.").await;
        narrator.enqueue_final("t2", "Here is the newer answer.").await;

        narrator.prioritize_latest().await;
        narrator.drain().await.unwrap();

        let lines = session.lines.lock().await;
        assert_eq!(
            *lines,
            vec![
                "ack: Switching to that.".to_string(),
                "end: Here is the newer answer.".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn serialize_mode_ignores_prioritization() {
        let session = RecordingSession::new();
        let narrator = Narrator::new(session.clone(), NarrationMode::Serialize);
        narrator.enqueue_acknowledgement("t1", "First.").await;
        narrator.enqueue_acknowledgement("t2", "Second.").await;
        narrator.prioritize_latest().await;
        narrator.drain().await.unwrap();
        assert_eq!(session.lines.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn set_session_swaps_the_sink() {
        let first = RecordingSession::new();
        let second = RecordingSession::new();
        let narrator = Narrator::new(first.clone(), NarrationMode::Serialize);

        narrator.set_session(second.clone()).await;
        narrator.enqueue_acknowledgement("t1", "Hello.").await;
        narrator.drain().await.unwrap();

        assert!(first.lines.lock().await.is_empty());
        assert_eq!(second.lines.lock().await.len(), 1);
    }
}
