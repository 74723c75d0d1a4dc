//! Lifecycle events emitted by one backend agent run.
//!
//! The event stream is a lazy, finite, non-restartable sequence: it completes
//! when the agent finishes, and is consumed by the hybrid bridge for
//! narration, the UI dashboard, and the tenant scratchpad.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One lifecycle event. Every variant carries the timestamp and the id of the
/// agent that emitted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentStarted {
        timestamp: DateTime<Utc>,
        agent_id: String,
        input_preview: String,
    },
    AgentCompleted {
        timestamp: DateTime<Utc>,
        agent_id: String,
        result_summary: String,
    },
    AgentHandoff {
        timestamp: DateTime<Utc>,
        agent_id: String,
        to_agent: String,
        reason: String,
    },
    ToolStarted {
        timestamp: DateTime<Utc>,
        agent_id: String,
        call_id: String,
        tool: String,
        filter_summary: String,
    },
    ToolCompleted {
        timestamp: DateTime<Utc>,
        agent_id: String,
        call_id: String,
        tool: String,
        summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ProgressUpdate {
        timestamp: DateTime<Utc>,
        agent_id: String,
        message: String,
    },
}

impl AgentEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            AgentEvent::AgentStarted { agent_id, .. }
            | AgentEvent::AgentCompleted { agent_id, .. }
            | AgentEvent::AgentHandoff { agent_id, .. }
            | AgentEvent::ToolStarted { agent_id, .. }
            | AgentEvent::ToolCompleted { agent_id, .. }
            | AgentEvent::ProgressUpdate { agent_id, .. } => agent_id,
        }
    }
}

/// Sending half of an event stream. Cloneable; dropping every sink completes
/// the stream.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl EventSink {
    /// Create a sink plus the receiving stream.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. Receivers gone is not an error; the run continues.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }

    pub fn agent_started(&self, agent_id: &str, input: &str) {
        self.emit(AgentEvent::AgentStarted {
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            input_preview: input.chars().take(120).collect(),
        });
    }

    pub fn agent_completed(&self, agent_id: &str, result_summary: &str) {
        self.emit(AgentEvent::AgentCompleted {
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            result_summary: result_summary.chars().take(200).collect(),
        });
    }

    pub fn handoff(&self, from: &str, to: &str, reason: &str) {
        self.emit(AgentEvent::AgentHandoff {
            timestamp: Utc::now(),
            agent_id: from.to_string(),
            to_agent: to.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn tool_started(&self, agent_id: &str, call_id: &str, tool: &str, filter_summary: &str) {
        self.emit(AgentEvent::ToolStarted {
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            call_id: call_id.to_string(),
            tool: tool.to_string(),
            filter_summary: filter_summary.to_string(),
        });
    }

    pub fn tool_completed(
        &self,
        agent_id: &str,
        call_id: &str,
        tool: &str,
        summary: &str,
        error: Option<String>,
    ) {
        self.emit(AgentEvent::ToolCompleted {
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            call_id: call_id.to_string(),
            tool: tool.to_string(),
            summary: summary.to_string(),
            error,
        });
    }

    pub fn progress(&self, agent_id: &str, message: &str) {
        self.emit(AgentEvent::ProgressUpdate {
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            message: message.to_string(),
        });
    }
}
