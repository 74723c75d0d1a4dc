//! Call-graph tree for one user turn.
//!
//! The root is the router agent; handoffs add child agent nodes and tool
//! starts add child tool nodes under the agent that issued them. Nodes move
//! `pending -> in_progress -> (completed | error)` and `ended_at` is stamped
//! on terminal transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentEvent, ROUTER_AGENT_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Agent,
    Task,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallGraphNode {
    pub id: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub label: String,
    pub status: NodeStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Tree of agent/tool nodes for one turn, in creation order.
#[derive(Debug, Default, Clone)]
pub struct CallGraph {
    nodes: Vec<CallGraphNode>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[CallGraphNode] {
        &self.nodes
    }

    pub fn root(&self) -> Option<&CallGraphNode> {
        self.nodes.iter().find(|n| n.parent_id.is_none())
    }

    pub fn get(&self, id: &str) -> Option<&CallGraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut CallGraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    fn add_node(&mut self, id: &str, kind: NodeKind, parent_id: Option<String>, label: &str) {
        if self.get(id).is_some() {
            return;
        }
        self.nodes.push(CallGraphNode {
            id: id.to_string(),
            kind,
            parent_id,
            label: label.to_string(),
            status: NodeStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
        });
    }

    fn transition(&mut self, id: &str, status: NodeStatus) {
        if let Some(node) = self.get_mut(id) {
            if node.status.is_terminal() {
                return;
            }
            node.status = status;
            if status.is_terminal() {
                node.ended_at = Some(Utc::now());
            }
        }
    }

    /// Fold one backend event into the tree.
    pub fn apply(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::AgentStarted { agent_id, .. } => {
                if agent_id == ROUTER_AGENT_ID {
                    self.add_node(agent_id, NodeKind::Agent, None, "Router");
                } else {
                    self.add_node(
                        agent_id,
                        NodeKind::Agent,
                        Some(ROUTER_AGENT_ID.to_string()),
                        agent_id,
                    );
                }
                self.transition(agent_id, NodeStatus::InProgress);
            }
            AgentEvent::AgentHandoff {
                agent_id, to_agent, ..
            } => {
                self.add_node(
                    to_agent,
                    NodeKind::Agent,
                    Some(agent_id.clone()),
                    to_agent,
                );
            }
            AgentEvent::ToolStarted {
                agent_id,
                call_id,
                tool,
                ..
            } => {
                self.add_node(call_id, NodeKind::Tool, Some(agent_id.clone()), tool);
                self.transition(call_id, NodeStatus::InProgress);
            }
            AgentEvent::ToolCompleted { call_id, error, .. } => {
                let status = if error.is_some() {
                    NodeStatus::Error
                } else {
                    NodeStatus::Completed
                };
                self.transition(call_id, status);
            }
            AgentEvent::AgentCompleted { agent_id, .. } => {
                self.transition(agent_id, NodeStatus::Completed);
            }
            AgentEvent::ProgressUpdate { .. } => {}
        }
    }

    /// Mark every non-terminal node failed (backend run aborted).
    pub fn abort(&mut self) {
        let open: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| !n.status.is_terminal())
            .map(|n| n.id.clone())
            .collect();
        for id in open {
            self.transition(&id, NodeStatus::Error);
        }
    }
}
