//! Planning and conclusion for one backend turn.
//!
//! [`AgentRunner`] is the injectable seam: the production implementation
//! calls the text chat-completion model; tests substitute scripted runners
//! without touching the provider.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::summarizer::{extract_json, ChatModel, ChatRequest};
use crate::tools::{ToolName, ToolSpec};
use crate::types::AgentError;

use super::router::SpecialistKind;

/// Everything a runner sees when planning a turn.
pub struct PlanInput<'a> {
    pub user_input: &'a str,
    pub specs: &'a [ToolSpec],
    /// Rendered scratchpad of earlier findings, possibly empty.
    pub scratchpad: &'a str,
    /// Human-readable label of a resolved time range, when one applies.
    pub time_label: Option<&'a str>,
}

/// One planned tool call.
#[derive(Debug, Clone)]
pub struct PlannedCall {
    pub tool: ToolName,
    pub parameters: Value,
}

/// The runner's decision for a turn.
#[derive(Debug, Clone)]
pub struct AgentPlan {
    pub specialist: SpecialistKind,
    pub reason: String,
    pub calls: Vec<PlannedCall>,
}

/// Tool results handed back for the final answer.
pub struct ConcludeInput<'a> {
    pub user_input: &'a str,
    pub specialist: SpecialistKind,
    /// `(tool, summary-or-error)` per executed call.
    pub outcomes: &'a [(String, String)],
}

/// Injectable planning/conclusion engine.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn plan(&self, input: &PlanInput<'_>) -> Result<AgentPlan, AgentError>;

    async fn conclude(&self, input: &ConcludeInput<'_>) -> Result<String, AgentError>;
}

const PLAN_SYSTEM: &str = "You route requests about a user's mailbox to a \
specialist agent and plan its tool calls. Respond with strict JSON: \
{\"specialist\": string, \"reason\": string, \"calls\": [{\"tool\": string, \
\"parameters\": object}]}. Use at most three calls. Only use listed \
specialists and tools.";

const CONCLUDE_SYSTEM: &str = "You answer a mailbox question from tool-call \
summaries. Be concrete and brief; mention counts and senders when known. \
Respond in plain text, at most three sentences.";

/// Production runner backed by the text chat-completion model.
pub struct LlmAgentRunner {
    model: Arc<dyn ChatModel>,
    model_name: String,
}

impl LlmAgentRunner {
    pub fn new(model: Arc<dyn ChatModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
        }
    }

    fn plan_prompt(input: &PlanInput<'_>) -> String {
        let specialists = SpecialistKind::ALL
            .iter()
            .map(|s| format!("- {}: {}", s.agent_id(), s.description()))
            .collect::<Vec<_>>()
            .join("\n");
        let tools = input
            .specs
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n");
        let mut prompt = format!(
            "Specialists:\n{specialists}\n\nTools:\n{tools}\n\nUser request: {}",
            input.user_input
        );
        if let Some(label) = input.time_label {
            prompt.push_str(&format!(
                "\nResolved time range: {label} (already merged into filters)"
            ));
        }
        if !input.scratchpad.is_empty() {
            prompt.push_str(&format!(
                "\nEarlier findings this session:\n{}",
                input.scratchpad
            ));
        }
        prompt
    }
}

#[async_trait]
impl AgentRunner for LlmAgentRunner {
    async fn plan(&self, input: &PlanInput<'_>) -> Result<AgentPlan, AgentError> {
        let request = ChatRequest::json(&self.model_name, PLAN_SYSTEM, &Self::plan_prompt(input));
        let raw = self
            .model
            .complete(&request)
            .await
            .map_err(|e| AgentError::Model(e.to_string()))?;
        let json = extract_json(&raw).map_err(|e| AgentError::Model(e.to_string()))?;

        let specialist = json
            .get("specialist")
            .and_then(Value::as_str)
            .and_then(SpecialistKind::parse)
            .ok_or_else(|| AgentError::NoRoute(input.user_input.chars().take(80).collect()))?;
        let reason = json
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("routing decision")
            .to_string();

        let calls = json
            .get("calls")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|c| {
                        let tool = c.get("tool").and_then(Value::as_str)?;
                        let tool = ToolName::parse(tool)?;
                        Some(PlannedCall {
                            tool,
                            parameters: c
                                .get("parameters")
                                .cloned()
                                .unwrap_or_else(|| Value::Object(Default::default())),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(AgentPlan {
            specialist,
            reason,
            calls,
        })
    }

    async fn conclude(&self, input: &ConcludeInput<'_>) -> Result<String, AgentError> {
        let outcomes = input
            .outcomes
            .iter()
            .map(|(tool, summary)| format!("- {tool}: {summary}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Question: {}\nSpecialist: {}\nTool results:\n{outcomes}",
            input.user_input,
            input.specialist.agent_id()
        );
        let mut request = ChatRequest::json(&self.model_name, CONCLUDE_SYSTEM, &prompt);
        request.json_mode = false;
        self.model
            .complete(&request)
            .await
            .map_err(|e| AgentError::Model(e.to_string()))
    }
}
