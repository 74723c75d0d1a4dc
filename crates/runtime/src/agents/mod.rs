//! Backend agent runtime: a router agent that delegates to specialists,
//! executes planned tool calls, and streams lifecycle events.

pub mod events;
pub mod router;
pub mod runner;
pub mod scratchpad;

pub use events::{AgentEvent, EventSink};
pub use router::{SpecialistKind, ROUTER_AGENT_ID};
pub use runner::{AgentPlan, AgentRunner, ConcludeInput, LlmAgentRunner, PlanInput, PlannedCall};
pub use scratchpad::{ScratchpadEntry, ScratchpadStore};

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::tools::{
    apply_window, filter_summary, summarize_result, TimeWindow, ToolCallRecord, ToolSpec, Toolbox,
};
use crate::types::{AgentError, GrantId};

/// The agent bundle for one tenant: router + specialists + tool list.
#[derive(Clone)]
pub struct AgentBundle {
    pub grant_id: GrantId,
    pub specs: Vec<ToolSpec>,
}

impl AgentBundle {
    pub fn new(grant_id: GrantId) -> Self {
        Self {
            grant_id,
            specs: crate::tools::registry(),
        }
    }
}

/// Per-turn options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_tool_calls: usize,
    /// Absolute time range resolved from the utterance, when one applies.
    pub time_window: Option<TimeWindow>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_tool_calls: 3,
            time_window: None,
        }
    }
}

/// Injected collaborators for a run.
#[derive(Clone)]
pub struct AgentDeps {
    pub toolbox: Arc<Toolbox>,
    pub runner: Arc<dyn AgentRunner>,
    pub scratchpads: Arc<ScratchpadStore>,
}

/// Outcome of one backend turn.
#[derive(Debug, Clone)]
pub struct BackendRunResult {
    pub final_text: String,
    pub specialist: SpecialistKind,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Tools that accept a `filters` object a resolved time window merges into.
fn accepts_filters(tool: crate::tools::ToolName) -> bool {
    use crate::tools::ToolName::*;
    matches!(tool, SearchEmails | AggregateEmails | AnalyzeEmails | CountEmails)
}

/// Run one backend turn, emitting lifecycle events to `events`.
pub async fn run_backend_agent(
    bundle: &AgentBundle,
    user_input: &str,
    options: RunOptions,
    deps: &AgentDeps,
    events: &EventSink,
) -> Result<BackendRunResult, AgentError> {
    events.agent_started(ROUTER_AGENT_ID, user_input);

    if let Some(window) = &options.time_window {
        events.progress(
            ROUTER_AGENT_ID,
            &format!("Interpreting the request as {}", window.label),
        );
    }

    let scratchpad = deps.scratchpads.render(&bundle.grant_id, 10);
    let plan = deps
        .runner
        .plan(&PlanInput {
            user_input,
            specs: &bundle.specs,
            scratchpad: &scratchpad,
            time_label: options.time_window.as_ref().map(|w| w.label.as_str()),
        })
        .await?;

    let specialist = plan.specialist;
    let specialist_id = specialist.agent_id();
    events.handoff(ROUTER_AGENT_ID, specialist_id, &plan.reason);
    events.agent_started(specialist_id, user_input);

    let mut outcomes: Vec<(String, String)> = Vec::new();
    let mut records: Vec<ToolCallRecord> = Vec::new();

    for call in plan.calls.into_iter().take(options.max_tool_calls) {
        if !specialist.allows(call.tool) {
            events.progress(
                specialist_id,
                &format!("Skipping {}: outside this specialist's tools", call.tool),
            );
            continue;
        }

        let mut parameters = call.parameters;
        if let (Some(window), true) = (&options.time_window, accepts_filters(call.tool)) {
            let merged = apply_window(parameters.get("filters").cloned(), window);
            if let Value::Object(ref mut map) = parameters {
                map.insert("filters".to_string(), merged);
            }
        }

        let call_id = Uuid::new_v4().to_string();
        let filters_text = filter_summary(&parameters);
        events.tool_started(specialist_id, &call_id, call.tool.as_str(), &filters_text);

        let started = Instant::now();
        let invoked = deps
            .toolbox
            .invoke(&bundle.grant_id, call.tool, &parameters)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut record = ToolCallRecord {
            id: Uuid::new_v4(),
            call_id: call_id.clone(),
            name: call.tool.as_str().to_string(),
            agent_id: specialist_id.to_string(),
            parent_node_id: Some(specialist_id.to_string()),
            graph_node_id: call_id.clone(),
            depth: 2,
            parameters,
            filter_summary: filters_text,
            result: None,
            error: None,
            duration_ms,
            timestamp: Utc::now(),
        };

        match invoked {
            Ok(result) => {
                let summary = summarize_result(call.tool, &result);
                deps.scratchpads
                    .append(&bundle.grant_id, call.tool.as_str(), &summary);
                events.tool_completed(specialist_id, &call_id, call.tool.as_str(), &summary, None);
                outcomes.push((call.tool.as_str().to_string(), summary));
                record.result = Some(result);
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(
                    grant_id = %bundle.grant_id,
                    tool = %call.tool,
                    error = %message,
                    "tool call failed"
                );
                events.tool_completed(
                    specialist_id,
                    &call_id,
                    call.tool.as_str(),
                    "failed",
                    Some(message.clone()),
                );
                outcomes.push((call.tool.as_str().to_string(), format!("error: {message}")));
                record.error = Some(message);
            }
        }
        records.push(record);
    }

    let final_text = deps
        .runner
        .conclude(&ConcludeInput {
            user_input,
            specialist,
            outcomes: &outcomes,
        })
        .await?;

    events.agent_completed(specialist_id, &final_text);
    events.agent_completed(ROUTER_AGENT_ID, &final_text);

    Ok(BackendRunResult {
        final_text,
        specialist,
        tool_calls: records,
    })
}

/// Run a backend turn in a task, returning the event stream immediately.
pub fn spawn_backend_agent(
    bundle: AgentBundle,
    user_input: String,
    options: RunOptions,
    deps: AgentDeps,
) -> (
    mpsc::UnboundedReceiver<AgentEvent>,
    tokio::task::JoinHandle<Result<BackendRunResult, AgentError>>,
) {
    let (sink, rx) = EventSink::channel();
    let handle = tokio::spawn(async move {
        run_backend_agent(&bundle, &user_input, options, &deps, &sink).await
    });
    (rx, handle)
}
