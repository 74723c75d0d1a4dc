//! Tool layer: named capabilities the backend agents call.
//!
//! Tools are represented as a tagged list of specs plus a single dispatch
//! point ([`Toolbox::invoke`]); the backend agent holds a reference to the
//! list rather than looking names up across modules. A tool's result is fully
//! described by `(name, parameters, tenant state at call time)`.

pub mod timewindow;

pub use timewindow::{apply_window, TimeResolver, TimeWindow};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::mail::MailApi;
use crate::retrieval::RetrievalEngine;
use crate::summarizer::Summarizer;
use crate::types::{AgentError, GrantId, RuntimeError};

/// Every tool the agents can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    SearchEmails,
    ListUnreadMessages,
    ListRecentEmails,
    TriageRecentEmails,
    ListContacts,
    ListEvents,
    SyncStart,
    BackfillStart,
    AggregateEmails,
    AnalyzeEmails,
    CountEmails,
}

impl ToolName {
    pub const ALL: [ToolName; 11] = [
        ToolName::SearchEmails,
        ToolName::ListUnreadMessages,
        ToolName::ListRecentEmails,
        ToolName::TriageRecentEmails,
        ToolName::ListContacts,
        ToolName::ListEvents,
        ToolName::SyncStart,
        ToolName::BackfillStart,
        ToolName::AggregateEmails,
        ToolName::AnalyzeEmails,
        ToolName::CountEmails,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::SearchEmails => "search_emails",
            ToolName::ListUnreadMessages => "list_unread_messages",
            ToolName::ListRecentEmails => "list_recent_emails",
            ToolName::TriageRecentEmails => "triage_recent_emails",
            ToolName::ListContacts => "list_contacts",
            ToolName::ListEvents => "list_events",
            ToolName::SyncStart => "sync_start",
            ToolName::BackfillStart => "backfill_start",
            ToolName::AggregateEmails => "aggregate_emails",
            ToolName::AnalyzeEmails => "analyze_emails",
            ToolName::CountEmails => "count_emails",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declarative description of one tool: name, docs, JSON parameter schema.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: &'static str,
    pub parameters: Value,
}

/// The full tool list handed to the backend agent.
pub fn registry() -> Vec<ToolSpec> {
    fn obj(props: Value) -> Value {
        json!({ "type": "object", "properties": props })
    }
    vec![
        ToolSpec {
            name: ToolName::SearchEmails,
            description: "Semantic search over indexed mail",
            parameters: obj(json!({
                "query": { "type": "string" },
                "top_k": { "type": "integer" },
                "filters": { "type": "object" }
            })),
        },
        ToolSpec {
            name: ToolName::ListUnreadMessages,
            description: "List unread messages from the mailbox",
            parameters: obj(json!({
                "limit": { "type": "integer" },
                "received_after": { "type": "integer" }
            })),
        },
        ToolSpec {
            name: ToolName::ListRecentEmails,
            description: "List the most recent messages",
            parameters: obj(json!({ "limit": { "type": "integer" } })),
        },
        ToolSpec {
            name: ToolName::TriageRecentEmails,
            description: "Map-reduce priority triage over recent messages",
            parameters: obj(json!({ "limit": { "type": "integer" } })),
        },
        ToolSpec {
            name: ToolName::ListContacts,
            description: "List address-book contacts",
            parameters: obj(json!({ "limit": { "type": "integer" } })),
        },
        ToolSpec {
            name: ToolName::ListEvents,
            description: "List upcoming calendar events",
            parameters: obj(json!({ "limit": { "type": "integer" } })),
        },
        ToolSpec {
            name: ToolName::SyncStart,
            description: "Enqueue a delta sync from the checkpoint",
            parameters: obj(json!({ "max": { "type": "integer" } })),
        },
        ToolSpec {
            name: ToolName::BackfillStart,
            description: "Enqueue a mailbox backfill",
            parameters: obj(json!({
                "months": { "type": "integer" },
                "max": { "type": "integer" }
            })),
        },
        ToolSpec {
            name: ToolName::AggregateEmails,
            description: "Count messages grouped by metadata keys",
            parameters: obj(json!({
                "group_by": { "type": "array", "items": { "type": "string" } },
                "filters": { "type": "object" },
                "top_k": { "type": "integer" }
            })),
        },
        ToolSpec {
            name: ToolName::AnalyzeEmails,
            description: "Retrieve and summarize matching messages",
            parameters: obj(json!({
                "text": { "type": "string" },
                "filters": { "type": "object" },
                "top_k": { "type": "integer" }
            })),
        },
        ToolSpec {
            name: ToolName::CountEmails,
            description: "Exact or sampled count under a filter",
            parameters: obj(json!({ "filters": { "type": "object" } })),
        },
    ]
}

/// Record of one tool invocation in the call graph.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRecord {
    pub id: Uuid,
    pub call_id: String,
    pub name: String,
    pub agent_id: String,
    pub parent_node_id: Option<String>,
    pub graph_node_id: String,
    pub depth: u32,
    pub parameters: Value,
    pub filter_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Human-readable description of a filter object, for records and narration.
pub fn filter_summary(params: &Value) -> String {
    let Some(filters) = params.get("filters").and_then(Value::as_object) else {
        return "no filters".to_string();
    };
    if filters.is_empty() {
        return "no filters".to_string();
    }
    let mut parts: Vec<String> = Vec::new();
    for (field, clause) in filters {
        match clause {
            Value::Object(ops) => {
                for (op, v) in ops {
                    let symbol = match op.as_str() {
                        "$eq" => "=",
                        "$gte" => ">=",
                        "$lte" => "<=",
                        "$in" => " in ",
                        other => other,
                    };
                    parts.push(format!("{field}{symbol}{v}"));
                }
            }
            other => parts.push(format!("{field}={other}")),
        }
    }
    parts.join(", ")
}

/// Compact per-call summary retained in the tenant scratchpad.
pub fn summarize_result(name: ToolName, result: &Value) -> String {
    match name {
        ToolName::SearchEmails | ToolName::AnalyzeEmails => {
            let total = result
                .get("total")
                .or_else(|| result.get("count"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            format!("total={total}")
        }
        ToolName::AggregateEmails => {
            let total = result.get("total").and_then(Value::as_u64).unwrap_or(0);
            let groups = result
                .get("groups")
                .and_then(Value::as_array)
                .map(|a| a.len())
                .unwrap_or(0);
            format!("total={total}, groups={groups}")
        }
        ToolName::CountEmails => {
            let total = result.get("total").and_then(Value::as_u64).unwrap_or(0);
            format!("total={total}")
        }
        ToolName::ListUnreadMessages
        | ToolName::ListRecentEmails
        | ToolName::ListContacts
        | ToolName::ListEvents => {
            let matches = result
                .get("items")
                .and_then(Value::as_array)
                .map(|a| a.len())
                .unwrap_or(0);
            format!("matches={matches}")
        }
        ToolName::TriageRecentEmails => {
            let top = result
                .pointer("/map_reduce/top_emails")
                .and_then(Value::as_array)
                .map(|a| a.len())
                .unwrap_or(0);
            format!("top={top}")
        }
        ToolName::SyncStart | ToolName::BackfillStart => {
            let job = result
                .get("jobId")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            format!("job={job}")
        }
    }
}

/// Executes tools against the live adapters.
pub struct Toolbox {
    retrieval: Arc<RetrievalEngine>,
    mail: Arc<dyn MailApi>,
    dispatcher: Arc<Dispatcher>,
    summarizer: Option<Arc<Summarizer>>,
}

impl Toolbox {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        mail: Arc<dyn MailApi>,
        dispatcher: Arc<Dispatcher>,
        summarizer: Option<Arc<Summarizer>>,
    ) -> Self {
        Self {
            retrieval,
            mail,
            dispatcher,
            summarizer,
        }
    }

    fn usize_param(params: &Value, key: &str, default: usize) -> usize {
        params
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    /// Invoke one tool for a tenant.
    pub async fn invoke(
        &self,
        grant_id: &GrantId,
        name: ToolName,
        params: &Value,
    ) -> Result<Value, RuntimeError> {
        let filters = params.get("filters").cloned();
        match name {
            ToolName::SearchEmails => {
                let query = params
                    .get("query")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let top_k = Self::usize_param(params, "top_k", 10);
                let outcome = self.retrieval.search(grant_id, query, top_k, filters).await?;
                Ok(serde_json::to_value(outcome).unwrap_or_default())
            }
            ToolName::ListUnreadMessages => {
                let limit = Self::usize_param(params, "limit", 20);
                let after = params.get("received_after").and_then(Value::as_i64);
                let messages = self.mail.list_unread(grant_id, limit, after).await?;
                Ok(json!({ "items": compact_messages(&messages) }))
            }
            ToolName::ListRecentEmails => {
                let limit = Self::usize_param(params, "limit", 20);
                let page = self
                    .mail
                    .list_messages_page(&crate::mail::ListMessagesParams::new(
                        grant_id.clone(),
                        limit,
                    ))
                    .await?;
                Ok(json!({ "items": compact_messages(&page.messages) }))
            }
            ToolName::TriageRecentEmails => {
                let limit = Self::usize_param(params, "limit", 50);
                let page = self
                    .mail
                    .list_messages_page(&crate::mail::ListMessagesParams::new(
                        grant_id.clone(),
                        limit,
                    ))
                    .await?;
                let Some(summarizer) = &self.summarizer else {
                    return Err(RuntimeError::Agent(AgentError::Tool {
                        name: name.as_str().to_string(),
                        reason: "no chat model configured for triage".to_string(),
                    }));
                };
                let outcome = summarizer.triage_messages(&page.messages).await?;
                Ok(json!({
                    "map_reduce": {
                        "top_emails": outcome.top_three,
                        "backup_candidates": outcome.backup_candidates,
                        "validation": outcome.validation,
                    },
                    "total_considered": page.messages.len(),
                }))
            }
            ToolName::ListContacts => {
                let limit = Self::usize_param(params, "limit", 50);
                let contacts = self.mail.list_contacts(grant_id, limit).await?;
                Ok(json!({ "items": contacts }))
            }
            ToolName::ListEvents => {
                let limit = Self::usize_param(params, "limit", 50);
                let events = self.mail.list_events(grant_id, limit).await?;
                Ok(json!({ "items": events }))
            }
            ToolName::SyncStart => {
                let max = params.get("max").and_then(Value::as_u64);
                let record = self.dispatcher.start_delta(grant_id.clone(), max).await?;
                Ok(json!({ "ok": true, "jobId": record.job_id.to_string() }))
            }
            ToolName::BackfillStart => {
                let months = params.get("months").and_then(Value::as_u64).map(|v| v as u32);
                let max = params.get("max").and_then(Value::as_u64);
                let record = self
                    .dispatcher
                    .start_backfill(grant_id.clone(), months, max)
                    .await?;
                Ok(json!({ "ok": true, "jobId": record.job_id.to_string() }))
            }
            ToolName::AggregateEmails => {
                let group_by: Vec<String> = params
                    .get("group_by")
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let top_k = Self::usize_param(params, "top_k", 1000);
                let outcome = self
                    .retrieval
                    .aggregate(grant_id, &group_by, filters, top_k)
                    .await?;
                Ok(serde_json::to_value(outcome).unwrap_or_default())
            }
            ToolName::AnalyzeEmails => {
                let text = params
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let top_k = Self::usize_param(params, "top_k", 10);
                let outcome = self
                    .retrieval
                    .analyze(grant_id, text, filters, top_k)
                    .await?;
                Ok(serde_json::to_value(outcome).unwrap_or_default())
            }
            ToolName::CountEmails => {
                let total = self.retrieval.count(grant_id, filters).await?;
                Ok(json!({ "total": total }))
            }
        }
    }
}

fn compact_messages(messages: &[crate::mail::MailMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "thread_id": m.thread_id,
                "subject": m.subject,
                "from": m.sender_email(),
                "date": m.date,
                "unread": m.unread,
                "snippet": m.snippet.clone().unwrap_or_default(),
            })
        })
        .collect()
}
