//! Router and specialist definitions.
//!
//! The router receives a user utterance and delegates to one of five
//! specialists, each holding a subset of the tool layer.

use serde::{Deserialize, Serialize};

use crate::tools::ToolName;

/// Stable id of the router agent (root of every call graph).
pub const ROUTER_AGENT_ID: &str = "router";

/// The five specialists the router can hand off to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistKind {
    EmailOps,
    Insight,
    Contacts,
    Calendar,
    Automation,
}

impl SpecialistKind {
    pub const ALL: [SpecialistKind; 5] = [
        SpecialistKind::EmailOps,
        SpecialistKind::Insight,
        SpecialistKind::Contacts,
        SpecialistKind::Calendar,
        SpecialistKind::Automation,
    ];

    pub fn agent_id(&self) -> &'static str {
        match self {
            SpecialistKind::EmailOps => "email_ops",
            SpecialistKind::Insight => "insight",
            SpecialistKind::Contacts => "contacts",
            SpecialistKind::Calendar => "calendar",
            SpecialistKind::Automation => "automation",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.agent_id() == name)
    }

    /// What this specialist is for, used in the routing prompt.
    pub fn description(&self) -> &'static str {
        match self {
            SpecialistKind::EmailOps => {
                "finding, listing, and triaging individual emails"
            }
            SpecialistKind::Insight => {
                "counting, aggregating, and summarizing mail in bulk"
            }
            SpecialistKind::Contacts => "questions about people and addresses",
            SpecialistKind::Calendar => "questions about meetings and events",
            SpecialistKind::Automation => "starting mailbox syncs and backfills",
        }
    }

    /// The tool subset this specialist may call.
    pub fn allowed_tools(&self) -> &'static [ToolName] {
        match self {
            SpecialistKind::EmailOps => &[
                ToolName::SearchEmails,
                ToolName::ListUnreadMessages,
                ToolName::ListRecentEmails,
                ToolName::TriageRecentEmails,
            ],
            SpecialistKind::Insight => &[
                ToolName::AggregateEmails,
                ToolName::AnalyzeEmails,
                ToolName::CountEmails,
                ToolName::SearchEmails,
            ],
            SpecialistKind::Contacts => &[ToolName::ListContacts, ToolName::SearchEmails],
            SpecialistKind::Calendar => &[ToolName::ListEvents],
            SpecialistKind::Automation => &[ToolName::SyncStart, ToolName::BackfillStart],
        }
    }

    pub fn allows(&self, tool: ToolName) -> bool {
        self.allowed_tools().contains(&tool)
    }
}
