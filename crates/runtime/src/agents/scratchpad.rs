//! Per-tenant scratchpads.
//!
//! Each tool call's one-line summary (`total=…`, `matches=…`) is retained so
//! subsequent turns can reference earlier findings without recomputation.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::GrantId;

/// Entries kept per tenant; older findings age out beyond this.
const MAX_ENTRIES: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    pub tool: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

/// Scratchpads for all tenants, keyed by grant.
#[derive(Default)]
pub struct ScratchpadStore {
    pads: DashMap<String, Vec<ScratchpadEntry>>,
}

impl ScratchpadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, grant_id: &GrantId, tool: &str, summary: &str) {
        let mut pad = self.pads.entry(grant_id.as_str().to_string()).or_default();
        pad.push(ScratchpadEntry {
            tool: tool.to_string(),
            summary: summary.to_string(),
            timestamp: Utc::now(),
        });
        let excess = pad.len().saturating_sub(MAX_ENTRIES);
        if excess > 0 {
            pad.drain(..excess);
        }
    }

    pub fn entries(&self, grant_id: &GrantId) -> Vec<ScratchpadEntry> {
        self.pads
            .get(grant_id.as_str())
            .map(|pad| pad.clone())
            .unwrap_or_default()
    }

    /// Render recent findings for inclusion in a planning prompt.
    pub fn render(&self, grant_id: &GrantId, limit: usize) -> String {
        let entries = self.entries(grant_id);
        entries
            .iter()
            .rev()
            .take(limit)
            .rev()
            .map(|e| format!("{}: {}", e.tool, e.summary))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&self, grant_id: &GrantId) {
        self.pads.remove(grant_id.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_and_renders_in_order() {
        let store = ScratchpadStore::new();
        let grant = GrantId::new("g1");
        store.append(&grant, "search_emails", "total=3");
        store.append(&grant, "count_emails", "total=12");

        let rendered = store.render(&grant, 10);
        assert_eq!(rendered, "search_emails: total=3\ncount_emails: total=12");
    }

    #[test]
    fn caps_retained_entries() {
        let store = ScratchpadStore::new();
        let grant = GrantId::new("g1");
        for i in 0..(MAX_ENTRIES + 10) {
            store.append(&grant, "count_emails", &format!("total={i}"));
        }
        let entries = store.entries(&grant);
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert_eq!(entries.last().unwrap().summary, "total=59");
    }

    #[test]
    fn tenants_are_isolated() {
        let store = ScratchpadStore::new();
        store.append(&GrantId::new("g1"), "search_emails", "total=1");
        assert!(store.entries(&GrantId::new("g2")).is_empty());
    }
}
