//! Map-reduce summarization: priority triage and hierarchical rollups.

pub mod bucket;
pub mod map_reduce;
pub mod model;

pub use bucket::{day_bucket, month_bucket, week_bucket};
pub use map_reduce::{
    dedupe_and_rank, Candidate, MapReduceEngine, SourceItem, TriageOutcome, Validation,
};
pub use model::{extract_json, ChatModel, ChatRequest, OpenAiChatModel};

use std::sync::Arc;

use crate::config::TriageConfig;
use crate::mail::MailMessage;
use crate::types::SummarizerError;

/// High-level summarization facade bound to chat models and triage settings.
pub struct Summarizer {
    model: Arc<dyn ChatModel>,
    text_model: String,
    priority_model: String,
    config: TriageConfig,
}

impl Summarizer {
    pub fn new(
        model: Arc<dyn ChatModel>,
        text_model: impl Into<String>,
        priority_model: impl Into<String>,
        config: TriageConfig,
    ) -> Self {
        Self {
            model,
            text_model: text_model.into(),
            priority_model: priority_model.into(),
            config,
        }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Render a message into the excerpt the triage model sees.
    fn source_item(&self, message: &MailMessage) -> SourceItem {
        let body = message.body_text();
        let excerpt: String = body.chars().take(self.config.body_chars).collect();
        let text = format!(
            "subject: {}\nfrom: {}\ndate: {}\nunread: {}\n{}",
            message.subject,
            message
                .sender()
                .map(|a| a.display())
                .unwrap_or_else(|| "(unknown)".to_string()),
            message.date,
            message.unread,
            excerpt
        );
        SourceItem {
            id: message.id.clone(),
            text,
        }
    }

    /// Priority triage over the latest messages.
    pub async fn triage_messages(
        &self,
        messages: &[MailMessage],
    ) -> Result<TriageOutcome, SummarizerError> {
        let items: Vec<SourceItem> = messages.iter().map(|m| self.source_item(m)).collect();
        let engine = MapReduceEngine::new(self.model.as_ref(), &self.priority_model, &self.config);
        engine.triage(&items).await
    }

    /// Rollup text for a thread or temporal bucket.
    pub async fn rollup_texts(
        &self,
        texts: &[String],
    ) -> Result<(String, Validation), SummarizerError> {
        let engine = MapReduceEngine::new(self.model.as_ref(), &self.text_model, &self.config);
        engine.rollup(texts).await
    }
}
