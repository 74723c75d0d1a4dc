//! Mail entity types, normalized from the provider's wire format.

use serde::{Deserialize, Serialize};

use super::text;

/// A single mailbox participant. Either field may be missing on the wire;
/// `display()` always yields something usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl EmailAddress {
    pub fn new(name: Option<&str>, email: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            email: email.map(str::to_string),
        }
    }

    /// Human-readable form: `Name <addr>` when both exist, otherwise whichever
    /// is present, otherwise `"(unknown)"`.
    pub fn display(&self) -> String {
        match (&self.name, &self.email) {
            (Some(n), Some(e)) if !n.is_empty() => format!("{n} <{e}>"),
            (_, Some(e)) => e.clone(),
            (Some(n), None) => n.clone(),
            (None, None) => "(unknown)".to_string(),
        }
    }

    /// The domain of the address, lowercased, if one can be derived.
    pub fn domain(&self) -> Option<String> {
        self.email.as_deref().and_then(text::from_domain)
    }
}

/// Attachment metadata. Content is never fetched by the ingestion path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
}

/// A mailbox message as consumed by the ingestion worker.
///
/// `date` is authoritative for all time filtering and is stored as integer
/// epoch seconds (UTC).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: Vec<EmailAddress>,
    #[serde(default)]
    pub to: Vec<EmailAddress>,
    #[serde(default)]
    pub cc: Vec<EmailAddress>,
    #[serde(default)]
    pub bcc: Vec<EmailAddress>,
    #[serde(default)]
    pub reply_to: Vec<EmailAddress>,
    /// Epoch seconds, UTC.
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Raw body as returned by the provider (may be HTML or base64).
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

impl MailMessage {
    /// The primary sender, if any.
    pub fn sender(&self) -> Option<&EmailAddress> {
        self.from.first()
    }

    /// Sender address string used in vector metadata.
    pub fn sender_email(&self) -> String {
        self.sender()
            .and_then(|a| a.email.clone())
            .unwrap_or_default()
    }

    /// Sender domain, derived from the first `from` address.
    pub fn from_domain(&self) -> Option<String> {
        self.sender().and_then(EmailAddress::domain)
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Plain text of the body: base64 decoded when applicable, HTML stripped,
    /// whitespace normalized. Empty when the message has no usable text.
    pub fn body_text(&self) -> String {
        let raw = self
            .body
            .as_deref()
            .or(self.snippet.as_deref())
            .unwrap_or("");
        text::extract_text(raw)
    }
}

/// Address-book contact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub company: Option<String>,
}

/// Calendar event, specified only at the interface the agents need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Epoch seconds, UTC.
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub participants: Vec<EmailAddress>,
}
