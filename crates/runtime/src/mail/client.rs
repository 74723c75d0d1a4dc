//! HTTP client for the mail provider's v3 REST API.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::MailConfig;
use crate::types::{GrantId, MailError};

use super::types::{Attachment, CalendarEvent, Contact, EmailAddress, MailMessage};

/// One page of messages plus the cursor for the next page. A missing cursor
/// means the page is terminal.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<MailMessage>,
    pub next_cursor: Option<String>,
}

/// Parameters for a paginated message fetch.
#[derive(Debug, Clone)]
pub struct ListMessagesParams {
    pub grant_id: GrantId,
    pub limit: usize,
    pub page_token: Option<String>,
    /// Epoch seconds; only messages received after this instant.
    pub received_after: Option<i64>,
    /// Provider view hint (e.g. `"expanded"` to include full bodies).
    pub view: Option<String>,
}

impl ListMessagesParams {
    pub fn new(grant_id: GrantId, limit: usize) -> Self {
        Self {
            grant_id,
            limit,
            page_token: None,
            received_after: None,
            view: None,
        }
    }
}

/// Mail provider operations used by the runtime.
///
/// The production implementation is [`NylasMailClient`]; tests substitute
/// in-memory fakes.
#[async_trait]
pub trait MailApi: Send + Sync {
    /// Fetch one page of messages, newest pagination order left to the
    /// provider (the design tolerates reorderings).
    async fn list_messages_page(
        &self,
        params: &ListMessagesParams,
    ) -> Result<MessagePage, MailError>;

    /// Convenience listing of unread messages.
    async fn list_unread(
        &self,
        grant_id: &GrantId,
        limit: usize,
        received_after: Option<i64>,
    ) -> Result<Vec<MailMessage>, MailError>;

    async fn list_contacts(
        &self,
        grant_id: &GrantId,
        limit: usize,
    ) -> Result<Vec<Contact>, MailError>;

    async fn list_events(
        &self,
        grant_id: &GrantId,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>, MailError>;
}

// ── Wire format ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Vec<WireAddress>,
    #[serde(default)]
    to: Vec<WireAddress>,
    #[serde(default)]
    cc: Vec<WireAddress>,
    #[serde(default)]
    bcc: Vec<WireAddress>,
    #[serde(default)]
    reply_to: Vec<WireAddress>,
    #[serde(default)]
    date: i64,
    #[serde(default)]
    folders: Vec<String>,
    #[serde(default)]
    unread: bool,
    #[serde(default)]
    starred: bool,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAddress {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    #[serde(default)]
    id: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct WireContact {
    id: String,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    surname: Option<String>,
    #[serde(default)]
    emails: Vec<WireContactEmail>,
    #[serde(default)]
    company_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContactEmail {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    when: Option<WireWhen>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    participants: Vec<WireAddress>,
}

#[derive(Debug, Deserialize)]
struct WireWhen {
    #[serde(default)]
    start_time: i64,
    #[serde(default)]
    end_time: i64,
}

fn addresses(wire: Vec<WireAddress>) -> Vec<EmailAddress> {
    wire.into_iter()
        .map(|a| EmailAddress {
            name: a.name.filter(|n| !n.is_empty()),
            email: a.email.filter(|e| !e.is_empty()),
        })
        .collect()
}

impl From<WireMessage> for MailMessage {
    fn from(w: WireMessage) -> Self {
        let folder = w.folders.first().cloned();
        MailMessage {
            id: w.id,
            thread_id: w.thread_id.unwrap_or_default(),
            subject: w.subject.unwrap_or_default(),
            from: addresses(w.from),
            to: addresses(w.to),
            cc: addresses(w.cc),
            bcc: addresses(w.bcc),
            reply_to: addresses(w.reply_to),
            date: w.date,
            labels: w.folders,
            folder,
            unread: w.unread,
            starred: w.starred,
            attachments: w
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    id: a.id,
                    filename: a.filename.unwrap_or_default(),
                    content_type: a.content_type.unwrap_or_default(),
                    size: a.size,
                })
                .collect(),
            body: w.body,
            snippet: w.snippet,
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────

/// Production mail client for the Nylas-style v3 grants API.
pub struct NylasMailClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl NylasMailClient {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MailError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
        })
    }

    /// Build a client with an explicit timeout (used by tests).
    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self, MailError> {
        Self::new(&MailConfig {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            default_grant: None,
            timeout: Duration::from_secs(30),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(String, String)],
    ) -> Result<T, MailError> {
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| MailError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::from_status(status.as_u16(), body));
        }

        resp.json::<T>()
            .await
            .map_err(|e| MailError::Response(e.to_string()))
    }
}

#[async_trait]
impl MailApi for NylasMailClient {
    async fn list_messages_page(
        &self,
        params: &ListMessagesParams,
    ) -> Result<MessagePage, MailError> {
        let url = format!(
            "{}/v3/grants/{}/messages",
            self.base_url, params.grant_id
        );
        let mut query: Vec<(String, String)> =
            vec![("limit".to_string(), params.limit.to_string())];
        if let Some(ref token) = params.page_token {
            query.push(("page_token".to_string(), token.clone()));
        }
        if let Some(after) = params.received_after {
            query.push(("received_after".to_string(), after.to_string()));
        }
        if let Some(ref view) = params.view {
            query.push(("view".to_string(), view.clone()));
        }

        let envelope: ListEnvelope<WireMessage> = self.get_json(url, &query).await?;
        tracing::debug!(
            grant_id = %params.grant_id,
            count = envelope.data.len(),
            has_next = envelope.next_cursor.is_some(),
            "fetched message page"
        );
        Ok(MessagePage {
            messages: envelope.data.into_iter().map(MailMessage::from).collect(),
            next_cursor: envelope.next_cursor,
        })
    }

    async fn list_unread(
        &self,
        grant_id: &GrantId,
        limit: usize,
        received_after: Option<i64>,
    ) -> Result<Vec<MailMessage>, MailError> {
        let url = format!("{}/v3/grants/{}/messages", self.base_url, grant_id);
        let mut query: Vec<(String, String)> = vec![
            ("limit".to_string(), limit.to_string()),
            ("unread".to_string(), "true".to_string()),
        ];
        if let Some(after) = received_after {
            query.push(("received_after".to_string(), after.to_string()));
        }
        let envelope: ListEnvelope<WireMessage> = self.get_json(url, &query).await?;
        Ok(envelope.data.into_iter().map(MailMessage::from).collect())
    }

    async fn list_contacts(
        &self,
        grant_id: &GrantId,
        limit: usize,
    ) -> Result<Vec<Contact>, MailError> {
        let url = format!("{}/v3/grants/{}/contacts", self.base_url, grant_id);
        let query = vec![("limit".to_string(), limit.to_string())];
        let envelope: ListEnvelope<WireContact> = self.get_json(url, &query).await?;
        Ok(envelope
            .data
            .into_iter()
            .map(|c| {
                let name = match (c.given_name, c.surname) {
                    (Some(g), Some(s)) => Some(format!("{g} {s}")),
                    (Some(g), None) => Some(g),
                    (None, Some(s)) => Some(s),
                    (None, None) => None,
                };
                Contact {
                    id: c.id,
                    name,
                    emails: c.emails.into_iter().filter_map(|e| e.email).collect(),
                    company: c.company_name,
                }
            })
            .collect())
    }

    async fn list_events(
        &self,
        grant_id: &GrantId,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>, MailError> {
        let url = format!("{}/v3/grants/{}/events", self.base_url, grant_id);
        let query = vec![("limit".to_string(), limit.to_string())];
        let envelope: ListEnvelope<WireEvent> = self.get_json(url, &query).await?;
        Ok(envelope
            .data
            .into_iter()
            .map(|e| CalendarEvent {
                id: e.id,
                title: e.title.unwrap_or_default(),
                start: e.when.as_ref().map(|w| w.start_time).unwrap_or_default(),
                end: e.when.as_ref().map(|w| w.end_time).unwrap_or_default(),
                location: e.location,
                participants: addresses(e.participants),
            })
            .collect())
    }
}

/// Mail client for environments with no provider configured: every listing
/// is empty. Lets the rest of the stack run locally against mocks.
pub struct NullMailClient;

#[async_trait]
impl MailApi for NullMailClient {
    async fn list_messages_page(
        &self,
        _params: &ListMessagesParams,
    ) -> Result<MessagePage, MailError> {
        Ok(MessagePage::default())
    }

    async fn list_unread(
        &self,
        _grant_id: &GrantId,
        _limit: usize,
        _received_after: Option<i64>,
    ) -> Result<Vec<MailMessage>, MailError> {
        Ok(Vec::new())
    }

    async fn list_contacts(
        &self,
        _grant_id: &GrantId,
        _limit: usize,
    ) -> Result<Vec<Contact>, MailError> {
        Ok(Vec::new())
    }

    async fn list_events(
        &self,
        _grant_id: &GrantId,
        _limit: usize,
    ) -> Result<Vec<CalendarEvent>, MailError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_maps_folders_and_addresses() {
        let json = serde_json::json!({
            "id": "m1",
            "thread_id": "t1",
            "subject": "Security alert",
            "from": [{"name": "Google", "email": "no-reply@accounts.google.com"}],
            "to": [{"email": "me@example.com"}],
            "date": 1_700_000_000i64,
            "folders": ["INBOX", "IMPORTANT"],
            "unread": true,
            "attachments": [{"id": "a1", "filename": "doc.pdf", "content_type": "application/pdf", "size": 1024}],
            "snippet": "We noticed a new sign-in"
        });
        let wire: WireMessage = serde_json::from_value(json).unwrap();
        let msg = MailMessage::from(wire);
        assert_eq!(msg.folder.as_deref(), Some("INBOX"));
        assert_eq!(msg.labels, vec!["INBOX", "IMPORTANT"]);
        assert_eq!(msg.sender_email(), "no-reply@accounts.google.com");
        assert_eq!(msg.from_domain().as_deref(), Some("accounts.google.com"));
        assert!(msg.has_attachments());
        assert_eq!(msg.date, 1_700_000_000);
    }

    #[test]
    fn terminal_page_has_no_cursor() {
        let json = serde_json::json!({ "data": [] });
        let envelope: ListEnvelope<WireMessage> = serde_json::from_value(json).unwrap();
        assert!(envelope.next_cursor.is_none());
        assert!(envelope.data.is_empty());
    }

    #[test]
    fn empty_wire_fields_become_none() {
        let wire = vec![WireAddress {
            name: Some(String::new()),
            email: Some("a@b.c".to_string()),
        }];
        let parsed = addresses(wire);
        assert!(parsed[0].name.is_none());
        assert_eq!(parsed[0].email.as_deref(), Some("a@b.c"));
    }
}
