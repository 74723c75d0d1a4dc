//! Mail provider adapter.
//!
//! Wraps the provider's REST API behind the [`MailApi`] trait: cursor-based
//! message pagination, unread listing, contacts, and calendar events. HTML
//! bodies are reduced to plain text before anything downstream sees them.

pub mod client;
pub mod text;
pub mod types;

pub use client::{ListMessagesParams, MailApi, MessagePage, NullMailClient, NylasMailClient};
pub use types::{Attachment, CalendarEvent, Contact, EmailAddress, MailMessage};
