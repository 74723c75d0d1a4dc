//! Voice narration layer.
//!
//! Strictly I/O: acknowledge immediately, narrate backend events in order,
//! summarize at the end, and tear down without ever failing teardown. The
//! realtime-provider implementation and test mocks are substitutable behind
//! [`VoiceSession`] without touching the bridge.

pub mod narration;
pub mod realtime;

pub use narration::{narration_for_event, NarrationMode, Narrator};
pub use realtime::{mint_ephemeral_token, RealtimeTransport, RealtimeVoiceSession};

use async_trait::async_trait;

use crate::types::VoiceError;

/// Capability set of a voice session.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Speak an immediate acknowledgement (at most two sentences), before any
    /// backend work begins.
    async fn acknowledge(&self, text: &str) -> Result<(), VoiceError>;

    /// Speak one narration line.
    async fn narrate(&self, text: &str) -> Result<(), VoiceError>;

    /// Speak the final summary for the turn.
    async fn final_summary(&self, text: &str) -> Result<(), VoiceError>;

    /// Tear the session down. Must never fail: missing or failing close
    /// methods on the underlying transport are swallowed.
    async fn disconnect(&self);
}
