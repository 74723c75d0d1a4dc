//! Realtime speech provider integration.
//!
//! The server mints ephemeral client tokens and can drive a WebSocket
//! session directly. Transport teardown tries each close method in order
//! (`close`, `disconnect`, `dispose`) and swallows individual failures so one
//! missing method never prevents teardown.

use async_trait::async_trait;
use futures::SinkExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

use crate::config::RealtimeConfig;
use crate::types::VoiceError;

use super::VoiceSession;

/// Mint an ephemeral client token for the browser. The server-side API key
/// never reaches the client.
pub async fn mint_ephemeral_token(config: &RealtimeConfig) -> Result<Value, VoiceError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| VoiceError::Session(format!("failed to build HTTP client: {e}")))?;

    let resp = client
        .post(format!("{}/realtime/sessions", config.base_url))
        .bearer_auth(&config.api_key)
        .json(&serde_json::json!({ "model": config.model, "voice": "alloy" }))
        .send()
        .await
        .map_err(|e| VoiceError::Session(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(VoiceError::Session(format!(
            "token mint failed ({status}): {body}"
        )));
    }
    resp.json::<Value>()
        .await
        .map_err(|e| VoiceError::Session(e.to_string()))
}

/// Underlying realtime transport. Implementations provide whichever close
/// methods their SDK actually has; the defaults report "unsupported".
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), VoiceError>;

    async fn close(&self) -> Result<(), VoiceError> {
        Err(VoiceError::Session("close not supported".to_string()))
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        Err(VoiceError::Session("disconnect not supported".to_string()))
    }

    async fn dispose(&self) -> Result<(), VoiceError> {
        Err(VoiceError::Session("dispose not supported".to_string()))
    }
}

/// WebSocket transport speaking the provider's realtime event protocol.
pub struct WsTransport {
    sink: Mutex<
        futures::stream::SplitSink<
            tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
            Message,
        >,
    >,
}

impl WsTransport {
    /// Connect to the realtime endpoint for `config.model`.
    pub async fn connect(config: &RealtimeConfig) -> Result<Self, VoiceError> {
        let ws_base = config
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        let url = format!("{ws_base}/realtime?model={}", config.model);
        let (stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| VoiceError::Session(format!("realtime connect failed: {e}")))?;
        use futures::StreamExt;
        let (sink, _read) = stream.split();
        Ok(Self {
            sink: Mutex::new(sink),
        })
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn send_text(&self, text: &str) -> Result<(), VoiceError> {
        let event = serde_json::json!({
            "type": "response.create",
            "response": { "modalities": ["audio", "text"], "instructions": text },
        });
        self.sink
            .lock()
            .await
            .send(Message::Text(event.to_string()))
            .await
            .map_err(|e| VoiceError::Session(e.to_string()))
    }

    async fn close(&self) -> Result<(), VoiceError> {
        self.sink
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| VoiceError::Session(e.to_string()))
    }
}

/// [`VoiceSession`] backed by a realtime transport.
pub struct RealtimeVoiceSession {
    transport: Mutex<Option<Arc<dyn RealtimeTransport>>>,
}

impl RealtimeVoiceSession {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
        }
    }

    /// A session with no transport yet (set later, or never in tests).
    pub fn disconnected() -> Self {
        Self {
            transport: Mutex::new(None),
        }
    }

    pub async fn set_transport(&self, transport: Arc<dyn RealtimeTransport>) {
        *self.transport.lock().await = Some(transport);
    }

    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        let transport = self.transport.lock().await.clone();
        match transport {
            Some(t) => t.send_text(text).await,
            None => Err(VoiceError::Session("no transport attached".to_string())),
        }
    }
}

#[async_trait]
impl VoiceSession for RealtimeVoiceSession {
    async fn acknowledge(&self, text: &str) -> Result<(), VoiceError> {
        self.speak(text).await
    }

    async fn narrate(&self, text: &str) -> Result<(), VoiceError> {
        self.speak(text).await
    }

    async fn final_summary(&self, text: &str) -> Result<(), VoiceError> {
        self.speak(text).await
    }

    async fn disconnect(&self) {
        let transport = self.transport.lock().await.take();
        let Some(transport) = transport else {
            return;
        };
        for name in ["close", "disconnect", "dispose"] {
            let attempt = match name {
                "close" => transport.close().await,
                "disconnect" => transport.disconnect().await,
                _ => transport.dispose().await,
            };
            match attempt {
                Ok(()) => {
                    tracing::debug!(method = name, "realtime session closed");
                    return;
                }
                Err(e) => {
                    tracing::debug!(method = name, error = %e, "close attempt failed, trying next");
                }
            }
        }
        tracing::warn!("no close method succeeded; dropping realtime transport");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct DisposeOnly {
        disposed: AtomicBool,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl RealtimeTransport for DisposeOnly {
        async fn send_text(&self, _text: &str) -> Result<(), VoiceError> {
            Ok(())
        }
        async fn dispose(&self) -> Result<(), VoiceError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.disposed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoCloseMethods;

    #[async_trait]
    impl RealtimeTransport for NoCloseMethods {
        async fn send_text(&self, _text: &str) -> Result<(), VoiceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn disconnect_falls_through_to_dispose() {
        let transport = Arc::new(DisposeOnly::default());
        let session = RealtimeVoiceSession::new(transport.clone());
        session.disconnect().await;
        assert!(transport.disposed.load(Ordering::SeqCst));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_without_any_close_method_returns_cleanly() {
        let session = RealtimeVoiceSession::new(Arc::new(NoCloseMethods));
        // Must not panic or error.
        session.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_with_no_transport_is_a_no_op() {
        let session = RealtimeVoiceSession::disconnected();
        session.disconnect().await;
    }

    #[tokio::test]
    async fn speak_without_transport_errors() {
        let session = RealtimeVoiceSession::disconnected();
        assert!(session.narrate("hello").await.is_err());
    }
}
