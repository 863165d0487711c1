//! Client-facing event sink.
//!
//! The forwarder and orchestrator write `RelayEvent`s; the HTTP layer turns
//! them into SSE frames. A failed write means the client is gone.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

/// Sentinel data of the terminal event.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// One character of generated (or fallback) text.
    Char(char),
    /// Announces that fallback text follows.
    Error { message: String },
    /// End of stream.
    Done,
}

impl RelayEvent {
    /// Payload of the `data:` line for this event.
    pub fn to_sse_data(&self) -> String {
        match self {
            RelayEvent::Char(c) => json!({ "char": c.to_string() }).to_string(),
            RelayEvent::Error { message } => {
                json!({ "error": message, "fallback": true }).to_string()
            }
            RelayEvent::Done => DONE_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("client disconnected")]
pub struct SinkClosed;

#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: RelayEvent) -> Result<(), SinkClosed>;
}

/// Sink backed by the channel feeding an SSE response body.
pub struct ChannelSink {
    tx: mpsc::Sender<RelayEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<RelayEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: RelayEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }
}
