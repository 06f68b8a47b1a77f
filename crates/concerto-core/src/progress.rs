use crate::{ConcertoError, ConcertoResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of a progress update streamed to the caller during a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// The agent is reasoning about the next step.
    Thinking,
    /// A tool call is about to be dispatched.
    ToolExecution,
    /// A (rephrased) tool result is available.
    ToolResponse,
    /// The model produced free-text content.
    LlmResponse,
    /// The flow terminated; carries the conclusion.
    Finished,
    /// The flow failed.
    Error,
    /// Echo of the user's message.
    UserMessage,
}

impl std::fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProgressKind::Thinking => "thinking",
            ProgressKind::ToolExecution => "tool_execution",
            ProgressKind::ToolResponse => "tool_response",
            ProgressKind::LlmResponse => "llm_response",
            ProgressKind::Finished => "finished",
            ProgressKind::Error => "error",
            ProgressKind::UserMessage => "user_message",
        };
        f.write_str(name)
    }
}

/// A single progress update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Event kind, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    /// Human-readable payload.
    pub content: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ProgressEvent {
    /// Creates an event without metadata.
    pub fn new(kind: ProgressKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata: None,
        }
    }

    /// Attaches structured metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Receives progress updates for one flow invocation.
///
/// A sink is handed to each flow request explicitly, so concurrent flows never
/// share dispatch state.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Deliver one event. Awaiting may block on the transport write.
    async fn send(&self, event: ProgressEvent) -> ConcertoResult<()>;
}

/// Sink that forwards events into a tokio channel.
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgressSink {
    /// Create a sink plus the receiving half, with the given buffer size.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSink for ChannelProgressSink {
    async fn send(&self, event: ProgressEvent) -> ConcertoResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| ConcertoError::Flow(format!("progress receiver dropped: {e}")))
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressSink;

#[async_trait]
impl ProgressSink for NullProgressSink {
    async fn send(&self, _event: ProgressEvent) -> ConcertoResult<()> {
        Ok(())
    }
}
