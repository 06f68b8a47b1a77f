//! Core types and error definitions for the Concerto orchestration engine.
//!
//! This crate provides the foundational types shared across all Concerto crates,
//! including error handling, message representations, tool call abstractions,
//! progress events and the fire-and-forget event bus.
//!
//! # Main types
//!
//! - [`ConcertoError`]: Unified error enum for all Concerto subsystems.
//! - [`ConcertoResult`]: Convenience alias for `Result<T, ConcertoError>`.
//! - [`Role`]: Message role (user, assistant, system, tool).
//! - [`Message`]: A single message within a conversation.
//! - [`ToolCall`]: Represents a model-initiated tool invocation request.
//! - [`ToolResult`]: The result returned after executing a tool call.
//! - [`ProgressEvent`]: Streamed progress update for an autonomous flow.
//! - [`EventBus`]: Fire-and-forget named event emission.

/// Fire-and-forget event bus.
pub mod events;
/// Progress events and sinks.
pub mod progress;
/// Tracing subscriber setup.
pub mod telemetry;

pub use events::{BroadcastEventBus, BusEvent, EventBus, NoopEventBus};
pub use progress::{ChannelProgressSink, NullProgressSink, ProgressEvent, ProgressKind, ProgressSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the Concerto engine.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum ConcertoError {
    /// An error originating from the configurable agent runtime.
    #[error("Agent error: {0}")]
    Agent(String),

    /// The model collaborator failed to produce a response.
    #[error("Model error: {0}")]
    Model(String),

    /// A tool failed while executing.
    #[error("Tool error: {0}")]
    Tool(String),

    /// An error from the capability registry or agent factory.
    #[error("Registry error: {0}")]
    Registry(String),

    /// A delegated agent could not be instantiated or invoked.
    #[error("Delegation to '{agent_type}' failed: {cause}")]
    Delegation {
        /// The agent type the call was delegated to.
        agent_type: String,
        /// Description of the underlying failure.
        cause: String,
    },

    /// An error from the autonomous flow controller.
    #[error("Flow error: {0}")]
    Flow(String),

    /// An error related to conversation or execution persistence.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// Startup validation found inconsistent agent wiring.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ConcertoError`].
pub type ConcertoResult<T> = Result<T, ConcertoError>;

// --- Message types ---

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human end-user.
    User,
    /// The AI assistant.
    Assistant,
    /// A system-level instruction or prompt.
    System,
    /// Output produced by a tool invocation.
    Tool,
}

/// A single message exchanged within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The role of the message author.
    pub role: Role,
    /// The textual content of the message.
    pub content: String,
    /// The conversation this message belongs to.
    pub conversation_id: Uuid,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary key-value metadata attached to the message.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Creates a new message with the given role, content, and conversation ID.
    pub fn new(role: Role, content: impl Into<String>, conversation_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            conversation_id,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<String>, conversation_id: Uuid) -> Self {
        Self::new(Role::User, content, conversation_id)
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>, conversation_id: Uuid) -> Self {
        Self::new(Role::Assistant, content, conversation_id)
    }

    /// Creates a new message with [`Role::System`].
    pub fn system(content: impl Into<String>, conversation_id: Uuid) -> Self {
        Self::new(Role::System, content, conversation_id)
    }

    /// Creates a new message with [`Role::Tool`].
    pub fn tool(content: impl Into<String>, conversation_id: Uuid) -> Self {
        Self::new(Role::Tool, content, conversation_id)
    }

    /// Attaches a metadata entry, returning the message.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// --- Tool types ---

/// A request from the model to invoke a specific tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier assigned by the model for this tool call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Creates a tool call with a generated identifier.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// The result returned after executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the [`ToolCall`] this result corresponds to.
    pub call_id: String,
    /// The textual output produced by the tool.
    pub content: String,
    /// Whether the tool execution ended in an error.
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Creates an error tool result.
    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}
