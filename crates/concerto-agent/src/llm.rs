use async_trait::async_trait;
use concerto_core::{ConcertoResult, Message, ToolCall};
use concerto_tools::ToolDescriptor;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlates one model invocation with the flow that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceContext {
    /// Unique per `act()` call.
    pub trace_id: Uuid,
    /// Agent type making the call.
    pub agent_type: String,
    /// 1-based attempt within the current `act()` call.
    pub attempt: u32,
    /// Delegation depth of the calling agent.
    pub depth: u32,
}

impl TraceContext {
    /// A fresh trace for a first attempt at depth 0.
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            agent_type: agent_type.into(),
            attempt: 1,
            depth: 0,
        }
    }

    /// Set the attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Set the delegation depth.
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }
}

/// Everything the model collaborator receives for one invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Full prompt: system prompt, history and any corrective turn.
    pub messages: Vec<Message>,
    /// Tools the model may call.
    pub tools: Vec<ToolDescriptor>,
    /// Correlation data for logging and tracing.
    pub trace: TraceContext,
}

/// Raw model output: free text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Free-text reply, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls requested by the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    /// A text-only response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A response carrying a single tool call.
    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            content: None,
            tool_calls: vec![call],
        }
    }

    /// Non-blank text content, if any.
    pub fn content_text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// True when there is neither usable text nor a tool call.
    pub fn is_empty(&self) -> bool {
        self.content_text().is_none() && self.tool_calls.is_empty()
    }

    /// Flatten to a single string: the text content when present,
    /// otherwise the JSON form of the whole response.
    pub fn into_plain_string(self) -> String {
        match self.content {
            Some(content) => content,
            None => serde_json::to_string(&self).unwrap_or_default(),
        }
    }
}

/// The language-model backend.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Run one completion.
    async fn invoke(&self, request: ModelRequest) -> ConcertoResult<ModelResponse>;
}
