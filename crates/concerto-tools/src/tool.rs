use crate::context::ToolContext;
use async_trait::async_trait;
use concerto_core::{ConcertoResult, ToolCall, ToolResult};
use serde::{Deserialize, Serialize};

/// Metadata describing a tool's interface, as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// What the tool does, phrased for the model.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Creates a descriptor.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
        }
    }
}

/// Trait that all locally executable tools implement, including delegation tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's interface.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Run the tool. `ctx` identifies the calling agent and its delegation chain.
    async fn execute(&self, call: ToolCall, ctx: &ToolContext) -> ConcertoResult<ToolResult>;
}
