use crate::context::ToolContext;
use crate::tool::{Tool, ToolDescriptor};
use async_trait::async_trait;
use concerto_core::{ConcertoError, ConcertoResult, ToolCall, ToolResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Name-addressed tool lookup and execution.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Whether a tool with exactly this name exists.
    fn has(&self, name: &str) -> bool;

    /// Descriptor for a tool, if registered.
    fn descriptor(&self, name: &str) -> Option<ToolDescriptor>;

    /// Execute the tool named by `call.name`.
    async fn execute(&self, call: ToolCall, ctx: &ToolContext) -> ConcertoResult<ToolResult>;
}

/// Central registry for locally executable tools.
pub struct LocalToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl LocalToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        info!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Descriptors of all registered tools, sorted by name.
    pub fn list_descriptors(&self) -> Vec<&ToolDescriptor> {
        let mut descriptors: Vec<_> = self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for LocalToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRegistry for LocalToolRegistry {
    fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|t| t.descriptor().clone())
    }

    async fn execute(&self, call: ToolCall, ctx: &ToolContext) -> ConcertoResult<ToolResult> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ConcertoError::Tool(format!("Unknown tool: {}", call.name)))?;
        debug!(tool = %call.name, agent_type = %ctx.agent_type, "Executing local tool");
        tool.execute(call, ctx).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct EchoTool {
        descriptor: ToolDescriptor,
    }

    impl EchoTool {
        fn new(name: &str) -> Self {
            Self {
                descriptor: ToolDescriptor::new(name, "Echo the input", serde_json::json!({})),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, call: ToolCall, _ctx: &ToolContext) -> ConcertoResult<ToolResult> {
            Ok(ToolResult::success(&call.id, call.arguments.to_string()))
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let mut registry = LocalToolRegistry::new();
        registry.register(Arc::new(EchoTool::new("echo")));
        assert!(registry.has("echo"));
        assert!(!registry.has("ech"));

        let ctx = ToolContext::root("scribe", Uuid::new_v4(), 3);
        let result = registry
            .execute(ToolCall::new("echo", serde_json::json!({"x": 1})), &ctx)
            .await
            .unwrap();
        assert_eq!(result.content, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn test_unknown_tool_errors() {
        let registry = LocalToolRegistry::default();
        let ctx = ToolContext::root("scribe", Uuid::new_v4(), 3);
        let err = registry
            .execute(ToolCall::new("missing", serde_json::Value::Null), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown tool: missing"));
    }

    #[test]
    fn test_descriptors_sorted() {
        let mut registry = LocalToolRegistry::new();
        registry.register(Arc::new(EchoTool::new("zeta")));
        registry.register(Arc::new(EchoTool::new("alpha")));
        let names: Vec<_> = registry.list_descriptors().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(registry.tool_count(), 2);
    }
}
