//! Gate in front of tools hosted on MCP servers.

use crate::tool::ToolDescriptor;
use async_trait::async_trait;
use concerto_core::{ConcertoResult, ToolResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// A source of externally hosted tools (typically one or more MCP servers).
#[async_trait]
pub trait McpToolSource: Send + Sync {
    /// All tools currently exposed by the source.
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    /// Whether the source exposes a tool with this name.
    fn has(&self, name: &str) -> bool {
        self.descriptors().iter().any(|d| d.name == name)
    }

    /// Invoke a hosted tool.
    async fn call_tool(
        &self,
        call_id: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> ConcertoResult<ToolResult>;
}

/// MCP tools are only reachable by agent types on the allow-list.
#[derive(Clone)]
pub struct McpGate {
    source: Arc<dyn McpToolSource>,
    allowed_agents: HashSet<String>,
}

impl McpGate {
    /// Wrap `source`, permitting the given agent types.
    pub fn new(source: Arc<dyn McpToolSource>, allowed_agents: impl IntoIterator<Item = String>) -> Self {
        Self {
            source,
            allowed_agents: allowed_agents.into_iter().collect(),
        }
    }

    /// Whether `agent_type` may call MCP tools at all.
    pub fn permits(&self, agent_type: &str) -> bool {
        self.allowed_agents.contains(agent_type)
    }

    /// Whether the underlying source hosts `name`.
    pub fn hosts(&self, name: &str) -> bool {
        self.source.has(name)
    }

    /// Descriptors visible to `agent_type` (empty when not permitted).
    pub fn descriptors_for(&self, agent_type: &str) -> Vec<ToolDescriptor> {
        if self.permits(agent_type) {
            self.source.descriptors()
        } else {
            Vec::new()
        }
    }

    /// Call a hosted tool on behalf of `agent_type`.
    ///
    /// A denied call is returned as an error [`ToolResult`] so the conversation
    /// can continue.
    pub async fn call(
        &self,
        agent_type: &str,
        call_id: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> ConcertoResult<ToolResult> {
        if !self.permits(agent_type) {
            warn!(agent_type = %agent_type, tool = %name, "MCP tool denied for agent type");
            return Ok(ToolResult::error(
                call_id,
                format!("Tool '{name}' is not available to agent '{agent_type}'"),
            ));
        }
        self.source.call_tool(call_id, name, arguments).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct FakeServer;

    #[async_trait]
    impl McpToolSource for FakeServer {
        fn descriptors(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor::new(
                "figma_get_file",
                "[MCP:figma] Fetch a design file",
                serde_json::json!({"type": "object"}),
            )]
        }

        async fn call_tool(
            &self,
            call_id: &str,
            name: &str,
            _arguments: serde_json::Value,
        ) -> ConcertoResult<ToolResult> {
            Ok(ToolResult::success(call_id, format!("called {name}")))
        }
    }

    fn gate() -> McpGate {
        McpGate::new(Arc::new(FakeServer), vec!["designer".to_string()])
    }

    #[tokio::test]
    async fn test_permitted_agent_reaches_source() {
        let result = gate()
            .call("designer", "c1", "figma_get_file", serde_json::json!({}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, "called figma_get_file");
    }

    #[tokio::test]
    async fn test_other_agent_denied_softly() {
        let result = gate()
            .call("scribe", "c1", "figma_get_file", serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("not available to agent 'scribe'"));
    }

    #[test]
    fn test_descriptors_filtered_by_agent() {
        let gate = gate();
        assert!(gate.hosts("figma_get_file"));
        assert_eq!(gate.descriptors_for("designer").len(), 1);
        assert!(gate.descriptors_for("scribe").is_empty());
    }
}
