use concerto_agent::{ToolRoute, Toolbox, INTROSPECTION_TOOL};
use concerto_core::{ConcertoError, ConcertoResult, ToolCall, ToolResult};
use concerto_tools::{McpGate, ToolContext, ToolDescriptor};
use tracing::{debug, warn};

/// Introspection categories, matched by substring against the tool name in order.
const CATEGORIES: &[(&str, &[&str])] = &[
    ("Agent delegation", &["delegate_to_"]),
    ("Design", &["figma", "design", "frame", "component"]),
    ("Content", &["cms", "content", "entry", "publish"]),
    ("Storage", &["upload", "storage", "asset", "file"]),
    ("Search", &["search", "find", "query", "lookup"]),
];

const GENERAL: &str = "General";

fn category_of(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    CATEGORIES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(category, _)| *category)
        .unwrap_or(GENERAL)
}

/// Render the tool list of one agent, grouped by category.
pub fn describe_tools(agent_type: &str, descriptors: &[ToolDescriptor]) -> String {
    let listed: Vec<&ToolDescriptor> = descriptors
        .iter()
        .filter(|d| d.name != INTROSPECTION_TOOL)
        .collect();
    if listed.is_empty() {
        return format!("Agent '{agent_type}' has no tools available.");
    }

    let mut out = format!(
        "Tools available to agent '{agent_type}' ({}):\n",
        listed.len()
    );
    let order = CATEGORIES
        .iter()
        .map(|(category, _)| *category)
        .chain(std::iter::once(GENERAL));
    for category in order {
        let mut in_category: Vec<&&ToolDescriptor> = listed
            .iter()
            .filter(|d| category_of(&d.name) == category)
            .collect();
        if in_category.is_empty() {
            continue;
        }
        in_category.sort_by(|a, b| a.name.cmp(&b.name));
        out.push_str(&format!("\n## {category}\n"));
        for d in in_category {
            out.push_str(&format!("- {}: {}\n", d.name, d.description));
        }
    }
    out
}

/// Resolves a tool call from one agent to the place that executes it.
///
/// Resolution order, first match wins: the introspection tool, MCP-hosted
/// tools behind the gate, then the agent's own local and delegation tools.
/// Unresolved names come back as an error result, not an `Err`.
#[derive(Clone, Default)]
pub struct ToolDispatcher {
    mcp: Option<McpGate>,
}

impl ToolDispatcher {
    /// Dispatcher with an optional MCP gate.
    pub fn new(mcp: Option<McpGate>) -> Self {
        Self { mcp }
    }

    /// Run `call` on behalf of `ctx.agent_type` using its `toolbox`.
    pub async fn execute_tool_for_agent(
        &self,
        toolbox: &Toolbox,
        call: ToolCall,
        ctx: &ToolContext,
    ) -> ConcertoResult<ToolResult> {
        let name = call.name.clone();
        let agent_type = ctx.agent_type.as_str();

        if name == INTROSPECTION_TOOL {
            debug!(agent_type = %agent_type, "Listing available tools");
            return Ok(ToolResult::success(
                call.id,
                describe_tools(agent_type, toolbox.descriptors()),
            ));
        }

        if let Some(gate) = self.mcp.as_ref().filter(|g| g.hosts(&name)) {
            debug!(agent_type = %agent_type, tool = %name, "Dispatching MCP tool");
            return gate.call(agent_type, &call.id, &name, call.arguments).await;
        }

        match toolbox.route(&name) {
            Some(ToolRoute::Local(tool)) | Some(ToolRoute::Delegation { tool, .. }) => {
                let call_id = call.id.clone();
                debug!(agent_type = %agent_type, tool = %name, "Dispatching local tool");
                match tool.execute(call, ctx).await {
                    Ok(result) => Ok(result),
                    Err(e @ ConcertoError::Delegation { .. }) => Err(e),
                    Err(e) => {
                        warn!(agent_type = %agent_type, tool = %name, error = %e, "Tool failed");
                        Ok(ToolResult::error(
                            call_id,
                            format!("Tool '{name}' failed: {e}"),
                        ))
                    }
                }
            }
            Some(ToolRoute::Introspection) | Some(ToolRoute::Mcp) | None => {
                warn!(agent_type = %agent_type, tool = %name, "Tool not found");
                Ok(ToolResult::error(
                    call.id,
                    format!("Tool '{name}' not found for agent '{agent_type}'"),
                ))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use concerto_tools::{McpToolSource, Tool};
    use std::sync::Arc;
    use uuid::Uuid;

    struct Upper {
        descriptor: ToolDescriptor,
    }

    #[async_trait]
    impl Tool for Upper {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, call: ToolCall, _ctx: &ToolContext) -> ConcertoResult<ToolResult> {
            let text = call.arguments["text"].as_str().unwrap_or_default().to_uppercase();
            Ok(ToolResult::success(call.id, text))
        }
    }

    struct Broken {
        descriptor: ToolDescriptor,
    }

    #[async_trait]
    impl Tool for Broken {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, _call: ToolCall, _ctx: &ToolContext) -> ConcertoResult<ToolResult> {
            Err(ConcertoError::Tool("disk full".into()))
        }
    }

    struct Figma;

    #[async_trait]
    impl McpToolSource for Figma {
        fn descriptors(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor::new("figma_get_file", "Fetch a design file", serde_json::json!({}))]
        }

        async fn call_tool(
            &self,
            call_id: &str,
            name: &str,
            _arguments: serde_json::Value,
        ) -> ConcertoResult<ToolResult> {
            Ok(ToolResult::success(call_id, format!("{name} ok")))
        }
    }

    fn toolbox() -> Toolbox {
        let mut toolbox = Toolbox::new();
        toolbox.add_introspection();
        toolbox.add_local(Arc::new(Upper {
            descriptor: ToolDescriptor::new("shout", "Uppercase text", serde_json::json!({})),
        }));
        toolbox.add_local(Arc::new(Broken {
            descriptor: ToolDescriptor::new("upload_asset", "Upload an asset", serde_json::json!({})),
        }));
        toolbox
    }

    fn ctx(agent_type: &str) -> ToolContext {
        ToolContext::root(agent_type, Uuid::new_v4(), 3)
    }

    #[test]
    fn test_categories_by_substring() {
        assert_eq!(category_of("delegate_to_rephraser"), "Agent delegation");
        assert_eq!(category_of("figma_get_file"), "Design");
        assert_eq!(category_of("cms_create_entry"), "Content");
        assert_eq!(category_of("shout"), GENERAL);
    }

    #[tokio::test]
    async fn test_introspection_lists_own_tools() {
        let dispatcher = ToolDispatcher::default();
        let result = dispatcher
            .execute_tool_for_agent(&toolbox(), ToolCall::new(INTROSPECTION_TOOL, serde_json::json!({})), &ctx("scribe"))
            .await
            .unwrap();
        assert!(result.content.contains("(2)"));
        assert!(result.content.contains("## Storage\n- upload_asset"));
        assert!(result.content.contains("## General\n- shout: Uppercase text"));
        assert!(!result.content.contains("- list_available_tools"));
    }

    #[tokio::test]
    async fn test_local_tool_runs() {
        let dispatcher = ToolDispatcher::default();
        let result = dispatcher
            .execute_tool_for_agent(&toolbox(), ToolCall::new("shout", serde_json::json!({"text": "hi"})), &ctx("scribe"))
            .await
            .unwrap();
        assert_eq!(result.content, "HI");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_soft_failure() {
        let dispatcher = ToolDispatcher::default();
        let result = dispatcher
            .execute_tool_for_agent(&toolbox(), ToolCall::new("teleport", serde_json::json!({})), &ctx("scribe"))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("'teleport' not found"));
    }

    #[tokio::test]
    async fn test_failing_local_tool_becomes_error_result() {
        let dispatcher = ToolDispatcher::default();
        let result = dispatcher
            .execute_tool_for_agent(&toolbox(), ToolCall::new("upload_asset", serde_json::json!({})), &ctx("scribe"))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("disk full"));
    }

    #[tokio::test]
    async fn test_mcp_gate_checked_before_toolbox() {
        let dispatcher = ToolDispatcher::new(Some(McpGate::new(Arc::new(Figma), vec!["designer".to_string()])));
        let call = || ToolCall::new("figma_get_file", serde_json::json!({}));

        let allowed = dispatcher
            .execute_tool_for_agent(&Toolbox::new(), call(), &ctx("designer"))
            .await
            .unwrap();
        assert_eq!(allowed.content, "figma_get_file ok");

        let denied = dispatcher
            .execute_tool_for_agent(&Toolbox::new(), call(), &ctx("scribe"))
            .await
            .unwrap();
        assert!(denied.is_error);
        assert!(denied.content.contains("not available to agent 'scribe'"));
    }
}
