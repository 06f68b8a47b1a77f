use concerto_tools::{Tool, ToolDescriptor};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the reserved tool that lists an agent's tools.
pub const INTROSPECTION_TOOL: &str = "list_available_tools";

/// How a tool name resolves for one agent.
#[derive(Clone)]
pub enum ToolRoute {
    /// The reserved [`INTROSPECTION_TOOL`].
    Introspection,
    /// Hosted on an MCP server, reached through the MCP gate.
    Mcp,
    /// Executed in-process.
    Local(Arc<dyn Tool>),
    /// Invokes another registered agent.
    Delegation {
        /// Agent type the tool delegates to.
        target: String,
        /// Executor built by the delegation tool builder.
        tool: Arc<dyn Tool>,
    },
}

impl std::fmt::Debug for ToolRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolRoute::Introspection => write!(f, "Introspection"),
            ToolRoute::Mcp => write!(f, "Mcp"),
            ToolRoute::Local(tool) => write!(f, "Local({})", tool.descriptor().name),
            ToolRoute::Delegation { target, .. } => write!(f, "Delegation({target})"),
        }
    }
}

/// The static tool set of one agent: what the model is told about, and how
/// each advertised name is dispatched. Built once, immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct Toolbox {
    descriptors: Vec<ToolDescriptor>,
    routes: HashMap<String, ToolRoute>,
}

impl Toolbox {
    /// An empty toolbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise the introspection tool.
    pub fn add_introspection(&mut self) {
        let descriptor = ToolDescriptor::new(
            INTROSPECTION_TOOL,
            "List every tool available to you, grouped by category.",
            serde_json::json!({"type": "object", "properties": {}}),
        );
        self.insert(descriptor, ToolRoute::Introspection);
    }

    /// Advertise a tool hosted on an MCP server.
    pub fn add_mcp(&mut self, descriptor: ToolDescriptor) {
        self.insert(descriptor, ToolRoute::Mcp);
    }

    /// Advertise an in-process tool.
    pub fn add_local(&mut self, tool: Arc<dyn Tool>) {
        let descriptor = tool.descriptor().clone();
        self.insert(descriptor, ToolRoute::Local(tool));
    }

    /// Advertise a delegation tool targeting `target`.
    pub fn add_delegation(&mut self, target: impl Into<String>, tool: Arc<dyn Tool>) {
        let descriptor = tool.descriptor().clone();
        self.insert(
            descriptor,
            ToolRoute::Delegation {
                target: target.into(),
                tool,
            },
        );
    }

    fn insert(&mut self, descriptor: ToolDescriptor, route: ToolRoute) {
        // Later additions replace earlier ones with the same name.
        self.descriptors.retain(|d| d.name != descriptor.name);
        self.routes.insert(descriptor.name.clone(), route);
        self.descriptors.push(descriptor);
    }

    /// Descriptors in the order they were added.
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Route for `name`, if the agent has such a tool.
    pub fn route(&self, name: &str) -> Option<&ToolRoute> {
        self.routes.get(name)
    }

    /// Tool names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    /// Agent types reachable through delegation tools.
    pub fn delegation_targets(&self) -> Vec<&str> {
        self.descriptors
            .iter()
            .filter_map(|d| match self.routes.get(&d.name) {
                Some(ToolRoute::Delegation { target, .. }) => Some(target.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True when the agent has no tools.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_follow_descriptors() {
        let mut toolbox = Toolbox::new();
        toolbox.add_introspection();
        toolbox.add_mcp(ToolDescriptor::new("figma_get_file", "x", serde_json::json!({})));
        assert_eq!(toolbox.len(), 2);
        assert!(matches!(toolbox.route(INTROSPECTION_TOOL), Some(ToolRoute::Introspection)));
        assert!(matches!(toolbox.route("figma_get_file"), Some(ToolRoute::Mcp)));
        assert!(toolbox.route("unknown").is_none());
        assert!(toolbox.delegation_targets().is_empty());
    }

    #[test]
    fn test_duplicate_name_replaced() {
        let mut toolbox = Toolbox::new();
        toolbox.add_mcp(ToolDescriptor::new("dup", "first", serde_json::json!({})));
        toolbox.add_mcp(ToolDescriptor::new("dup", "second", serde_json::json!({})));
        assert_eq!(toolbox.len(), 1);
        assert_eq!(toolbox.descriptors()[0].description, "second");
    }
}
