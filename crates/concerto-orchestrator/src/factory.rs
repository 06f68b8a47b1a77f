use crate::delegation::{AgentFactory, DelegationTool};
use crate::dispatch::ToolDispatcher;
use concerto_agent::{
    AgentConfig, ConfigurableAgent, ModelInvoker, ObserverChain, ResponseFormatValidator, Toolbox,
    INTROSPECTION_TOOL,
};
use concerto_core::{ConcertoError, ConcertoResult, EventBus};
use concerto_registry::CapabilityRegistry;
use concerto_tools::{LocalToolRegistry, McpGate};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Builds runtimes for registered agent types from their registry entries.
///
/// Every runtime shares the same model invoker, local tool registry, MCP gate
/// and event bus. Delegation tools point back at this factory.
pub struct RegistryAgentFactory {
    registry: Arc<CapabilityRegistry>,
    model: Arc<dyn ModelInvoker>,
    tools: Arc<LocalToolRegistry>,
    mcp: Option<McpGate>,
    events: Arc<dyn EventBus>,
    self_ref: Weak<RegistryAgentFactory>,
}

impl RegistryAgentFactory {
    /// Create a factory. Returned in an `Arc` so delegation tools can refer back to it.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        model: Arc<dyn ModelInvoker>,
        tools: Arc<LocalToolRegistry>,
        mcp: Option<McpGate>,
        events: Arc<dyn EventBus>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry,
            model,
            tools,
            mcp,
            events,
            self_ref: self_ref.clone(),
        })
    }

    /// The registry agents are built from.
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// The MCP gate, when one is configured.
    pub fn mcp(&self) -> Option<&McpGate> {
        self.mcp.as_ref()
    }

    /// Assemble the toolbox declared by `config` for `agent_type`.
    pub fn build_toolbox(&self, agent_type: &str, config: &AgentConfig) -> ConcertoResult<Toolbox> {
        let mut toolbox = Toolbox::new();
        let sources = &config.tools;

        for name in &sources.builtin {
            if name == INTROSPECTION_TOOL {
                toolbox.add_introspection();
            } else {
                return Err(ConcertoError::Validation(format!(
                    "Agent '{agent_type}' references unknown builtin tool '{name}'"
                )));
            }
        }

        for name in &sources.custom {
            let tool = self.tools.get(name).ok_or_else(|| {
                ConcertoError::Validation(format!(
                    "Agent '{agent_type}' references unknown custom tool '{name}'"
                ))
            })?;
            toolbox.add_local(tool.clone());
        }

        if !sources.mcp.is_empty() {
            let gate = self.mcp.as_ref().ok_or_else(|| {
                ConcertoError::Validation(format!(
                    "Agent '{agent_type}' declares MCP tools but no MCP source is configured"
                ))
            })?;
            if !gate.permits(agent_type) {
                return Err(ConcertoError::Validation(format!(
                    "Agent '{agent_type}' declares MCP tools but is not on the MCP allow-list"
                )));
            }
            let hosted = gate.descriptors_for(agent_type);
            for name in &sources.mcp {
                let descriptor = hosted.iter().find(|d| &d.name == name).ok_or_else(|| {
                    ConcertoError::Validation(format!(
                        "Agent '{agent_type}' references unknown MCP tool '{name}'"
                    ))
                })?;
                toolbox.add_mcp(descriptor.clone());
            }
        }

        for target in &sources.agents {
            if let Some(reason) = self.registry.delegation_denial(agent_type, target) {
                return Err(ConcertoError::Validation(reason));
            }
            let descriptor = self
                .registry
                .get(target)
                .map(|a| a.descriptor)
                .ok_or_else(|| {
                    ConcertoError::Validation(format!(
                        "'{agent_type}' delegates to unregistered agent '{target}'"
                    ))
                })?;
            let description = if descriptor.capabilities.is_empty() {
                format!("Delegate a subtask to the '{target}' agent and return its answer.")
            } else {
                let tags: Vec<&str> = descriptor.capabilities.iter().map(String::as_str).collect();
                format!(
                    "Delegate a subtask to the '{target}' agent ({}) and return its answer.",
                    tags.join(", ")
                )
            };
            let factory: Weak<dyn AgentFactory> = self.self_ref.clone();
            toolbox.add_delegation(
                target.as_str(),
                Arc::new(DelegationTool::new(target.as_str(), description, factory)),
            );
        }

        Ok(toolbox)
    }

    /// Check the whole registry: cross-references plus every agent's toolbox.
    pub fn validate(&self) -> ConcertoResult<()> {
        let mut problems = Vec::new();
        if let Err(e) = self.registry.validate() {
            problems.push(e.to_string());
        }
        for agent_type in self.registry.agent_types() {
            if let Some(config) = self.registry.get_config(&agent_type) {
                if let Err(e) = self.build_toolbox(&agent_type, &config) {
                    problems.push(e.to_string());
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConcertoError::Validation(problems.join("; ")))
        }
    }
}

impl AgentFactory for RegistryAgentFactory {
    fn authorize(&self, caller: &str, target: &str) -> ConcertoResult<()> {
        self.registry.authorize_delegation(caller, target)
    }

    fn dispatcher(&self) -> ToolDispatcher {
        ToolDispatcher::new(self.mcp.clone())
    }

    fn create(&self, agent_type: &str) -> ConcertoResult<ConfigurableAgent> {
        let entry = self.registry.entry(agent_type).ok_or_else(|| {
            ConcertoError::Registry(format!("Agent type '{agent_type}' is not registered"))
        })?;
        let config = entry.config.ok_or_else(|| {
            ConcertoError::Registry(format!("Agent type '{agent_type}' has no configuration"))
        })?;

        let toolbox = self.build_toolbox(agent_type, &config)?;
        let mut observer = ObserverChain::new().with(entry.agent.observer);
        if config.validate_response {
            observer.add(Arc::new(ResponseFormatValidator::new(config.response_format)));
        }

        debug!(
            agent_type = %agent_type,
            tools = toolbox.len(),
            "Created agent runtime"
        );
        Ok(ConfigurableAgent::new(
            agent_type,
            config,
            self.model.clone(),
            Arc::new(observer),
            toolbox,
            self.events.clone(),
        ))
    }
}
