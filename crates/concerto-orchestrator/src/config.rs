use crate::flow::FlowSettings;
use concerto_agent::AgentConfig;
use concerto_core::{ConcertoError, ConcertoResult};
use concerto_registry::{AgentDescriptor, BaseAgent, CapabilityRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// `[flow]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Iteration budget per flow.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Keep iterating until the evaluator concludes.
    #[serde(default)]
    pub autonomous_mode: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            autonomous_mode: false,
        }
    }
}

/// `[delegation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Maximum delegation hops below a flow's root agent.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// `[mcp]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// Agent types allowed to call MCP-hosted tools.
    #[serde(default)]
    pub allowed_agents: Vec<String>,
}

/// One `[[agents]]` entry: descriptor fields inline, runtime config under `config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManifest {
    /// Registry descriptor: type, capabilities, policy, cost.
    #[serde(flatten)]
    pub descriptor: AgentDescriptor,
    /// Runtime configuration. Agents without one cannot be instantiated.
    #[serde(default)]
    pub config: Option<AgentConfig>,
}

/// Engine configuration, usually loaded from `concerto.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Flow defaults.
    #[serde(default)]
    pub flow: FlowConfig,
    /// Delegation limits.
    #[serde(default)]
    pub delegation: DelegationConfig,
    /// Agent type that rephrases raw tool output.
    #[serde(default = "default_rephraser")]
    pub rephraser_agent: String,
    /// MCP access control.
    #[serde(default)]
    pub mcp: McpConfig,
    /// Declared agents, registered in order.
    #[serde(default)]
    pub agents: Vec<AgentManifest>,
}

fn default_max_requests() -> u32 {
    10
}
fn default_max_depth() -> u32 {
    3
}
fn default_rephraser() -> String {
    "rephraser".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flow: FlowConfig::default(),
            delegation: DelegationConfig::default(),
            rephraser_agent: default_rephraser(),
            mcp: McpConfig::default(),
            agents: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ConcertoResult<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| ConcertoError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> ConcertoResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConcertoError::Config(format!("Failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConcertoError::Config(msg) => {
                ConcertoError::Config(format!("{msg} (in '{}')", path.display()))
            }
            other => other,
        })
    }

    /// Checks that do not need a populated registry.
    pub fn validate(&self) -> ConcertoResult<()> {
        if self.flow.max_requests < 1 {
            return Err(ConcertoError::Config("flow.max_requests must be at least 1".into()));
        }
        let mut seen = HashSet::new();
        for manifest in &self.agents {
            let agent_type = manifest.descriptor.agent_type.as_str();
            if agent_type.trim().is_empty() {
                return Err(ConcertoError::Config("agent type must not be empty".into()));
            }
            if !seen.insert(agent_type) {
                return Err(ConcertoError::Config(format!(
                    "agent '{agent_type}' is declared more than once"
                )));
            }
            if let Some(config) = &manifest.config {
                config.validate().map_err(|e| {
                    ConcertoError::Config(format!("agent '{agent_type}': {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// Register every declared agent with no lifecycle customization.
    pub fn register_all(&self, registry: &CapabilityRegistry) {
        for manifest in &self.agents {
            registry.register(
                BaseAgent::plain(manifest.descriptor.clone()),
                manifest.config.clone(),
            );
        }
        info!(agents = self.agents.len(), "Registered configured agents");
    }

    /// Flow controller settings derived from this config.
    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            max_requests: self.flow.max_requests,
            autonomous_mode: self.flow.autonomous_mode,
            max_depth: self.delegation.max_depth,
            rephraser_agent: self.rephraser_agent.clone(),
        }
    }
}
