//! `concerto`: inspect and validate agent configurations offline.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use concerto_agent::{ModelInvoker, ModelRequest, ModelResponse};
use concerto_core::{ConcertoError, ConcertoResult, NoopEventBus, ToolResult};
use concerto_orchestrator::{EngineConfig, RegistryAgentFactory};
use concerto_registry::{CapabilityRegistry, DiscoverOptions};
use concerto_tools::{LocalToolRegistry, McpGate, McpToolSource, ToolDescriptor};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "concerto", about = "Concerto agent orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "concerto.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the config and validate agent wiring and tool references
    Check,
    /// Print the delegation graph as JSON
    Graph,
    /// Query agents by capability and policy
    Discover {
        /// Required capability (repeatable)
        #[arg(short = 't', long = "capability")]
        capabilities: Vec<String>,
        /// Agent type to leave out (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,
        /// Keep only callable (true) or non-callable (false) agents
        #[arg(long)]
        callable: Option<bool>,
        /// Keep only orchestrators (true) or workers (false)
        #[arg(long)]
        orchestrators: Option<bool>,
    },
}

fn load_registry(path: &Path) -> anyhow::Result<(EngineConfig, CapabilityRegistry)> {
    let config = EngineConfig::load(path)?;
    let registry = CapabilityRegistry::new();
    config.register_all(&registry);
    Ok((config, registry))
}

/// Model stand-in for offline checks. Building runtimes never invokes it.
struct OfflineModel;

#[async_trait]
impl ModelInvoker for OfflineModel {
    async fn invoke(&self, _request: ModelRequest) -> ConcertoResult<ModelResponse> {
        Err(ConcertoError::Model(
            "no model backend is available to the concerto CLI".into(),
        ))
    }
}

/// MCP catalogue made of the tool names agents declare. Servers are not contacted.
struct DeclaredMcpTools {
    descriptors: Vec<ToolDescriptor>,
}

impl DeclaredMcpTools {
    fn from_config(config: &EngineConfig) -> Self {
        let names: BTreeSet<&str> = config
            .agents
            .iter()
            .filter_map(|m| m.config.as_ref())
            .flat_map(|c| c.tools.mcp.iter().map(String::as_str))
            .collect();
        Self {
            descriptors: names
                .into_iter()
                .map(|name| {
                    ToolDescriptor::new(name, "[MCP] declared tool", serde_json::json!({"type": "object"}))
                })
                .collect(),
        }
    }
}

#[async_trait]
impl McpToolSource for DeclaredMcpTools {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.descriptors.clone()
    }

    async fn call_tool(
        &self,
        call_id: &str,
        name: &str,
        _arguments: serde_json::Value,
    ) -> ConcertoResult<ToolResult> {
        Ok(ToolResult::error(
            call_id,
            format!("MCP tool '{name}' cannot be called offline"),
        ))
    }
}

/// The `[mcp]` allow-list in front of the declared catalogue, when one is configured.
fn offline_mcp_gate(config: &EngineConfig) -> Option<McpGate> {
    if config.mcp.allowed_agents.is_empty() {
        return None;
    }
    Some(McpGate::new(
        Arc::new(DeclaredMcpTools::from_config(config)),
        config.mcp.allowed_agents.clone(),
    ))
}

fn run_check(path: &Path) -> anyhow::Result<String> {
    let (config, registry) = load_registry(path)?;
    let registry = Arc::new(registry);
    // Custom tools are compiled into embedding applications; the CLI knows none.
    let factory = RegistryAgentFactory::new(
        registry.clone(),
        Arc::new(OfflineModel),
        Arc::new(LocalToolRegistry::new()),
        offline_mcp_gate(&config),
        Arc::new(NoopEventBus),
    );
    factory.validate()?;
    Ok(format!(
        "{}: {} agents, max_requests={}, autonomous_mode={}, max_depth={}, rephraser={}",
        path.display(),
        registry.len(),
        config.flow.max_requests,
        config.flow.autonomous_mode,
        config.delegation.max_depth,
        config.rephraser_agent
    ))
}

fn run_graph(path: &Path) -> anyhow::Result<String> {
    let (_, registry) = load_registry(path)?;
    Ok(serde_json::to_string_pretty(&registry.agent_graph())?)
}

fn run_discover(path: &Path, options: &DiscoverOptions) -> anyhow::Result<String> {
    let (_, registry) = load_registry(path)?;
    let found = registry.discover(options);
    Ok(serde_json::to_string_pretty(&found)?)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    concerto_core::telemetry::init_tracing(cli.json_logs);
    info!(config = %cli.config.display(), "Loading configuration");

    let output = match cli.command {
        Commands::Check => run_check(&cli.config)?,
        Commands::Graph => run_graph(&cli.config)?,
        Commands::Discover {
            capabilities,
            exclude,
            callable,
            orchestrators,
        } => run_discover(
            &cli.config,
            &DiscoverOptions {
                capabilities,
                exclude,
                include_callable: callable,
                include_orchestrators: orchestrators,
            },
        )?,
    };
    println!("{output}");
    Ok(())
}
