//! Orchestration layer of the Concerto engine.
//!
//! Ties the capability registry and the configurable agent runtime together:
//!
//! - [`RegistryAgentFactory`] builds runtimes (and their toolboxes) for registered agent types.
//! - [`DelegationTool`] exposes an agent as a `delegate_to_<type>` tool.
//! - [`ToolDispatcher`] resolves tool calls: introspection, MCP, then local/delegation tools.
//! - [`FlowController`] runs the autonomous think → act → evaluate loop.
//! - [`EngineConfig`] loads all of the above from TOML.

/// Engine configuration loaded from TOML.
pub mod config;
/// Agents exposed as `delegate_to_<type>` tools.
pub mod delegation;
/// Tool call resolution and introspection.
pub mod dispatch;
/// Stop/continue decisions for autonomous flows.
pub mod evaluator;
/// Runtime construction from registry entries.
pub mod factory;
/// The autonomous flow controller.
pub mod flow;
/// Conversation and execution persistence.
pub mod store;

pub use config::{AgentManifest, DelegationConfig, EngineConfig, FlowConfig, McpConfig};
pub use delegation::{
    build_delegation_tool, delegation_schema, delegation_tool_name, AgentFactory, DelegationTool,
    DELEGATION_PREFIX,
};
pub use dispatch::{describe_tools, ToolDispatcher};
pub use evaluator::{AgentEvaluator, Evaluation, EvaluationRequest, Evaluator};
pub use factory::RegistryAgentFactory;
pub use flow::{
    FlowController, FlowOutcome, FlowRequest, FlowSettings, FlowStepResult, FlowTermination,
    IterationScope, StreamState,
};
pub use store::{
    ConversationStore, ExecutionRecord, ExecutionStatus, ExecutionStore, InMemoryConversationStore,
    InMemoryExecutionStore, StepRecord, StepType,
};
