//! Exposes registered agents as callable `delegate_to_<type>` tools.

use crate::dispatch::ToolDispatcher;
use async_trait::async_trait;
use concerto_agent::{AgentInput, ConfigurableAgent, TraceContext};
use concerto_core::{ConcertoError, ConcertoResult, Message, ToolCall, ToolResult};
use concerto_tools::{Tool, ToolContext, ToolDescriptor};
use serde::Deserialize;
use std::sync::{Arc, Weak};
use tracing::info;
use uuid::Uuid;

/// Prefix of every delegation tool name.
pub const DELEGATION_PREFIX: &str = "delegate_to_";

/// Builds a fresh runtime for an agent type.
pub trait AgentFactory: Send + Sync {
    /// Instantiate a runtime for `agent_type`.
    fn create(&self, agent_type: &str) -> ConcertoResult<ConfigurableAgent>;

    /// Fail when `caller` may not delegate to `target`.
    fn authorize(&self, caller: &str, target: &str) -> ConcertoResult<()>;

    /// Dispatcher used to run the tool calls a delegate makes.
    fn dispatcher(&self) -> ToolDispatcher {
        ToolDispatcher::default()
    }
}

/// Name of the delegation tool targeting `agent_type`.
pub fn delegation_tool_name(agent_type: &str) -> String {
    format!("{DELEGATION_PREFIX}{agent_type}")
}

/// Argument schema shared by all delegation tools.
pub fn delegation_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "task": {
                "type": "string",
                "description": "The subtask the delegate should complete."
            },
            "context": {
                "type": "object",
                "description": "Optional structured context the delegate needs."
            },
            "reasoning": {
                "type": "string",
                "description": "Why this agent is the right one for the subtask."
            }
        },
        "required": ["task", "reasoning"]
    })
}

#[derive(Debug, Deserialize)]
struct DelegationArgs {
    task: String,
    #[serde(default)]
    context: Option<serde_json::Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl DelegationArgs {
    /// The single user turn the delegate sees. Parent history is never forwarded.
    fn into_turn(self) -> String {
        match self.context {
            Some(context) if !context.is_null() => {
                let rendered =
                    serde_json::to_string_pretty(&context).unwrap_or_else(|_| context.to_string());
                format!("{}\n\nContext:\n{rendered}", self.task)
            }
            _ => self.task,
        }
    }
}

/// A tool whose execution runs another agent's `act()` once.
///
/// Holds the factory weakly: factories own the toolboxes that contain these
/// tools.
pub struct DelegationTool {
    descriptor: ToolDescriptor,
    target: String,
    factory: Weak<dyn AgentFactory>,
}

impl DelegationTool {
    /// Delegation tool for `target`, resolving agents through `factory`.
    pub fn new(
        target: impl Into<String>,
        description: impl Into<String>,
        factory: Weak<dyn AgentFactory>,
    ) -> Self {
        let target = target.into();
        Self {
            descriptor: ToolDescriptor::new(
                delegation_tool_name(&target),
                description,
                delegation_schema(),
            ),
            target,
            factory,
        }
    }

    /// Agent type this tool delegates to.
    pub fn target(&self) -> &str {
        &self.target
    }

    fn failure(&self, cause: impl std::fmt::Display) -> ConcertoError {
        ConcertoError::Delegation {
            agent_type: self.target.clone(),
            cause: cause.to_string(),
        }
    }
}

#[async_trait]
impl Tool for DelegationTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall, ctx: &ToolContext) -> ConcertoResult<ToolResult> {
        let args: DelegationArgs = serde_json::from_value(call.arguments).map_err(|e| {
            ConcertoError::Tool(format!(
                "Invalid arguments for '{}': {e}",
                self.descriptor.name
            ))
        })?;
        let child = ctx.delegation.descend(&self.target)?;

        let factory = self
            .factory
            .upgrade()
            .ok_or_else(|| self.failure("agent factory is no longer available"))?;
        factory
            .authorize(&ctx.agent_type, &self.target)
            .map_err(|e| self.failure(e))?;
        let agent = factory.create(&self.target).map_err(|e| self.failure(e))?;

        info!(
            from = %ctx.agent_type,
            to = %self.target,
            depth = child.depth,
            reasoning = args.reasoning.as_deref().unwrap_or(""),
            "Delegating task"
        );

        let conversation_id = Uuid::new_v4();
        let input = AgentInput::new(
            conversation_id,
            vec![Message::user(args.into_turn(), conversation_id)],
            TraceContext::new(self.target.as_str()).with_depth(child.depth),
        );
        let mut response = agent.act(input).await.map_err(|e| self.failure(e))?.response;
        if response.tool_calls.is_empty() {
            return Ok(ToolResult::success(call.id, response.into_plain_string()));
        }

        // The delegate's own tool calls run one hop further down the chain.
        let child_ctx = ToolContext {
            agent_type: self.target.clone(),
            delegation: child,
        };
        let dispatcher = factory.dispatcher();
        let mut sections: Vec<String> = response.content_text().map(str::to_string).into_iter().collect();
        for tool_call in std::mem::take(&mut response.tool_calls) {
            let name = tool_call.name.clone();
            let result = dispatcher
                .execute_tool_for_agent(agent.toolbox(), tool_call, &child_ctx)
                .await
                .map_err(|e| match e {
                    nested @ ConcertoError::Delegation { .. } => nested,
                    other => self.failure(other),
                })?;
            sections.push(format!("[{name}] {}", result.content));
        }
        Ok(ToolResult::success(call.id, sections.join("\n\n")))
    }
}

/// Build the delegation tool for `target` with a default description.
pub fn build_delegation_tool(target: &str, factory: Weak<dyn AgentFactory>) -> Arc<dyn Tool> {
    Arc::new(DelegationTool::new(
        target,
        format!("Delegate a subtask to the '{target}' agent and return its answer."),
        factory,
    ))
}
