use concerto_core::{ConcertoError, ConcertoResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-call record of how deep in a delegation chain we are.
///
/// `path` starts with the root agent and gains one entry per delegation hop.
/// A hop is rejected when it would exceed `max_depth` or revisit an agent
/// already on the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationContext {
    /// The agent that issued the current call.
    pub originating_agent: String,
    /// Number of delegation hops taken so far (root = 0).
    pub depth: u32,
    /// Maximum number of hops allowed below the root.
    pub max_depth: u32,
    /// Identifier of the top-level execution this chain belongs to.
    pub root_execution_id: Uuid,
    /// Ordered agent types visited, root first.
    pub path: Vec<String>,
}

impl DelegationContext {
    /// Start a chain at `agent_type`.
    pub fn root(agent_type: impl Into<String>, root_execution_id: Uuid, max_depth: u32) -> Self {
        let agent_type = agent_type.into();
        Self {
            originating_agent: agent_type.clone(),
            depth: 0,
            max_depth,
            root_execution_id,
            path: vec![agent_type],
        }
    }

    /// The agent currently executing (last entry of the path).
    pub fn current(&self) -> &str {
        self.path
            .last()
            .map(String::as_str)
            .unwrap_or(self.originating_agent.as_str())
    }

    /// Compute the context for delegating from the current agent to `target`.
    pub fn descend(&self, target: &str) -> ConcertoResult<Self> {
        if self.depth + 1 > self.max_depth {
            return Err(ConcertoError::Delegation {
                agent_type: target.to_string(),
                cause: format!(
                    "maximum delegation depth {} exceeded (path: {})",
                    self.max_depth,
                    self.path.join(" -> ")
                ),
            });
        }
        if self.path.iter().any(|visited| visited == target) {
            return Err(ConcertoError::Delegation {
                agent_type: target.to_string(),
                cause: format!(
                    "delegation cycle detected (path: {} -> {target})",
                    self.path.join(" -> ")
                ),
            });
        }

        let mut path = self.path.clone();
        path.push(target.to_string());
        Ok(Self {
            originating_agent: self.current().to_string(),
            depth: self.depth + 1,
            max_depth: self.max_depth,
            root_execution_id: self.root_execution_id,
            path,
        })
    }
}

/// Everything a tool learns about who is calling it.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Agent type that requested the tool.
    pub agent_type: String,
    /// Delegation chain of the caller.
    pub delegation: DelegationContext,
}

impl ToolContext {
    /// Context for a top-level agent with a fresh delegation chain.
    pub fn root(agent_type: impl Into<String>, root_execution_id: Uuid, max_depth: u32) -> Self {
        let agent_type = agent_type.into();
        Self {
            delegation: DelegationContext::root(agent_type.clone(), root_execution_id, max_depth),
            agent_type,
        }
    }
}
