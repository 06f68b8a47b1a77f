use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Relative price of running an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    /// Cheap, fast agents.
    Low,
    /// The default tier.
    #[default]
    Medium,
    /// Expensive or slow agents.
    High,
}

impl std::fmt::Display for CostTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CostTier::Low => write!(f, "low"),
            CostTier::Medium => write!(f, "medium"),
            CostTier::High => write!(f, "high"),
        }
    }
}

/// Who may call an agent and whom it may call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationPolicy {
    /// Other agents may delegate to this one.
    #[serde(default = "default_true")]
    pub callable: bool,
    /// This agent may delegate at all.
    #[serde(default)]
    pub can_delegate: bool,
    /// Allow-list of delegate types. `None` means any registered type.
    #[serde(default)]
    pub allowed_delegates: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

impl Default for OrchestrationPolicy {
    fn default() -> Self {
        Self {
            callable: true,
            can_delegate: false,
            allowed_delegates: None,
        }
    }
}

impl OrchestrationPolicy {
    /// Policy of an orchestrator restricted to `delegates`.
    pub fn orchestrator<I, S>(delegates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            callable: true,
            can_delegate: true,
            allowed_delegates: Some(delegates.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether `callee` passes this policy. Does not check that `callee` exists.
    pub fn permits(&self, callee: &str) -> bool {
        if !self.can_delegate {
            return false;
        }
        match &self.allowed_delegates {
            Some(allowed) => allowed.iter().any(|a| a == callee),
            None => true,
        }
    }
}

/// Static metadata describing one agent type.
///
/// Immutable once registered. Re-registering the same `agent_type` replaces
/// the whole descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Instance id, generated when absent.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Unique agent type, serialized as `type`.
    #[serde(rename = "type")]
    pub agent_type: String,
    /// Capability tags used for discovery.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Delegation permissions.
    #[serde(default)]
    pub policy: OrchestrationPolicy,
    /// Relative cost of running the agent.
    #[serde(default)]
    pub cost_tier: CostTier,
    /// Rough wall-clock estimate for one `act()` call.
    #[serde(default)]
    pub estimated_duration_ms: Option<u64>,
}

impl AgentDescriptor {
    /// Descriptor with default policy and no capabilities.
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type: agent_type.into(),
            capabilities: BTreeSet::new(),
            policy: OrchestrationPolicy::default(),
            cost_tier: CostTier::default(),
            estimated_duration_ms: None,
        }
    }

    /// Add capability tags.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Set the orchestration policy.
    pub fn with_policy(mut self, policy: OrchestrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the cost tier.
    pub fn with_cost_tier(mut self, tier: CostTier) -> Self {
        self.cost_tier = tier;
        self
    }

    /// Set the duration estimate.
    pub fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = Some(ms);
        self
    }

    /// Whether the agent declares `tag`.
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = OrchestrationPolicy::default();
        assert!(policy.callable);
        assert!(!policy.permits("anyone"));
    }

    #[test]
    fn test_open_policy_permits_everyone() {
        let policy = OrchestrationPolicy {
            can_delegate: true,
            ..Default::default()
        };
        assert!(policy.permits("anyone"));
    }

    #[test]
    fn test_allow_list_policy() {
        let policy = OrchestrationPolicy::orchestrator(["rephraser"]);
        assert!(policy.permits("rephraser"));
        assert!(!policy.permits("translator"));
    }

    #[test]
    fn test_descriptor_from_toml() {
        let descriptor: AgentDescriptor = toml::from_str(
            r#"
            type = "scribe"
            capabilities = ["writing", "summarize"]
            cost_tier = "high"

            [policy]
            can_delegate = true
            allowed_delegates = ["rephraser"]
            "#,
        )
        .unwrap();
        assert_eq!(descriptor.agent_type, "scribe");
        assert!(descriptor.has_capability("writing"));
        assert_eq!(descriptor.cost_tier, CostTier::High);
        assert!(descriptor.policy.callable);
        assert!(descriptor.policy.permits("rephraser"));
    }
}
