use crate::descriptor::{AgentDescriptor, CostTier};
use concerto_agent::{AgentConfig, LifecycleObserver, NoopObserver};
use concerto_core::{ConcertoError, ConcertoResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A registered agent: its descriptor plus the observer that customizes its lifecycle.
#[derive(Clone)]
pub struct BaseAgent {
    /// Static metadata of the agent.
    pub descriptor: AgentDescriptor,
    /// Lifecycle customization applied to its runtime.
    pub observer: Arc<dyn LifecycleObserver>,
}

impl BaseAgent {
    /// An agent with a custom lifecycle observer.
    pub fn new(descriptor: AgentDescriptor, observer: Arc<dyn LifecycleObserver>) -> Self {
        Self {
            descriptor,
            observer,
        }
    }

    /// An agent with no lifecycle customization.
    pub fn plain(descriptor: AgentDescriptor) -> Self {
        Self::new(descriptor, Arc::new(NoopObserver))
    }

    /// The agent's registered type.
    pub fn agent_type(&self) -> &str {
        &self.descriptor.agent_type
    }
}

impl std::fmt::Debug for BaseAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseAgent")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Summary of a registered agent, derived at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentMetadata {
    /// Registered type.
    pub agent_type: String,
    /// Declared capability tags.
    pub capabilities: BTreeSet<String>,
    /// Relative cost.
    pub cost_tier: CostTier,
    /// Rough duration of one call, if declared.
    pub estimated_duration_ms: Option<u64>,
    /// Other agents may delegate to it.
    pub callable: bool,
    /// It may delegate to others.
    pub can_delegate: bool,
    /// A runtime configuration was registered with it.
    pub has_config: bool,
    /// Agent types this agent exposes as delegation tools (from its config).
    pub delegation_tools: Vec<String>,
}

impl AgentMetadata {
    fn derive(agent: &BaseAgent, config: Option<&AgentConfig>) -> Self {
        let d = &agent.descriptor;
        Self {
            agent_type: d.agent_type.clone(),
            capabilities: d.capabilities.clone(),
            cost_tier: d.cost_tier,
            estimated_duration_ms: d.estimated_duration_ms,
            callable: d.policy.callable,
            can_delegate: d.policy.can_delegate,
            has_config: config.is_some(),
            delegation_tools: config.map(|c| c.tools.agents.clone()).unwrap_or_default(),
        }
    }
}

/// One slot in the registry.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// The registered agent.
    pub agent: BaseAgent,
    /// Runtime configuration, if provided.
    pub config: Option<AgentConfig>,
    /// Metadata derived at registration.
    pub metadata: AgentMetadata,
}

/// Filters for [`CapabilityRegistry::discover`]. All filters are ANDed.
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Required capability tags (all must be present).
    pub capabilities: Vec<String>,
    /// Agent types to leave out.
    pub exclude: Vec<String>,
    /// When set, keep only agents whose `callable` flag equals the value.
    pub include_callable: Option<bool>,
    /// When set, keep only agents whose `can_delegate` flag equals the value.
    pub include_orchestrators: Option<bool>,
}

/// Delegation edges of one agent type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    /// Types this agent may delegate to.
    pub can_call: BTreeSet<String>,
    /// Types that may delegate to this agent.
    pub can_be_called_by: BTreeSet<String>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, RegistryEntry>,
    /// capability tag -> agent types. Derived from `entries`.
    index: HashMap<String, BTreeSet<String>>,
}

impl RegistryState {
    fn rebuild_index(&mut self) {
        let mut index: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (agent_type, entry) in &self.entries {
            for tag in &entry.agent.descriptor.capabilities {
                index
                    .entry(tag.clone())
                    .or_default()
                    .insert(agent_type.clone());
            }
        }
        self.index = index;
    }
}

/// Process-wide catalogue of agent types.
///
/// Read-mostly: lookups take a shared lock, registration takes the write lock
/// and rebuilds the capability index from the full snapshot.
#[derive(Default)]
pub struct CapabilityRegistry {
    state: RwLock<RegistryState>,
}

impl CapabilityRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `agent.descriptor.agent_type`.
    pub fn register(&self, agent: BaseAgent, config: Option<AgentConfig>) {
        let agent_type = agent.agent_type().to_string();
        let metadata = AgentMetadata::derive(&agent, config.as_ref());
        let mut state = self.state.write();
        let replaced = state
            .entries
            .insert(
                agent_type.clone(),
                RegistryEntry {
                    agent,
                    config,
                    metadata,
                },
            )
            .is_some();
        state.rebuild_index();
        info!(
            agent_type = %agent_type,
            replaced,
            total = state.entries.len(),
            "Registered agent"
        );
    }

    /// The registered agent of `agent_type`.
    pub fn get(&self, agent_type: &str) -> Option<BaseAgent> {
        self.state
            .read()
            .entries
            .get(agent_type)
            .map(|e| e.agent.clone())
    }

    /// Runtime configuration of `agent_type`.
    pub fn get_config(&self, agent_type: &str) -> Option<AgentConfig> {
        self.state
            .read()
            .entries
            .get(agent_type)
            .and_then(|e| e.config.clone())
    }

    /// Metadata of `agent_type`.
    pub fn get_metadata(&self, agent_type: &str) -> Option<AgentMetadata> {
        self.state
            .read()
            .entries
            .get(agent_type)
            .map(|e| e.metadata.clone())
    }

    /// The whole registry slot of `agent_type`.
    pub fn entry(&self, agent_type: &str) -> Option<RegistryEntry> {
        self.state.read().entries.get(agent_type).cloned()
    }

    /// Whether `agent_type` is registered.
    pub fn contains(&self, agent_type: &str) -> bool {
        self.state.read().entries.contains_key(agent_type)
    }

    /// All registered types, sorted.
    pub fn agent_types(&self) -> BTreeSet<String> {
        self.state.read().entries.keys().cloned().collect()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Types declaring `tag`; empty for unknown tags.
    pub fn find_by_capability(&self, tag: &str) -> BTreeSet<String> {
        self.state
            .read()
            .index
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Types declaring every tag in `tags`. No tags matches every type.
    pub fn find_by_capabilities<S: AsRef<str>>(&self, tags: &[S]) -> BTreeSet<String> {
        let state = self.state.read();
        Self::intersect(&state, tags)
    }

    fn intersect<S: AsRef<str>>(state: &RegistryState, tags: &[S]) -> BTreeSet<String> {
        let Some((first, rest)) = tags.split_first() else {
            return state.entries.keys().cloned().collect();
        };
        let mut result = state.index.get(first.as_ref()).cloned().unwrap_or_default();
        for tag in rest {
            match state.index.get(tag.as_ref()) {
                Some(types) => result.retain(|t| types.contains(t)),
                None => return BTreeSet::new(),
            }
        }
        result
    }

    /// Descriptors matching every filter in `options`, sorted by type.
    pub fn discover(&self, options: &DiscoverOptions) -> Vec<AgentDescriptor> {
        let state = self.state.read();
        let candidates = Self::intersect(&state, &options.capabilities);
        let found: Vec<AgentDescriptor> = candidates
            .iter()
            .filter(|t| !options.exclude.iter().any(|e| e == *t))
            .filter_map(|t| state.entries.get(t))
            .map(|e| &e.agent.descriptor)
            .filter(|d| {
                options
                    .include_callable
                    .map_or(true, |want| d.policy.callable == want)
            })
            .filter(|d| {
                options
                    .include_orchestrators
                    .map_or(true, |want| d.policy.can_delegate == want)
            })
            .cloned()
            .collect();
        debug!(
            capabilities = ?options.capabilities,
            matched = found.len(),
            "Discovered agents"
        );
        found
    }

    /// Delegation edges for every registered type.
    pub fn agent_graph(&self) -> BTreeMap<String, GraphNode> {
        let state = self.state.read();
        let mut graph: BTreeMap<String, GraphNode> = state
            .entries
            .keys()
            .map(|t| (t.clone(), GraphNode::default()))
            .collect();

        for (caller, entry) in &state.entries {
            let policy = &entry.agent.descriptor.policy;
            if !policy.can_delegate {
                continue;
            }
            let callees: BTreeSet<String> = match &policy.allowed_delegates {
                Some(allowed) => allowed.iter().cloned().collect(),
                None => state
                    .entries
                    .keys()
                    .filter(|t| *t != caller)
                    .cloned()
                    .collect(),
            };
            for callee in &callees {
                if let Some(node) = graph.get_mut(callee) {
                    node.can_be_called_by.insert(caller.clone());
                }
            }
            if let Some(node) = graph.get_mut(caller) {
                node.can_call = callees;
            }
        }
        graph
    }

    /// Whether `caller`'s policy allows delegating to `callee`.
    ///
    /// Looks at the caller's policy only; see [`authorize_delegation`](Self::authorize_delegation)
    /// for the full check applied at run time.
    pub fn can_call(&self, caller: &str, callee: &str) -> bool {
        self.state
            .read()
            .entries
            .get(caller)
            .is_some_and(|e| e.agent.descriptor.policy.permits(callee))
    }

    /// Reason `caller` may not delegate to `callee`, if any.
    ///
    /// Both types must be registered, `callee` must be callable and the
    /// caller's policy must permit it.
    pub fn delegation_denial(&self, caller: &str, callee: &str) -> Option<String> {
        Self::denial(&self.state.read(), caller, callee)
    }

    /// Fails with a [`ConcertoError::Registry`] when `caller` may not delegate to `callee`.
    pub fn authorize_delegation(&self, caller: &str, callee: &str) -> ConcertoResult<()> {
        match self.delegation_denial(caller, callee) {
            Some(reason) => {
                warn!(caller = %caller, callee = %callee, reason = %reason, "Delegation denied");
                Err(ConcertoError::Registry(reason))
            }
            None => Ok(()),
        }
    }

    fn denial(state: &RegistryState, caller: &str, callee: &str) -> Option<String> {
        let Some(entry) = state.entries.get(caller) else {
            return Some(format!("Agent type '{caller}' is not registered"));
        };
        match state.entries.get(callee) {
            None => Some(format!(
                "'{caller}' delegates to unregistered agent '{callee}'"
            )),
            Some(target) if !target.agent.descriptor.policy.callable => Some(format!(
                "'{caller}' delegates to non-callable agent '{callee}'"
            )),
            Some(_) if !entry.agent.descriptor.policy.permits(callee) => Some(format!(
                "'{caller}' is not permitted to delegate to '{callee}'"
            )),
            Some(_) => None,
        }
    }

    /// Drop every entry and the capability index.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.rebuild_index();
        info!("Cleared agent registry");
    }

    /// Check cross-references between registered agents.
    ///
    /// Reports allow-lists naming unregistered types, delegation tools targeting
    /// unregistered, non-callable or forbidden types, and invalid agent configs.
    pub fn validate(&self) -> ConcertoResult<()> {
        let state = self.state.read();
        let mut problems = Vec::new();

        let mut types: Vec<&String> = state.entries.keys().collect();
        types.sort();
        for agent_type in types {
            let Some(entry) = state.entries.get(agent_type) else {
                continue;
            };
            let policy = &entry.agent.descriptor.policy;
            for delegate in policy.allowed_delegates.iter().flatten() {
                if !state.entries.contains_key(delegate) {
                    problems.push(format!(
                        "'{agent_type}' allows unregistered delegate '{delegate}'"
                    ));
                }
            }
            let Some(config) = &entry.config else {
                continue;
            };
            if let Err(e) = config.validate() {
                problems.push(format!("'{agent_type}': {e}"));
            }
            problems.extend(
                config
                    .tools
                    .agents
                    .iter()
                    .filter_map(|target| Self::denial(&state, agent_type, target)),
            );
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConcertoError::Validation(problems.join("; ")))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::descriptor::OrchestrationPolicy;

    fn agent(agent_type: &str, tags: &[&str]) -> BaseAgent {
        BaseAgent::plain(AgentDescriptor::new(agent_type).with_capabilities(tags.iter().copied()))
    }

    #[test]
    fn test_lookups_on_miss_return_none() {
        let registry = CapabilityRegistry::new();
        assert!(registry.get("ghost").is_none());
        assert!(registry.get_config("ghost").is_none());
        assert!(registry.get_metadata("ghost").is_none());
        assert!(registry.find_by_capability("nothing").is_empty());
    }

    #[test]
    fn test_reregistration_replaces_capabilities() {
        let registry = CapabilityRegistry::new();
        registry.register(agent("a", &["x", "y"]), None);
        registry.register(agent("a", &["z"]), None);
        assert!(registry.find_by_capability("x").is_empty());
        assert_eq!(registry.find_by_capability("z").len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_metadata_derived_from_config() {
        let registry = CapabilityRegistry::new();
        let mut config = AgentConfig::new("x");
        config.tools.agents = vec!["b".into()];
        registry.register(agent("a", &["x"]), Some(config));
        let metadata = registry.get_metadata("a").unwrap();
        assert!(metadata.has_config);
        assert_eq!(metadata.delegation_tools, vec!["b"]);
    }

    #[test]
    fn test_clear_empties_index() {
        let registry = CapabilityRegistry::new();
        registry.register(agent("a", &["x"]), None);
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.find_by_capability("x").is_empty());
        assert!(registry.find_by_capabilities::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_validate_flags_dangling_references() {
        let registry = CapabilityRegistry::new();
        let mut config = AgentConfig::new("x");
        config.tools.agents = vec!["ghost".into()];
        registry.register(
            BaseAgent::plain(
                AgentDescriptor::new("a").with_policy(OrchestrationPolicy::orchestrator(["phantom"])),
            ),
            Some(config),
        );
        let err = registry.validate().unwrap_err().to_string();
        assert!(err.contains("unregistered delegate 'phantom'"), "{err}");
        assert!(err.contains("unregistered agent 'ghost'"), "{err}");
    }

    #[test]
    fn test_authorize_delegation_checks_callee_and_policy() {
        let registry = CapabilityRegistry::new();
        registry.register(
            BaseAgent::plain(AgentDescriptor::new("c").with_policy(OrchestrationPolicy {
                callable: false,
                ..Default::default()
            })),
            None,
        );
        registry.register(agent("b", &[]), None);
        registry.register(agent("a", &[]), None);
        registry.register(
            BaseAgent::plain(
                AgentDescriptor::new("lead").with_policy(OrchestrationPolicy::orchestrator(["b", "c"])),
            ),
            None,
        );

        let err = registry.authorize_delegation("a", "b").unwrap_err();
        assert!(matches!(err, ConcertoError::Registry(_)));
        assert!(err.to_string().contains("'a' is not permitted to delegate to 'b'"));
        assert!(registry
            .delegation_denial("lead", "c")
            .unwrap()
            .contains("non-callable agent 'c'"));
        assert!(registry
            .delegation_denial("lead", "ghost")
            .unwrap()
            .contains("unregistered agent 'ghost'"));
        assert!(registry.authorize_delegation("lead", "b").is_ok());
    }

    #[test]
    fn test_validate_flags_forbidden_delegation_tool() {
        let registry = CapabilityRegistry::new();
        registry.register(agent("b", &[]), None);
        let mut config = AgentConfig::new("x");
        config.tools.agents = vec!["b".into()];
        registry.register(agent("a", &[]), Some(config));
        let err = registry.validate().unwrap_err().to_string();
        assert!(err.contains("'a' is not permitted to delegate to 'b'"), "{err}");
    }
}
