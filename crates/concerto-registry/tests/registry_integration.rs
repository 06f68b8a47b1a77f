//! Discovery, permission and graph queries over a small catalogue of agents.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use concerto_registry::{
    AgentDescriptor, BaseAgent, CapabilityRegistry, CostTier, DiscoverOptions, OrchestrationPolicy,
};
use std::collections::BTreeSet;

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// scribe orchestrates and may only call rephraser; rephraser and translator are workers.
fn catalogue() -> CapabilityRegistry {
    let registry = CapabilityRegistry::new();
    registry.register(
        BaseAgent::plain(
            AgentDescriptor::new("scribe")
                .with_capabilities(["writing", "planning"])
                .with_policy(OrchestrationPolicy::orchestrator(["rephraser"]))
                .with_cost_tier(CostTier::High),
        ),
        None,
    );
    registry.register(
        BaseAgent::plain(AgentDescriptor::new("rephraser").with_capabilities(["writing", "x"])),
        None,
    );
    registry.register(
        BaseAgent::plain(
            AgentDescriptor::new("translator")
                .with_capabilities(["language"])
                .with_estimated_duration_ms(1_500),
        ),
        None,
    );
    registry
}

#[test]
fn test_find_by_capabilities() {
    let registry = catalogue();
    assert_eq!(
        registry.find_by_capabilities::<&str>(&[]),
        set(&["rephraser", "scribe", "translator"])
    );
    assert_eq!(registry.find_by_capabilities(&["x"]), set(&["rephraser"]));
    assert_eq!(
        registry.find_by_capabilities(&["writing"]),
        set(&["rephraser", "scribe"])
    );
    assert!(registry.find_by_capabilities(&["writing", "language"]).is_empty());
    assert!(registry.find_by_capabilities(&["writing", "unknown"]).is_empty());
}

#[test]
fn test_can_call_respects_allow_list() {
    let registry = catalogue();
    assert!(registry.can_call("scribe", "rephraser"));
    assert!(!registry.can_call("scribe", "translator"));
    assert!(!registry.can_call("rephraser", "scribe"));
    assert!(!registry.can_call("ghost", "scribe"));
}

#[test]
fn test_agent_graph_edges() {
    let registry = catalogue();
    let graph = registry.agent_graph();
    assert_eq!(graph.len(), 3);
    assert_eq!(graph["scribe"].can_call, set(&["rephraser"]));
    assert!(graph["scribe"].can_be_called_by.is_empty());
    assert!(graph["rephraser"].can_call.is_empty());
    assert_eq!(graph["rephraser"].can_be_called_by, set(&["scribe"]));
    assert!(graph["translator"].can_be_called_by.is_empty());
}

#[test]
fn test_open_delegator_reaches_every_other_type() {
    let registry = catalogue();
    registry.register(
        BaseAgent::plain(AgentDescriptor::new("director").with_policy(OrchestrationPolicy {
            can_delegate: true,
            ..Default::default()
        })),
        None,
    );
    let graph = registry.agent_graph();
    assert_eq!(
        graph["director"].can_call,
        set(&["rephraser", "scribe", "translator"])
    );
    assert_eq!(graph["translator"].can_be_called_by, set(&["director"]));
    assert!(registry.can_call("director", "translator"));
}

#[test]
fn test_discover_filters_are_anded() {
    let registry = catalogue();

    let writers = registry.discover(&DiscoverOptions {
        capabilities: vec!["writing".into()],
        ..Default::default()
    });
    let types: Vec<_> = writers.iter().map(|d| d.agent_type.as_str()).collect();
    assert_eq!(types, vec!["rephraser", "scribe"]);

    let workers = registry.discover(&DiscoverOptions {
        capabilities: vec!["writing".into()],
        include_orchestrators: Some(false),
        ..Default::default()
    });
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].agent_type, "rephraser");

    let excluded = registry.discover(&DiscoverOptions {
        exclude: vec!["scribe".into(), "rephraser".into()],
        include_callable: Some(true),
        ..Default::default()
    });
    assert_eq!(excluded.len(), 1);
    assert_eq!(excluded[0].agent_type, "translator");
}

#[test]
fn test_catalogue_validates() {
    catalogue().validate().unwrap();
}
