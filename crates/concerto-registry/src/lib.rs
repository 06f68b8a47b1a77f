//! Capability registry for Concerto agents.
//!
//! The [`CapabilityRegistry`] maps agent types to their [`AgentDescriptor`],
//! optional [`concerto_agent::AgentConfig`] and derived [`AgentMetadata`]. It
//! answers capability discovery queries and delegation permission checks, and
//! renders the delegation graph.

/// Agent descriptors and orchestration policies.
pub mod descriptor;
/// The capability registry.
pub mod registry;

pub use descriptor::{AgentDescriptor, CostTier, OrchestrationPolicy};
pub use registry::{
    AgentMetadata, BaseAgent, CapabilityRegistry, DiscoverOptions, GraphNode, RegistryEntry,
};
