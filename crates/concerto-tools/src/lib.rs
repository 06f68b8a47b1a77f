//! Tools callable by Concerto agents.
//!
//! # Main types
//!
//! - [`Tool`]: Trait implemented by every locally executable tool.
//! - [`ToolDescriptor`]: Name, description and JSON schema advertised to the model.
//! - [`LocalToolRegistry`]: Name-keyed registry of local tools.
//! - [`McpGate`]: Agent-type allow-list in front of an [`McpToolSource`].
//! - [`DelegationContext`]: Depth and path bookkeeping for nested delegation.

/// Delegation depth and cycle bookkeeping.
pub mod context;
/// Externally hosted (MCP) tools.
pub mod mcp;
/// Local tool registry.
pub mod registry;
/// Tool trait and descriptor.
pub mod tool;

pub use context::{DelegationContext, ToolContext};
pub use mcp::{McpGate, McpToolSource};
pub use registry::{LocalToolRegistry, ToolRegistry};
pub use tool::{Tool, ToolDescriptor};
