//! The configurable agent runtime.
//!
//! A [`ConfigurableAgent`] turns a static [`AgentConfig`] plus a
//! [`LifecycleObserver`] into a callable unit whose `act()` runs one model
//! invocation inside a bounded retry loop, with optional response validation
//! and corrective re-prompting.

/// Agent behaviour policy loaded from configuration.
pub mod config;
/// Lifecycle observers and response validation.
pub mod lifecycle;
/// The model collaborator and its request/response types.
pub mod llm;
/// The `act()` pipeline.
pub mod runtime;
/// Per-agent tool dispatch tables.
pub mod toolbox;

pub use config::{AgentConfig, HookStages, PromptTemplates, ResponseFormat, RetryPolicy, ToolSources};
pub use lifecycle::{
    strip_fence, AgentInput, LifecycleObserver, NoopObserver, ObserverChain,
    ResponseFormatValidator, ValidationReport,
};
pub use llm::{ModelInvoker, ModelRequest, ModelResponse, TraceContext};
pub use runtime::{AgentOutcome, ConfigurableAgent};
pub use toolbox::{ToolRoute, Toolbox, INTROSPECTION_TOOL};
