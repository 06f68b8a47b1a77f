use concerto_core::{ConcertoError, ConcertoResult};
use serde::{Deserialize, Serialize};

/// Expected shape of an agent's free-text response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// A JSON document.
    Json,
    /// Plain prose.
    #[default]
    Text,
    /// A JSON object with named fields.
    Structured,
}

/// Prompt templates used by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplates {
    /// Always sent first.
    pub system: String,
    /// Sent as a corrective user turn after a failed validation.
    /// `{errors}` is replaced with the JSON-serialized validation errors.
    #[serde(default)]
    pub error_correction: Option<String>,
    /// Used by the flow controller when the model returns nothing usable.
    #[serde(default)]
    pub fallback: Option<String>,
}

/// Where an agent's tools come from. Each list holds tool (or agent) names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSources {
    /// Tools shipped with the engine (e.g. `list_available_tools`).
    #[serde(default)]
    pub builtin: Vec<String>,
    /// Application tools from the local tool registry.
    #[serde(default)]
    pub custom: Vec<String>,
    /// Tools hosted on MCP servers.
    #[serde(default)]
    pub mcp: Vec<String>,
    /// Agent types exposed as `delegate_to_<type>` tools.
    #[serde(default)]
    pub agents: Vec<String>,
}

/// Which lifecycle stages the runtime calls on the agent's observer.
///
/// Observers implement every stage with a no-op default, so enabling a stage
/// the observer does not override is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookStages {
    /// Run `before_act` once per call.
    pub before_act: bool,
    /// Run `after_response` on every raw model response.
    pub after_response: bool,
    /// Run `on_error` when the model invocation fails.
    pub on_error: bool,
    /// Run `validate` (also requires [`AgentConfig::validate_response`]).
    pub validate_response: bool,
    /// Run `transform_input` once per call.
    pub transform_input: bool,
    /// Run `transform_output` before returning.
    pub transform_output: bool,
}

impl Default for HookStages {
    fn default() -> Self {
        Self {
            before_act: true,
            after_response: true,
            on_error: true,
            validate_response: true,
            transform_input: true,
            transform_output: true,
        }
    }
}

/// Delay between attempts. Retries are attempt-counted; the default adds no delay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay in milliseconds for exponential backoff (0 disables sleeping).
    #[serde(default)]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds.
    #[serde(default)]
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        delay.min(self.backoff_max_ms)
    }
}

/// Behaviour policy for one agent. Read-only once the agent is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of model invocations per `act()` call (at least 1).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How replies are expected to be shaped.
    #[serde(default)]
    pub response_format: ResponseFormat,
    /// Check each reply against `response_format` and re-prompt on failure.
    #[serde(default)]
    pub validate_response: bool,
    /// Event names published on the event bus after each successful attempt.
    #[serde(default)]
    pub emit_events: Vec<String>,
    /// System, error-correction and fallback prompt templates.
    pub prompts: PromptTemplates,
    /// Where the agent's tools come from.
    #[serde(default)]
    pub tools: ToolSources,
    /// Which lifecycle stages are invoked.
    #[serde(default)]
    pub hooks: HookStages,
    /// Pause between failed attempts.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_retries() -> u32 {
    3
}

impl AgentConfig {
    /// A config with the given system prompt and defaults everywhere else.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            max_retries: default_max_retries(),
            response_format: ResponseFormat::default(),
            validate_response: false,
            emit_events: Vec::new(),
            prompts: PromptTemplates {
                system: system_prompt.into(),
                error_correction: None,
                fallback: None,
            },
            tools: ToolSources::default(),
            hooks: HookStages::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Reject configurations the runtime cannot honour.
    pub fn validate(&self) -> ConcertoResult<()> {
        if self.max_retries < 1 {
            return Err(ConcertoError::Config("max_retries must be at least 1".into()));
        }
        if self.emit_events.iter().any(|e| e.trim().is_empty()) {
            return Err(ConcertoError::Config("emit_events contains an empty event name".into()));
        }
        if self.retry.backoff_base_ms > 0 && self.retry.backoff_max_ms < self.retry.backoff_base_ms {
            return Err(ConcertoError::Config(
                "retry.backoff_max_ms must be >= retry.backoff_base_ms".into(),
            ));
        }
        Ok(())
    }
}
