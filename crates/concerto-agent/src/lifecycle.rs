//! Lifecycle observers: the per-stage extension points of `act()`.

use crate::config::ResponseFormat;
use crate::llm::{ModelResponse, TraceContext};
use async_trait::async_trait;
use concerto_core::{ConcertoError, ConcertoResult, Message};
use concerto_tools::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Input to a single `act()` call.
#[derive(Debug, Clone)]
pub struct AgentInput {
    /// Conversation the input belongs to.
    pub conversation_id: Uuid,
    /// Conversation history, oldest first. System prompts are added by the runtime.
    pub messages: Vec<Message>,
    /// Overrides the agent's own tool set when present.
    pub tools: Option<Vec<ToolDescriptor>>,
    /// Trace carried into every model invocation.
    pub trace: TraceContext,
}

impl AgentInput {
    /// Input over `messages` using the agent's own tools.
    pub fn new(conversation_id: Uuid, messages: Vec<Message>, trace: TraceContext) -> Self {
        Self {
            conversation_id,
            messages,
            tools: None,
            trace,
        }
    }

    /// Offer `tools` to the model instead of the agent's toolbox.
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Compact JSON summary used in event payloads.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "conversation_id": self.conversation_id,
            "message_count": self.messages.len(),
            "last_message": self.messages.last().map(|m| m.content.clone()),
        })
    }
}

/// Outcome of validating one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the response passed.
    pub valid: bool,
    /// Human-readable problems, fed back to the model on retry.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// A passing report.
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// A failing report carrying `errors`.
    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }

    fn merge(self, other: ValidationReport) -> Self {
        let mut errors = self.errors;
        errors.extend(other.errors);
        Self {
            valid: self.valid && other.valid,
            errors,
        }
    }
}

/// Stage callbacks around one `act()` call. Every stage defaults to a no-op.
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    /// Rewrite the input before anything else happens.
    async fn transform_input(&self, input: AgentInput) -> ConcertoResult<AgentInput> {
        Ok(input)
    }

    /// Last chance to adjust the input (e.g. load auxiliary tools) before the retry loop.
    async fn before_act(&self, input: AgentInput) -> ConcertoResult<AgentInput> {
        Ok(input)
    }

    /// Inspect or rewrite each raw model response.
    async fn after_response(
        &self,
        response: ModelResponse,
        _input: &AgentInput,
    ) -> ConcertoResult<ModelResponse> {
        Ok(response)
    }

    /// `None` means this observer has no opinion on validity.
    async fn validate(&self, _response: &ModelResponse) -> Option<ValidationReport> {
        None
    }

    /// Return a response to absorb a model failure; `None` lets the retry loop proceed.
    async fn on_error(&self, _error: &ConcertoError, _attempt: u32) -> Option<ModelResponse> {
        None
    }

    /// Rewrite the final response before it is returned.
    async fn transform_output(&self, response: ModelResponse) -> ConcertoResult<ModelResponse> {
        Ok(response)
    }
}

/// Observer with no behaviour.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait]
impl LifecycleObserver for NoopObserver {}

/// Composite observer running its members in insertion order.
///
/// Transform stages are piped through every member, validation reports are
/// merged, and the first member that handles an error wins.
#[derive(Default, Clone)]
pub struct ObserverChain {
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl ObserverChain {
    /// An empty chain; every stage is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer. Observers run in insertion order.
    pub fn add(&mut self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.push(observer);
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.add(observer);
        self
    }

    /// Number of observers in the chain.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// True when the chain has no observers.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[async_trait]
impl LifecycleObserver for ObserverChain {
    async fn transform_input(&self, mut input: AgentInput) -> ConcertoResult<AgentInput> {
        for observer in &self.observers {
            input = observer.transform_input(input).await?;
        }
        Ok(input)
    }

    async fn before_act(&self, mut input: AgentInput) -> ConcertoResult<AgentInput> {
        for observer in &self.observers {
            input = observer.before_act(input).await?;
        }
        Ok(input)
    }

    async fn after_response(
        &self,
        mut response: ModelResponse,
        input: &AgentInput,
    ) -> ConcertoResult<ModelResponse> {
        for observer in &self.observers {
            response = observer.after_response(response, input).await?;
        }
        Ok(response)
    }

    async fn validate(&self, response: &ModelResponse) -> Option<ValidationReport> {
        let mut merged: Option<ValidationReport> = None;
        for observer in &self.observers {
            if let Some(report) = observer.validate(response).await {
                merged = Some(match merged {
                    Some(acc) => acc.merge(report),
                    None => report,
                });
            }
        }
        merged
    }

    async fn on_error(&self, error: &ConcertoError, attempt: u32) -> Option<ModelResponse> {
        for observer in &self.observers {
            if let Some(handled) = observer.on_error(error, attempt).await {
                return Some(handled);
            }
        }
        None
    }

    async fn transform_output(&self, mut response: ModelResponse) -> ConcertoResult<ModelResponse> {
        for observer in &self.observers {
            response = observer.transform_output(response).await?;
        }
        Ok(response)
    }
}

/// Validates free-text content against the agent's declared [`ResponseFormat`].
///
/// Responses that only carry tool calls are always valid.
#[derive(Debug, Clone, Copy)]
pub struct ResponseFormatValidator {
    format: ResponseFormat,
}

impl ResponseFormatValidator {
    /// Validator for `format`.
    pub fn new(format: ResponseFormat) -> Self {
        Self { format }
    }
}

#[async_trait]
impl LifecycleObserver for ResponseFormatValidator {
    async fn validate(&self, response: &ModelResponse) -> Option<ValidationReport> {
        let Some(content) = response.content_text() else {
            return Some(ValidationReport::ok());
        };
        let report = match self.format {
            ResponseFormat::Text => ValidationReport::ok(),
            ResponseFormat::Json => match serde_json::from_str::<serde_json::Value>(strip_fence(content)) {
                Ok(_) => ValidationReport::ok(),
                Err(e) => ValidationReport::failed(vec![format!("response is not valid JSON: {e}")]),
            },
            ResponseFormat::Structured => {
                match serde_json::from_str::<serde_json::Value>(strip_fence(content)) {
                    Ok(serde_json::Value::Object(_)) => ValidationReport::ok(),
                    Ok(_) => ValidationReport::failed(vec!["response must be a JSON object".into()]),
                    Err(e) => ValidationReport::failed(vec![format!("response is not valid JSON: {e}")]),
                }
            }
        };
        Some(report)
    }
}

/// Strip a surrounding Markdown code fence, tagged `json` or bare, from a model reply.
pub fn strip_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl LifecycleObserver for Upper {
        async fn transform_output(&self, response: ModelResponse) -> ConcertoResult<ModelResponse> {
            Ok(ModelResponse::text(response.content.unwrap_or_default().to_uppercase()))
        }
    }

    struct Suffix(&'static str);

    #[async_trait]
    impl LifecycleObserver for Suffix {
        async fn transform_output(&self, response: ModelResponse) -> ConcertoResult<ModelResponse> {
            Ok(ModelResponse::text(format!("{}{}", response.content.unwrap_or_default(), self.0)))
        }

        async fn validate(&self, _response: &ModelResponse) -> Option<ValidationReport> {
            Some(ValidationReport::failed(vec![format!("missing {}", self.0)]))
        }
    }

    #[tokio::test]
    async fn test_chain_pipes_transforms_in_order() {
        let chain = ObserverChain::new()
            .with(Arc::new(Upper))
            .with(Arc::new(Suffix("!")));
        let out = chain.transform_output(ModelResponse::text("done")).await.unwrap();
        assert_eq!(out.content.as_deref(), Some("DONE!"));
    }

    #[tokio::test]
    async fn test_chain_merges_validation() {
        let chain = ObserverChain::new()
            .with(Arc::new(NoopObserver))
            .with(Arc::new(Suffix("a")))
            .with(Arc::new(Suffix("b")));
        let report = chain.validate(&ModelResponse::text("x")).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["missing a", "missing b"]);
    }

    #[tokio::test]
    async fn test_chain_without_validators_has_no_opinion() {
        let chain = ObserverChain::new().with(Arc::new(NoopObserver));
        assert!(chain.validate(&ModelResponse::text("x")).await.is_none());
    }

    #[tokio::test]
    async fn test_json_validator() {
        let v = ResponseFormatValidator::new(ResponseFormat::Json);
        assert!(v.validate(&ModelResponse::text("[1,2]")).await.unwrap().valid);
        assert!(v.validate(&ModelResponse::text("```json\n{\"a\":1}\n```")).await.unwrap().valid);
        assert!(!v.validate(&ModelResponse::text("not json")).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_structured_requires_object() {
        let v = ResponseFormatValidator::new(ResponseFormat::Structured);
        assert!(v.validate(&ModelResponse::text("{\"title\":\"x\"}")).await.unwrap().valid);
        let report = v.validate(&ModelResponse::text("[1]")).await.unwrap();
        assert_eq!(report.errors, vec!["response must be a JSON object"]);
    }
}
