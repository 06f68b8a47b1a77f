use crate::config::AgentConfig;
use crate::lifecycle::{AgentInput, LifecycleObserver, ValidationReport};
use crate::llm::{ModelInvoker, ModelRequest, ModelResponse};
use crate::toolbox::Toolbox;
use concerto_core::{ConcertoError, ConcertoResult, EventBus, Message};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one `act()` call.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// The final (possibly transformed) model response.
    pub response: ModelResponse,
    /// Model invocations made, including the successful one.
    pub attempts: u32,
    /// `false` when validation still failed on the last allowed attempt and the
    /// response is returned anyway.
    pub validated: bool,
    /// The failing report when `validated` is false.
    pub validation: Option<ValidationReport>,
}

/// A bare agent wrapped with a lifecycle observer and a bounded retry loop.
///
/// Pipeline per `act()`:
/// transform_input → before_act → [invoke → after_response → validate →
/// emit → transform_output] × up to `max_retries`.
pub struct ConfigurableAgent {
    id: Uuid,
    agent_type: String,
    config: AgentConfig,
    model: Arc<dyn ModelInvoker>,
    observer: Arc<dyn LifecycleObserver>,
    toolbox: Arc<Toolbox>,
    events: Arc<dyn EventBus>,
}

impl ConfigurableAgent {
    /// Build a runtime from its configuration and collaborators.
    pub fn new(
        agent_type: impl Into<String>,
        config: AgentConfig,
        model: Arc<dyn ModelInvoker>,
        observer: Arc<dyn LifecycleObserver>,
        toolbox: Toolbox,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type: agent_type.into(),
            config,
            model,
            observer,
            toolbox: Arc::new(toolbox),
            events,
        }
    }

    /// Instance id, reported in event payloads.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The registered type this runtime was built for.
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// The behaviour policy this runtime follows.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Tools this agent may call.
    pub fn toolbox(&self) -> &Arc<Toolbox> {
        &self.toolbox
    }

    /// Run the agent once against `input`.
    ///
    /// Model errors are retried up to `max_retries` invocations and then
    /// returned, unless the observer absorbs them in `on_error`. Validation
    /// failures are fed back as a corrective turn; on the final attempt the
    /// invalid response is returned with `validated == false`.
    pub async fn act(&self, input: AgentInput) -> ConcertoResult<AgentOutcome> {
        let stages = self.config.hooks;

        let input = if stages.transform_input {
            self.observer.transform_input(input).await?
        } else {
            input
        };
        let input = if stages.before_act {
            self.observer.before_act(input).await?
        } else {
            input
        };

        let total_attempts = self.config.max_retries.max(1);
        let tools = input
            .tools
            .clone()
            .unwrap_or_else(|| self.toolbox.descriptors().to_vec());
        let mut last_validation: Option<ValidationReport> = None;

        for attempt in 1..=total_attempts {
            let request = ModelRequest {
                messages: self.compose_messages(&input, last_validation.as_ref()),
                tools: tools.clone(),
                trace: input.trace.clone().with_attempt(attempt),
            };

            debug!(
                agent_type = %self.agent_type,
                attempt,
                total_attempts,
                messages = request.messages.len(),
                tools = request.tools.len(),
                "Invoking model"
            );

            let response = match self.model.invoke(request).await {
                Ok(response) => response,
                Err(e) => {
                    if stages.on_error {
                        if let Some(handled) = self.observer.on_error(&e, attempt).await {
                            info!(
                                agent_type = %self.agent_type,
                                attempt,
                                error = %e,
                                "Model error handled by observer"
                            );
                            return Ok(AgentOutcome {
                                response: handled,
                                attempts: attempt,
                                validated: true,
                                validation: None,
                            });
                        }
                    }
                    if attempt < total_attempts {
                        warn!(
                            agent_type = %self.agent_type,
                            attempt,
                            total_attempts,
                            error = %e,
                            "Model invocation failed, retrying"
                        );
                        self.pause(attempt).await;
                        continue;
                    }
                    error!(
                        agent_type = %self.agent_type,
                        attempts = attempt,
                        error = %e,
                        "Model invocation failed on final attempt"
                    );
                    return Err(e);
                }
            };

            let response = if stages.after_response {
                self.observer.after_response(response, &input).await?
            } else {
                response
            };

            let mut validated = true;
            if self.config.validate_response && stages.validate_response {
                if let Some(report) = self.observer.validate(&response).await {
                    if !report.valid {
                        if attempt < total_attempts {
                            warn!(
                                agent_type = %self.agent_type,
                                attempt,
                                errors = ?report.errors,
                                "Response failed validation, retrying with correction"
                            );
                            last_validation = Some(report);
                            self.pause(attempt).await;
                            continue;
                        }
                        warn!(
                            agent_type = %self.agent_type,
                            attempt,
                            errors = ?report.errors,
                            "Response failed validation on final attempt, returning it unvalidated"
                        );
                        validated = false;
                        last_validation = Some(report);
                    }
                }
            }

            self.emit_events(&response, &input, attempt, total_attempts);

            let response = if stages.transform_output {
                self.observer.transform_output(response).await?
            } else {
                response
            };

            return Ok(AgentOutcome {
                response,
                attempts: attempt,
                validated,
                validation: if validated { None } else { last_validation },
            });
        }

        Err(ConcertoError::Agent(format!(
            "Agent '{}' exhausted {} attempts without a result",
            self.agent_type, total_attempts
        )))
    }

    /// System prompt, caller history, and (after a failed validation) a
    /// corrective user turn carrying the previous errors.
    fn compose_messages(
        &self,
        input: &AgentInput,
        last_validation: Option<&ValidationReport>,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(input.messages.len() + 2);
        messages.push(Message::system(
            self.config.prompts.system.clone(),
            input.conversation_id,
        ));
        messages.extend(input.messages.iter().cloned());

        if let (Some(report), Some(template)) =
            (last_validation, self.config.prompts.error_correction.as_ref())
        {
            let errors = serde_json::to_string(&report.errors).unwrap_or_else(|_| "[]".into());
            let correction = if template.contains("{errors}") {
                template.replace("{errors}", &errors)
            } else {
                format!("{template}\n\nValidation errors: {errors}")
            };
            messages.push(Message::user(correction, input.conversation_id));
        }

        messages
    }

    fn emit_events(&self, response: &ModelResponse, input: &AgentInput, attempt: u32, total: u32) {
        if self.config.emit_events.is_empty() {
            return;
        }
        let payload = serde_json::json!({
            "agent_id": self.id,
            "agent_type": self.agent_type,
            "response": response,
            "input": input.summary(),
            "attempt": attempt,
            "total_attempts": total,
        });
        for name in &self.config.emit_events {
            self.events.emit(name, payload.clone());
        }
    }

    async fn pause(&self, attempt: u32) {
        let delay = self.config.retry.delay_ms(attempt);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::lifecycle::NoopObserver;
    use crate::llm::TraceContext;
    use async_trait::async_trait;
    use concerto_core::{NoopEventBus, Role};
    use std::sync::Mutex;

    /// Records every request it sees and answers with a fixed response.
    struct RecordingModel {
        requests: Mutex<Vec<ModelRequest>>,
    }

    #[async_trait]
    impl ModelInvoker for RecordingModel {
        async fn invoke(&self, request: ModelRequest) -> ConcertoResult<ModelResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(ModelResponse::text("ok"))
        }
    }

    fn agent(config: AgentConfig, model: Arc<RecordingModel>) -> ConfigurableAgent {
        ConfigurableAgent::new(
            "scribe",
            config,
            model,
            Arc::new(NoopObserver),
            Toolbox::new(),
            Arc::new(NoopEventBus),
        )
    }

    #[tokio::test]
    async fn test_system_prompt_precedes_history() {
        let model = Arc::new(RecordingModel {
            requests: Mutex::new(Vec::new()),
        });
        let agent = agent(AgentConfig::new("You are a scribe."), model.clone());
        let conversation_id = Uuid::new_v4();
        let input = AgentInput::new(
            conversation_id,
            vec![Message::user("write a haiku", conversation_id)],
            TraceContext::new("scribe"),
        );

        let outcome = agent.act(input).await.unwrap();
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.validated);

        let requests = model.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "You are a scribe.");
        assert_eq!(messages[1].content, "write a haiku");
        assert_eq!(requests[0].trace.attempt, 1);
    }

    #[tokio::test]
    async fn test_caller_tools_override_toolbox() {
        let model = Arc::new(RecordingModel {
            requests: Mutex::new(Vec::new()),
        });
        let mut toolbox = Toolbox::new();
        toolbox.add_introspection();
        let agent = ConfigurableAgent::new(
            "scribe",
            AgentConfig::new("x"),
            model.clone(),
            Arc::new(NoopObserver),
            toolbox,
            Arc::new(NoopEventBus),
        );

        let input = AgentInput::new(Uuid::new_v4(), vec![], TraceContext::new("scribe"));
        agent.act(input.clone()).await.unwrap();
        agent.act(input.with_tools(vec![])).await.unwrap();

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0].tools.len(), 1);
        assert!(requests[1].tools.is_empty());
    }
}
