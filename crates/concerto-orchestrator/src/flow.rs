//! The autonomous think → act → evaluate loop.

use crate::delegation::AgentFactory;
use crate::dispatch::ToolDispatcher;
use crate::evaluator::{EvaluationRequest, Evaluator};
use crate::store::{ConversationStore, ExecutionStatus, ExecutionStore, StepRecord, StepType};
use concerto_agent::{AgentInput, ConfigurableAgent, ModelResponse, TraceContext};
use concerto_core::{ConcertoResult, Message, ProgressEvent, ProgressKind, ProgressSink, ToolCall};
use concerto_registry::CapabilityRegistry;
use concerto_tools::ToolContext;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_FALLBACK_PROMPT: &str =
    "Your previous reply was empty. Either answer the request directly or call one of your tools.";
const EMPTY_RESPONSE_TEXT: &str = "The agent did not produce a response.";
const NO_CONCLUSION_TEXT: &str = "No response was produced.";
const CANCELLED_TEXT: &str = "The flow was cancelled before it reached a conclusion.";

/// Defaults applied to every flow unless the request overrides them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSettings {
    /// Iteration budget per flow.
    pub max_requests: u32,
    /// Keep iterating until the evaluator concludes.
    pub autonomous_mode: bool,
    /// Maximum delegation depth below the flow's root agent.
    pub max_depth: u32,
    /// Agent type used to turn raw tool output into user-facing text.
    pub rephraser_agent: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            max_requests: 10,
            autonomous_mode: false,
            max_depth: 3,
            rephraser_agent: "rephraser".to_string(),
        }
    }
}

/// Shared cancellation flag. Checked once before every iteration.
#[derive(Debug, Clone)]
pub struct StreamState(Arc<AtomicBool>);

impl StreamState {
    /// An active stream.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// False once [`cancel`](Self::cancel) was called.
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Stop the flow before its next iteration.
    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

/// One call to [`FlowController::execute_autonomous_flow`].
pub struct FlowRequest {
    /// Conversation the user message is appended to.
    pub conversation_id: Uuid,
    /// The user's request.
    pub user_message: String,
    /// Registered agent type that handles the request.
    pub agent_type: String,
    /// Overrides [`FlowSettings::autonomous_mode`].
    pub autonomous_mode: Option<bool>,
    /// Overrides [`FlowSettings::max_requests`].
    pub max_requests: Option<u32>,
    /// Cancellation flag shared with the caller.
    pub stream_state: StreamState,
    /// Where progress events for this request go.
    pub progress: Arc<dyn ProgressSink>,
}

impl FlowRequest {
    /// A request using the controller's default settings.
    pub fn new(
        conversation_id: Uuid,
        user_message: impl Into<String>,
        agent_type: impl Into<String>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            conversation_id,
            user_message: user_message.into(),
            agent_type: agent_type.into(),
            autonomous_mode: None,
            max_requests: None,
            stream_state: StreamState::new(),
            progress,
        }
    }

    /// Override autonomous mode.
    pub fn autonomous(mut self, enabled: bool) -> Self {
        self.autonomous_mode = Some(enabled);
        self
    }

    /// Override the iteration budget.
    pub fn max_requests(mut self, max: u32) -> Self {
        self.max_requests = Some(max);
        self
    }

    /// Use a caller-held cancellation flag.
    pub fn with_stream_state(mut self, state: StreamState) -> Self {
        self.stream_state = state;
        self
    }
}

/// Outcome of one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowStepResult {
    /// The evaluator asked to stop.
    pub should_break: bool,
    /// Conclusion to report when stopping.
    pub conclusion: Option<String>,
    /// Latest user-facing text of the iteration (reply or rephrased tool output).
    pub output: Option<String>,
}

/// Why a flow stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowTermination {
    /// The evaluator asked to stop.
    Concluded,
    /// Non-autonomous flows stop after one iteration.
    SingleShot,
    /// `max_requests` iterations ran without a conclusion.
    MaxRequests,
    /// The stream state was cancelled.
    Cancelled,
}

/// Result of a completed flow.
#[derive(Debug, Clone, Serialize)]
pub struct FlowOutcome {
    /// Execution record of this run.
    pub execution_id: Uuid,
    /// Final answer reported to the user.
    pub conclusion: String,
    /// Iterations actually run.
    pub iterations: u32,
    /// Why the flow stopped.
    pub termination: FlowTermination,
}

/// Per-iteration inputs.
pub struct IterationScope<'a> {
    /// Conversation being driven.
    pub conversation_id: Uuid,
    /// The message that started the flow.
    pub user_message: &'a str,
    /// Execution record steps are appended to.
    pub execution_id: Uuid,
    /// 1-based iteration number.
    pub iteration: u32,
    /// Caller identity and delegation chain for tool calls.
    pub tool_ctx: &'a ToolContext,
    /// Where progress events go.
    pub progress: &'a dyn ProgressSink,
}

/// Drives a configurable agent through repeated iterations.
pub struct FlowController {
    registry: Arc<CapabilityRegistry>,
    factory: Arc<dyn AgentFactory>,
    conversations: Arc<dyn ConversationStore>,
    executions: Arc<dyn ExecutionStore>,
    evaluator: Arc<dyn Evaluator>,
    dispatcher: ToolDispatcher,
    settings: FlowSettings,
}

impl FlowController {
    /// Controller with default settings and a dispatcher without MCP.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        factory: Arc<dyn AgentFactory>,
        conversations: Arc<dyn ConversationStore>,
        executions: Arc<dyn ExecutionStore>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            registry,
            factory,
            conversations,
            executions,
            evaluator,
            dispatcher: ToolDispatcher::default(),
            settings: FlowSettings::default(),
        }
    }

    /// Replace the tool dispatcher.
    pub fn with_dispatcher(mut self, dispatcher: ToolDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Replace the default settings.
    pub fn with_settings(mut self, settings: FlowSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current default settings.
    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// Run a flow to completion.
    ///
    /// On failure the execution record is marked failed, an `error` progress
    /// event is sent and the error is returned.
    pub async fn execute_autonomous_flow(&self, request: FlowRequest) -> ConcertoResult<FlowOutcome> {
        let execution_id = self
            .executions
            .create_execution(request.conversation_id, &request.agent_type)
            .await?;
        info!(
            conversation_id = %request.conversation_id,
            agent_type = %request.agent_type,
            execution_id = %execution_id,
            "Starting flow"
        );

        match self.run_flow(&request, execution_id).await {
            Ok(outcome) => {
                notify(
                    request.progress.as_ref(),
                    ProgressEvent::new(ProgressKind::Finished, outcome.conclusion.clone())
                        .with_metadata(serde_json::json!({
                            "execution_id": execution_id,
                            "iterations": outcome.iterations,
                            "termination": outcome.termination,
                        })),
                )
                .await;
                self.executions
                    .finalize(
                        execution_id,
                        ExecutionStatus::Completed,
                        Some(outcome.conclusion.clone()),
                    )
                    .await?;
                info!(
                    execution_id = %execution_id,
                    iterations = outcome.iterations,
                    termination = ?outcome.termination,
                    "Flow finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(execution_id = %execution_id, error = %e, "Flow failed");
                if let Err(store_err) = self
                    .executions
                    .finalize(execution_id, ExecutionStatus::Failed, Some(e.to_string()))
                    .await
                {
                    warn!(execution_id = %execution_id, error = %store_err, "Could not mark execution failed");
                }
                notify(
                    request.progress.as_ref(),
                    ProgressEvent::new(ProgressKind::Error, e.to_string())
                        .with_metadata(serde_json::json!({"execution_id": execution_id})),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn run_flow(&self, request: &FlowRequest, execution_id: Uuid) -> ConcertoResult<FlowOutcome> {
        let conversation_id = request.conversation_id;
        let progress = request.progress.as_ref();
        let autonomous = request
            .autonomous_mode
            .unwrap_or(self.settings.autonomous_mode);
        let max_requests = request
            .max_requests
            .unwrap_or(self.settings.max_requests)
            .max(1);

        let user_message_id = self
            .conversations
            .add_message(Message::user(request.user_message.as_str(), conversation_id))
            .await?;
        self.executions.link_message(execution_id, user_message_id).await?;
        notify(
            progress,
            ProgressEvent::new(ProgressKind::UserMessage, request.user_message.as_str()),
        )
        .await;

        let agent = self.factory.create(&request.agent_type)?;
        let tool_ctx = ToolContext::root(
            request.agent_type.as_str(),
            execution_id,
            self.settings.max_depth,
        );

        let mut iterations = 0;
        let mut last_output: Option<String> = None;
        let mut conclusion: Option<String> = None;
        let mut termination: Option<FlowTermination> = None;

        for iteration in 1..=max_requests {
            if !request.stream_state.is_active() {
                info!(execution_id = %execution_id, iteration, "Flow cancelled");
                termination = Some(FlowTermination::Cancelled);
                conclusion = Some(last_output.clone().unwrap_or_else(|| CANCELLED_TEXT.to_string()));
                break;
            }

            notify(
                progress,
                ProgressEvent::new(
                    ProgressKind::Thinking,
                    format!("Iteration {iteration} of {max_requests}"),
                )
                .with_metadata(serde_json::json!({
                    "iteration": iteration,
                    "agent_type": request.agent_type,
                })),
            )
            .await;

            let scope = IterationScope {
                conversation_id,
                user_message: &request.user_message,
                execution_id,
                iteration,
                tool_ctx: &tool_ctx,
                progress,
            };
            let step = self.execute_agent_iteration(&agent, &scope).await?;
            iterations = iteration;
            if step.output.is_some() {
                last_output = step.output.clone();
            }

            if step.should_break {
                termination = Some(FlowTermination::Concluded);
                conclusion = step.conclusion.or_else(|| last_output.clone());
                break;
            }
            if !autonomous {
                termination = Some(FlowTermination::SingleShot);
                conclusion = last_output.clone();
                break;
            }
        }

        let termination = match termination {
            Some(t) => t,
            None => {
                let text = format!(
                    "Reached the maximum number of requests ({max_requests}) without a final conclusion."
                );
                warn!(execution_id = %execution_id, max_requests, "Flow hit the request limit");
                let message_id = self
                    .conversations
                    .add_message(Message::assistant(text.as_str(), conversation_id))
                    .await?;
                self.executions.link_message(execution_id, message_id).await?;
                conclusion = Some(text);
                FlowTermination::MaxRequests
            }
        };

        let conclusion = conclusion.unwrap_or_else(|| NO_CONCLUSION_TEXT.to_string());
        self.executions
            .append_step(
                execution_id,
                StepRecord::new(
                    StepType::Conclusion,
                    conclusion.as_str(),
                    serde_json::json!({"termination": termination, "iterations": iterations}),
                ),
            )
            .await?;

        Ok(FlowOutcome {
            execution_id,
            conclusion,
            iterations,
            termination,
        })
    }

    /// One think → act → evaluate step.
    ///
    /// Text content is persisted and evaluated. Each tool call is dispatched,
    /// its raw output persisted, rephrased and evaluated. When the response
    /// carries tool calls, the tool evaluation decides whether to stop.
    /// The evaluator always sees the history including what this step persisted.
    pub async fn execute_agent_iteration(
        &self,
        agent: &ConfigurableAgent,
        scope: &IterationScope<'_>,
    ) -> ConcertoResult<FlowStepResult> {
        let history = self.conversations.history(scope.conversation_id).await?;
        let trace = TraceContext::new(agent.agent_type());
        let outcome = agent
            .act(AgentInput::new(scope.conversation_id, history.clone(), trace))
            .await?;
        if !outcome.validated {
            warn!(
                agent_type = %agent.agent_type(),
                iteration = scope.iteration,
                "Continuing with a response that failed validation"
            );
        }
        let response = self.recover_empty(agent, scope, &history, outcome.response).await?;

        let content_result = match response.content_text() {
            Some(text) => Some(self.handle_content(agent, scope, text).await?),
            None => None,
        };

        let mut tool_result: Option<FlowStepResult> = None;
        for call in response.tool_calls {
            let step = self.handle_tool_call(agent, scope, call).await?;
            let merged = tool_result.get_or_insert_with(FlowStepResult::default);
            if step.should_break {
                merged.should_break = true;
                merged.conclusion = step.conclusion;
            }
            merged.output = step.output;
        }

        Ok(match (content_result, tool_result) {
            (content, Some(mut tools)) => {
                if tools.output.is_none() {
                    tools.output = content.and_then(|c| c.output);
                }
                tools
            }
            (Some(content), None) => content,
            (None, None) => FlowStepResult::default(),
        })
    }

    /// Re-prompt once with the fallback template when the model returned nothing usable.
    async fn recover_empty(
        &self,
        agent: &ConfigurableAgent,
        scope: &IterationScope<'_>,
        history: &[Message],
        response: ModelResponse,
    ) -> ConcertoResult<ModelResponse> {
        if !response.is_empty() {
            return Ok(response);
        }
        let prompt = agent
            .config()
            .prompts
            .fallback
            .clone()
            .unwrap_or_else(|| DEFAULT_FALLBACK_PROMPT.to_string());
        warn!(
            agent_type = %agent.agent_type(),
            iteration = scope.iteration,
            "Empty model response, retrying with fallback prompt"
        );

        let mut messages = history.to_vec();
        messages.push(Message::user(prompt, scope.conversation_id));
        let retry = agent
            .act(AgentInput::new(
                scope.conversation_id,
                messages,
                TraceContext::new(agent.agent_type()),
            ))
            .await?
            .response;
        if retry.is_empty() {
            warn!(agent_type = %agent.agent_type(), "Fallback prompt also produced nothing");
            return Ok(ModelResponse::text(EMPTY_RESPONSE_TEXT));
        }
        Ok(retry)
    }

    async fn handle_content(
        &self,
        agent: &ConfigurableAgent,
        scope: &IterationScope<'_>,
        text: &str,
    ) -> ConcertoResult<FlowStepResult> {
        let message_id = self
            .conversations
            .add_message(
                Message::assistant(text, scope.conversation_id)
                    .with_metadata("agent_type", serde_json::json!(agent.agent_type())),
            )
            .await?;

        let evaluation = self
            .evaluator
            .evaluate(EvaluationRequest {
                user_message: scope.user_message.to_string(),
                response: text.to_string(),
                original_tool_response: None,
                conversation_history: self.conversations.history(scope.conversation_id).await?,
            })
            .await?;

        self.executions
            .append_step(
                scope.execution_id,
                StepRecord::new(
                    StepType::LlmResponse,
                    text,
                    serde_json::json!({
                        "iteration": scope.iteration,
                        "should_break": evaluation.should_break,
                    }),
                ),
            )
            .await?;
        self.executions
            .link_message(scope.execution_id, message_id)
            .await?;
        notify(
            scope.progress,
            ProgressEvent::new(ProgressKind::LlmResponse, text).with_metadata(serde_json::json!({
                "iteration": scope.iteration,
                "agent_type": agent.agent_type(),
            })),
        )
        .await;

        let conclusion = match evaluation.conclusion {
            Some(c) => Some(c),
            None if evaluation.should_break => Some(text.to_string()),
            None => None,
        };
        Ok(FlowStepResult {
            should_break: evaluation.should_break,
            conclusion,
            output: Some(text.to_string()),
        })
    }

    async fn handle_tool_call(
        &self,
        agent: &ConfigurableAgent,
        scope: &IterationScope<'_>,
        call: ToolCall,
    ) -> ConcertoResult<FlowStepResult> {
        let tool = call.name.clone();
        let call_id = call.id.clone();

        let pending_id = self
            .conversations
            .add_message(
                Message::assistant(format!("Calling tool '{tool}'"), scope.conversation_id)
                    .with_metadata("tool_call", serde_json::to_value(&call)?)
                    .with_metadata("status", serde_json::json!("pending")),
            )
            .await?;
        self.executions
            .link_message(scope.execution_id, pending_id)
            .await?;
        notify(
            scope.progress,
            ProgressEvent::new(ProgressKind::ToolExecution, format!("Executing tool '{tool}'"))
                .with_metadata(serde_json::json!({
                    "iteration": scope.iteration,
                    "tool": tool,
                    "arguments": call.arguments,
                })),
        )
        .await;
        self.executions
            .append_step(
                scope.execution_id,
                StepRecord::new(
                    StepType::ToolExecution,
                    tool.as_str(),
                    serde_json::json!({"iteration": scope.iteration, "arguments": call.arguments}),
                ),
            )
            .await?;

        let result = self
            .dispatcher
            .execute_tool_for_agent(agent.toolbox(), call, scope.tool_ctx)
            .await?;

        let raw_id = self
            .conversations
            .add_message(
                Message::tool(result.content.as_str(), scope.conversation_id)
                    .with_metadata("tool_call_id", serde_json::json!(call_id))
                    .with_metadata("tool", serde_json::json!(tool))
                    .with_metadata("is_error", serde_json::json!(result.is_error)),
            )
            .await?;
        self.executions
            .link_message(scope.execution_id, raw_id)
            .await?;

        let rephrased = self
            .rephrase(scope.user_message, &tool, &result.content)
            .await;

        let evaluation = self
            .evaluator
            .evaluate(EvaluationRequest {
                user_message: scope.user_message.to_string(),
                response: rephrased.clone(),
                original_tool_response: Some(result.content.clone()),
                conversation_history: self.conversations.history(scope.conversation_id).await?,
            })
            .await?;

        self.executions
            .append_step(
                scope.execution_id,
                StepRecord::new(
                    StepType::ToolResponse,
                    rephrased.as_str(),
                    serde_json::json!({
                        "iteration": scope.iteration,
                        "tool": tool,
                        "is_error": result.is_error,
                        "should_break": evaluation.should_break,
                    }),
                ),
            )
            .await?;
        notify(
            scope.progress,
            ProgressEvent::new(ProgressKind::ToolResponse, rephrased.as_str()).with_metadata(
                serde_json::json!({
                    "iteration": scope.iteration,
                    "tool": tool,
                    "is_error": result.is_error,
                }),
            ),
        )
        .await;

        let conclusion = match evaluation.conclusion {
            Some(c) => Some(c),
            None if evaluation.should_break => Some(rephrased.clone()),
            None => None,
        };
        Ok(FlowStepResult {
            should_break: evaluation.should_break,
            conclusion,
            output: Some(rephrased),
        })
    }

    /// Turn raw tool output into user-facing text via the rephraser agent.
    /// Falls back to the raw output when the rephraser is missing or fails.
    async fn rephrase(&self, user_message: &str, tool: &str, raw: &str) -> String {
        let rephraser = self.settings.rephraser_agent.as_str();
        if !self.registry.contains(rephraser) {
            warn!(rephraser = %rephraser, "Rephraser agent not registered, using raw tool output");
            return raw.to_string();
        }
        let agent = match self.factory.create(rephraser) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(rephraser = %rephraser, error = %e, "Could not create rephraser");
                return raw.to_string();
            }
        };

        let conversation_id = Uuid::new_v4();
        let prompt = format!(
            "The user asked:\n{user_message}\n\nThe tool '{tool}' returned:\n{raw}\n\n\
             Rephrase this result as a short answer for the user."
        );
        let input = AgentInput::new(
            conversation_id,
            vec![Message::user(prompt, conversation_id)],
            TraceContext::new(rephraser),
        );
        match agent.act(input).await {
            Ok(outcome) => outcome.response.into_plain_string(),
            Err(e) => {
                warn!(rephraser = %rephraser, tool = %tool, error = %e, "Rephrasing failed");
                raw.to_string()
            }
        }
    }
}

/// Progress delivery is best-effort; a closed sink never fails the flow.
async fn notify(progress: &dyn ProgressSink, event: ProgressEvent) {
    let kind = event.kind;
    if let Err(e) = progress.send(event).await {
        warn!(kind = %kind, error = %e, "Failed to deliver progress event");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_state_cancel_is_shared() {
        let state = StreamState::new();
        let clone = state.clone();
        assert!(clone.is_active());
        state.cancel();
        assert!(!clone.is_active());
    }

    #[test]
    fn test_request_overrides() {
        let request = FlowRequest::new(
            Uuid::new_v4(),
            "hi",
            "scribe",
            Arc::new(concerto_core::NullProgressSink),
        )
        .autonomous(true)
        .max_requests(3);
        assert_eq!(request.autonomous_mode, Some(true));
        assert_eq!(request.max_requests, Some(3));
    }

    #[test]
    fn test_default_settings() {
        let settings = FlowSettings::default();
        assert_eq!(settings.max_requests, 10);
        assert!(!settings.autonomous_mode);
        assert_eq!(settings.rephraser_agent, "rephraser");
    }
}
