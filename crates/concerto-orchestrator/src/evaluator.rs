use crate::delegation::AgentFactory;
use async_trait::async_trait;
use concerto_agent::{strip_fence, AgentInput, TraceContext};
use concerto_core::{ConcertoResult, Message};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// What the evaluator is asked to judge after each step.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    /// The message that started the flow.
    pub user_message: String,
    /// The agent's reply, or the rephrased tool output.
    pub response: String,
    /// Raw tool output when `response` is a rephrasing of it.
    pub original_tool_response: Option<String>,
    /// History including what the current step persisted.
    pub conversation_history: Vec<Message>,
}

/// Whether the flow should stop, and with what conclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Stop the flow after this step.
    pub should_break: bool,
    /// Final answer to report when stopping.
    #[serde(default)]
    pub conclusion: Option<String>,
}

impl Evaluation {
    /// Keep going.
    pub fn proceed() -> Self {
        Self::default()
    }

    /// Stop with `conclusion`.
    pub fn conclude(conclusion: impl Into<String>) -> Self {
        Self {
            should_break: true,
            conclusion: Some(conclusion.into()),
        }
    }
}

/// Decides whether an autonomous flow has reached its goal.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Judge the latest step.
    async fn evaluate(&self, request: EvaluationRequest) -> ConcertoResult<Evaluation>;
}

/// Asks a registered agent to judge progress.
///
/// The agent receives a single user turn describing the request and must reply
/// with `{"should_break": bool, "conclusion": string?}`. Replies that do not
/// parse are treated as "keep going".
pub struct AgentEvaluator {
    factory: Arc<dyn AgentFactory>,
    agent_type: String,
}

impl AgentEvaluator {
    /// Evaluator backed by the registered `agent_type`.
    pub fn new(factory: Arc<dyn AgentFactory>, agent_type: impl Into<String>) -> Self {
        Self {
            factory,
            agent_type: agent_type.into(),
        }
    }

    fn prompt(request: &EvaluationRequest) -> String {
        let mut prompt = format!(
            "User request:\n{}\n\nLatest result:\n{}\n",
            request.user_message, request.response
        );
        if let Some(raw) = &request.original_tool_response {
            prompt.push_str(&format!("\nRaw tool output:\n{raw}\n"));
        }
        prompt.push_str(&format!(
            "\nConversation so far: {} messages.\n\
             Reply with JSON {{\"should_break\": bool, \"conclusion\": string or null}}.",
            request.conversation_history.len()
        ));
        prompt
    }

    fn parse(reply: &str) -> Result<Evaluation, serde_json::Error> {
        serde_json::from_str(strip_fence(reply))
    }
}

#[async_trait]
impl Evaluator for AgentEvaluator {
    async fn evaluate(&self, request: EvaluationRequest) -> ConcertoResult<Evaluation> {
        let agent = self.factory.create(&self.agent_type)?;
        let conversation_id = Uuid::new_v4();
        let input = AgentInput::new(
            conversation_id,
            vec![Message::user(Self::prompt(&request), conversation_id)],
            TraceContext::new(self.agent_type.as_str()),
        );
        let outcome = agent.act(input).await?;
        let text = outcome.response.content.unwrap_or_default();
        match Self::parse(&text) {
            Ok(evaluation) => Ok(evaluation),
            Err(e) => {
                warn!(
                    evaluator = %self.agent_type,
                    error = %e,
                    "Evaluator reply is not valid JSON, continuing flow"
                );
                Ok(Evaluation::proceed())
            }
        }
    }
}
