use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concerto_core::{ConcertoError, ConcertoResult, Message};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Conversation persistence used by the flow controller.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Messages of a conversation, oldest first. Unknown ids yield an empty history.
    async fn history(&self, conversation_id: Uuid) -> ConcertoResult<Vec<Message>>;
    /// Append a message; returns its id.
    async fn add_message(&self, message: Message) -> ConcertoResult<Uuid>;
}

/// Lifecycle of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The flow is still iterating.
    Running,
    /// The flow finished with a conclusion.
    Completed,
    /// The flow failed; the record carries the error.
    Failed,
}

/// Kind of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// The model answered with text.
    LlmResponse,
    /// A tool call was dispatched.
    ToolExecution,
    /// A rephrased tool result.
    ToolResponse,
    /// The flow's final answer.
    Conclusion,
    /// A step failed.
    Error,
}

/// One recorded step of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// What kind of step this is.
    pub step_type: StepType,
    /// Text produced by the step.
    pub content: String,
    /// Structured details such as iteration and tool name.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Assigned by the store, starting at 0.
    pub step_order: u32,
}

impl StepRecord {
    /// A step with `step_order` left for the store to assign.
    pub fn new(step_type: StepType, content: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            step_type,
            content: content.into(),
            metadata,
            step_order: 0,
        }
    }
}

/// One top-level flow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Execution id.
    pub id: Uuid,
    /// Conversation the flow ran in.
    pub conversation_id: Uuid,
    /// Root agent of the flow.
    pub agent_type: String,
    /// Current status.
    pub status: ExecutionStatus,
    /// Recorded steps, in order.
    pub steps: Vec<StepRecord>,
    /// Messages produced during the execution, in link order.
    pub message_ids: Vec<Uuid>,
    /// Final answer, once completed.
    pub conclusion: Option<String>,
    /// Error text, once failed.
    pub error: Option<String>,
    /// When the execution started.
    pub created_at: DateTime<Utc>,
    /// When the execution was finalized.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Execution tracking used by the flow controller.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Open a running execution; returns its id.
    async fn create_execution(&self, conversation_id: Uuid, agent_type: &str) -> ConcertoResult<Uuid>;
    /// Append a step; the store assigns `step_order`.
    async fn append_step(&self, execution_id: Uuid, step: StepRecord) -> ConcertoResult<()>;
    /// Associate a persisted message with the execution.
    async fn link_message(&self, execution_id: Uuid, message_id: Uuid) -> ConcertoResult<()>;
    /// Mark the execution finished. `outcome` is the conclusion on success, the error text on failure.
    async fn finalize(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        outcome: Option<String>,
    ) -> ConcertoResult<()>;
}

/// Conversation store kept in process memory.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<Uuid, Vec<Message>>>,
}

impl InMemoryConversationStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn history(&self, conversation_id: Uuid) -> ConcertoResult<Vec<Message>> {
        Ok(self
            .conversations
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_message(&self, message: Message) -> ConcertoResult<Uuid> {
        let id = message.id;
        self.conversations
            .write()
            .await
            .entry(message.conversation_id)
            .or_default()
            .push(message);
        Ok(id)
    }
}

/// Execution store kept in process memory.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<HashMap<Uuid, ExecutionRecord>>,
}

impl InMemoryExecutionStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one execution record.
    pub async fn get(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        self.records.read().await.get(&execution_id).cloned()
    }

    /// Every record, oldest first.
    pub async fn records(&self) -> Vec<ExecutionRecord> {
        let mut all: Vec<_> = self.records.read().await.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        all
    }
}

fn missing(execution_id: Uuid) -> ConcertoError {
    ConcertoError::Store(format!("Execution {execution_id} not found"))
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, conversation_id: Uuid, agent_type: &str) -> ConcertoResult<Uuid> {
        let record = ExecutionRecord {
            id: Uuid::new_v4(),
            conversation_id,
            agent_type: agent_type.to_string(),
            status: ExecutionStatus::Running,
            steps: Vec::new(),
            message_ids: Vec::new(),
            conclusion: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        let id = record.id;
        self.records.write().await.insert(id, record);
        Ok(id)
    }

    async fn append_step(&self, execution_id: Uuid, mut step: StepRecord) -> ConcertoResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&execution_id).ok_or_else(|| missing(execution_id))?;
        step.step_order = record.steps.len() as u32;
        record.steps.push(step);
        Ok(())
    }

    async fn link_message(&self, execution_id: Uuid, message_id: Uuid) -> ConcertoResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&execution_id).ok_or_else(|| missing(execution_id))?;
        record.message_ids.push(message_id);
        Ok(())
    }

    async fn finalize(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        outcome: Option<String>,
    ) -> ConcertoResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&execution_id).ok_or_else(|| missing(execution_id))?;
        record.status = status;
        match status {
            ExecutionStatus::Failed => record.error = outcome,
            _ => record.conclusion = outcome,
        }
        record.finished_at = Some(Utc::now());
        Ok(())
    }
}
