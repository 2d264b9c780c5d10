use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user task. Status transitions are driven only by the agent:
/// pending → running → completed | failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub user_input: String,
    pub status: TaskStatus,
    pub result_summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed (or aborted) step of a task. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub id: i64,
    pub task_id: i64,
    pub step_no: i64,
    pub action_type: String,
    pub target_selector: String,
    pub reasoning: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a step record. Selector/reasoning/result are expected to
/// be sanitized by the caller before they reach the store.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub task_id: i64,
    pub step_no: i64,
    pub action_type: String,
    pub target_selector: String,
    pub reasoning: String,
    pub result: String,
}

/// One LLM request/response pair. Append-only; both text fields must have
/// passed the sanitizer chain before insertion.
#[derive(Debug, Clone)]
pub struct LlmLogEntry {
    pub task_id: Option<i64>,
    pub step_id: Option<i64>,
    pub role: String,
    pub prompt_text: String,
    pub response_text: String,
    pub model: String,
    pub tokens_used: i64,
}

/// Persistence capability. Writes are durable before the call returns.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, user_input: &str) -> anyhow::Result<Task>;
    async fn get_task(&self, id: i64) -> anyhow::Result<Task>;
    async fn list_tasks(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Task>>;
    async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        summary: &str,
    ) -> anyhow::Result<()>;

    async fn create_step(&self, step: &NewStep) -> anyhow::Result<i64>;
    async fn steps_for_task(&self, task_id: i64) -> anyhow::Result<Vec<AgentStep>>;

    async fn log_llm_request(&self, entry: &LlmLogEntry) -> anyhow::Result<()>;
}
