use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::traits::{AgentStep, LlmLogEntry, NewStep, Task, TaskStatus, TaskStore};

/// Set restrictive file permissions (0600) on the database and WAL files.
fn set_db_file_permissions(db_path: &str) {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::Permissions::from_mode(0o600);
    if let Err(e) = std::fs::set_permissions(db_path, mode.clone()) {
        tracing::warn!("failed to set permissions on {}: {}", db_path, e);
    }
    for suffix in &["-wal", "-shm"] {
        let path = format!("{}{}", db_path, suffix);
        if std::path::Path::new(&path).exists() {
            if let Err(e) = std::fs::set_permissions(&path, mode.clone()) {
                tracing::warn!("failed to set permissions on {}: {}", path, e);
            }
        }
    }
}

/// SQLite-backed task store: tasks, agent_steps, llm_logs.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        set_db_file_permissions(db_path);

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_input TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                result_summary TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_steps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                step_no INTEGER NOT NULL,
                action_type TEXT NOT NULL,
                target_selector TEXT NOT NULL DEFAULT '',
                reasoning TEXT NOT NULL DEFAULT '',
                result TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_agent_steps_task ON agent_steps(task_id)")
            .execute(&pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS llm_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER,
                step_id INTEGER,
                role TEXT NOT NULL,
                prompt_text TEXT NOT NULL,
                response_text TEXT NOT NULL DEFAULT '',
                model TEXT NOT NULL DEFAULT '',
                tokens_used INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_llm_logs_task ON llm_logs(task_id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Task> {
        let status_str: String = row.get("status");
        let status = TaskStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("unknown task status '{}' in store", status_str))?;
        Ok(Task {
            id: row.get("id"),
            user_input: row.get("user_input"),
            status,
            result_summary: row.get("result_summary"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, user_input: &str) -> anyhow::Result<Task> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO tasks (user_input, status, result_summary, created_at, updated_at)
             VALUES (?, 'pending', '', ?, ?)",
        )
        .bind(user_input)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Task {
            id: result.last_insert_rowid(),
            user_input: user_input.to_string(),
            status: TaskStatus::Pending,
            result_summary: String::new(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_task(&self, id: i64) -> anyhow::Result<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow::anyhow!("task {} not found", id))?;
        Self::task_from_row(&row)
    }

    async fn list_tasks(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY id DESC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::task_from_row).collect()
    }

    async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        summary: &str,
    ) -> anyhow::Result<()> {
        let updated = sqlx::query(
            "UPDATE tasks SET status = ?, result_summary = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(summary)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            anyhow::bail!("task {} not found", id);
        }
        Ok(())
    }

    async fn create_step(&self, step: &NewStep) -> anyhow::Result<i64> {
        let result = sqlx::query(
            "INSERT INTO agent_steps (task_id, step_no, action_type, target_selector, reasoning, result, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(step.task_id)
        .bind(step.step_no)
        .bind(&step.action_type)
        .bind(&step.target_selector)
        .bind(&step.reasoning)
        .bind(&step.result)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn steps_for_task(&self, task_id: i64) -> anyhow::Result<Vec<AgentStep>> {
        let rows = sqlx::query("SELECT * FROM agent_steps WHERE task_id = ? ORDER BY step_no")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| AgentStep {
                id: row.get("id"),
                task_id: row.get("task_id"),
                step_no: row.get("step_no"),
                action_type: row.get("action_type"),
                target_selector: row.get("target_selector"),
                reasoning: row.get("reasoning"),
                result: row.get("result"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn log_llm_request(&self, entry: &LlmLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO llm_logs (task_id, step_id, role, prompt_text, response_text, model, tokens_used, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.task_id)
        .bind(entry.step_id)
        .bind(&entry.role)
        .bind(&entry.prompt_text)
        .bind(&entry.response_text)
        .bind(&entry.model)
        .bind(entry.tokens_used)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
