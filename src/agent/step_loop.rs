//! The per-task state machine: launch the browser, optionally route to a
//! specialized agent, then drive the ReAct loop until the planner says
//! `complete`, the step budget runs out, or a critical error aborts.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::errors::{is_cancellation, is_critical_error, Cancelled};
use super::Agent;
use crate::llm::ReasoningHistory;
use crate::traits::{Task, TaskStatus};
use crate::utils::truncate_str;

pub(crate) struct ExecuteStepsParams<'a> {
    pub cancel: &'a CancellationToken,
    pub task_text: &'a str,
    pub max_steps: u32,
    pub task_id: Option<i64>,
    pub save_steps: bool,
    pub update_task: bool,
}

impl Agent {
    /// Drive one task to a terminal state. On success the task ends
    /// `completed`; every non-cancellation error marks it `failed`. A
    /// cancellation error is returned untouched — the caller decides what
    /// the task becomes.
    pub async fn execute_task(
        &self,
        cancel: &CancellationToken,
        task: &Task,
    ) -> anyhow::Result<()> {
        self.store
            .update_task_status(task.id, TaskStatus::Running, "")
            .await?;

        if let Err(e) = self.driver.launch(cancel).await {
            let message = format!("browser launch failed: {}", e);
            self.store
                .update_task_status(task.id, TaskStatus::Failed, &message)
                .await
                .ok();
            return Err(e.context("browser launch failed"));
        }

        let result = self.run_task(cancel, task).await;

        if let Err(e) = self.driver.close().await {
            warn!(task_id = task.id, error = %e, "browser close failed");
        }

        match result {
            Ok(status_updated) => {
                if !status_updated {
                    self.store
                        .update_task_status(task.id, TaskStatus::Completed, "")
                        .await?;
                }
                Ok(())
            }
            Err(e) if is_cancellation(&e) => {
                info!(task_id = task.id, "task cancelled");
                Err(e)
            }
            Err(e) => {
                let summary = self.sanitizer.sanitize(&truncate_str(&e.to_string(), 500)).await;
                if let Err(update_err) = self
                    .store
                    .update_task_status(task.id, TaskStatus::Failed, &summary)
                    .await
                {
                    error!(task_id = task.id, error = %update_err, "failed to mark task failed");
                }
                Err(e)
            }
        }
    }

    /// Returns whether the executed path already wrote the terminal task
    /// status.
    async fn run_task(&self, cancel: &CancellationToken, task: &Task) -> anyhow::Result<bool> {
        if self.cfg.use_multi_step {
            info!(
                task_id = task.id,
                batch = self.cfg.multi_step_size,
                "using multi-step planning"
            );
            self.execute_task_multi_step(cancel, &task.user_input, self.cfg.multi_step_size)
                .await?;
            return Ok(false);
        }

        if let Some(router) = self.router.as_ref() {
            let page_context = self.page_context(cancel).await.unwrap_or_default();
            match router.route_task(cancel, &task.user_input, &page_context).await {
                Ok(selected) => {
                    info!(
                        task_id = task.id,
                        agent_type = selected.task_type().as_str(),
                        "task routed to specialized agent"
                    );
                    selected
                        .execute(cancel, &task.user_input, self.cfg.max_steps)
                        .await?;
                    return Ok(false);
                }
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "routing failed, using generic loop");
                }
            }
        }

        self.execute_steps(ExecuteStepsParams {
            cancel,
            task_text: &task.user_input,
            max_steps: self.cfg.max_steps,
            task_id: Some(task.id),
            save_steps: true,
            update_task: true,
        })
        .await?;
        Ok(true)
    }

    /// Run a task by text only, without persistence. Specialized agents
    /// delegate here.
    pub(crate) async fn execute_task_string(
        &self,
        cancel: &CancellationToken,
        task_text: &str,
        max_steps: u32,
    ) -> anyhow::Result<()> {
        self.execute_steps(ExecuteStepsParams {
            cancel,
            task_text,
            max_steps,
            task_id: None,
            save_steps: false,
            update_task: false,
        })
        .await
    }

    async fn persist_step(
        &self,
        params: &ExecuteStepsParams<'_>,
        step_no: u32,
        plan: &crate::llm::StepPlan,
        result: &str,
    ) {
        if !params.save_steps {
            return;
        }
        let Some(task_id) = params.task_id else {
            return;
        };
        let record = self.step_record(task_id, step_no, plan, result).await;
        if let Err(e) = self.store.create_step(&record).await {
            error!(task_id, step = step_no, error = %e, "failed to persist step");
        }
    }

    pub(crate) async fn execute_steps(&self, params: ExecuteStepsParams<'_>) -> anyhow::Result<()> {
        // Fresh reasoning history for this task.
        *self.reasoning_history.lock().await = ReasoningHistory::default();

        for step_no in 1..=params.max_steps {
            if params.cancel.is_cancelled() {
                info!(step = step_no, "task execution cancelled");
                return Err(Cancelled.into());
            }

            let page_context = match self.page_context(params.cancel).await {
                Ok(context) => context,
                Err(e) => {
                    warn!(step = step_no, error = %e, "failed to get page context");
                    String::new()
                }
            };

            // Reasoning is advisory: a failure degrades to planning without
            // explicit reasoning context.
            match self
                .perform_reasoning(params.cancel, params.task_text, &page_context, params.task_id)
                .await
            {
                Ok(reasoning) => {
                    if reasoning.requires_user_input {
                        // Surfaced to the planner via the history; the model
                        // turns it into an ask_user action when warranted.
                        info!(step = step_no, reason = %reasoning.reason_for_user_input, "reasoning requests user input");
                    }
                    self.reasoning_history.lock().await.add_step(reasoning);
                }
                Err(e) => {
                    if is_cancellation(&e) {
                        return Err(e);
                    }
                    warn!(step = step_no, error = %e, "reasoning failed, planning without it");
                }
            }

            let plan = match self
                .plan_for_step(params.cancel, params.task_text, &page_context, params.task_id)
                .await
            {
                Ok(plan) => plan,
                Err(e) => {
                    if is_cancellation(&e) {
                        return Err(e);
                    }
                    error!(step = step_no, error = %e, "planning failed");
                    if is_critical_error(&e) {
                        return Err(e.context("critical planning error"));
                    }
                    continue;
                }
            };

            if plan.action == "complete" {
                self.persist_step(&params, step_no, &plan, &plan.reasoning).await;
                if params.update_task {
                    if let Some(task_id) = params.task_id {
                        let summary = self.sanitizer.sanitize(&plan.reasoning).await;
                        if let Err(e) = self
                            .store
                            .update_task_status(task_id, TaskStatus::Completed, &summary)
                            .await
                        {
                            error!(task_id, error = %e, "failed to mark task completed");
                        }
                    }
                }
                info!(step = step_no, "task complete");
                return Ok(());
            }

            let approved = match self
                .check_security_and_confirm(params.cancel, &plan, step_no)
                .await
            {
                Ok(approved) => approved,
                Err(e) => {
                    self.persist_step(&params, step_no, &plan, "Ошибка запроса подтверждения")
                        .await;
                    return Err(e);
                }
            };
            if !approved {
                self.persist_step(&params, step_no, &plan, "Действие отменено пользователем")
                    .await;
                continue;
            }

            match self.execute_action_with_retry(params.cancel, &plan).await {
                Ok(result) => {
                    self.persist_step(&params, step_no, &plan, &result).await;
                    self.basic_reflection(step_no, &plan, None).await;
                    info!(step = step_no, action = %plan.action, reasoning = %truncate_str(&plan.reasoning, 60), "step done");
                }
                Err(e) => {
                    if is_cancellation(&e) {
                        return Err(e);
                    }
                    let classified = super::errors::classify_error(&plan.action, &e);
                    error!(
                        step = step_no,
                        action = %plan.action,
                        error = %e,
                        error_type = %classified.kind,
                        "action failed"
                    );
                    self.persist_step(&params, step_no, &plan, &format!("Ошибка: {}", e))
                        .await;
                    self.basic_reflection(step_no, &plan, Some(&e)).await;

                    if classified.kind == super::errors::ErrorKind::Critical {
                        return Err(e.context("critical action error"));
                    }
                    warn!(step = step_no, action = %plan.action, "continuing after non-critical error");
                }
            }
        }

        Err(anyhow::anyhow!("step limit reached ({})", params.max_steps))
    }
}
