//! Multi-step execution: an upfront batch plan (or a remembered successful
//! path), executed one step at a time. A critical step failure triggers a
//! replan over the remaining budget; non-critical failures are recorded
//! and execution moves on.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::errors::{is_cancellation, is_critical_error, retry_action, Cancelled};
use super::Agent;
use crate::llm::MultiStepPlan;
use crate::traits::PageSnapshot;

fn extract_domain(url_str: &str) -> String {
    url::Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

impl Agent {
    pub(crate) async fn execute_task_multi_step(
        &self,
        cancel: &CancellationToken,
        task_text: &str,
        max_steps: u32,
    ) -> anyhow::Result<()> {
        let snapshot = retry_action(cancel, self.cfg.retries, self.cfg.retry_delay, || {
            self.driver.page_snapshot(cancel)
        })
        .await
        .map_err(|e| e.context("failed to get initial snapshot"))?;

        let page_context = super::context::distill_snapshot(&snapshot, self.cfg.max_tokens);
        let domain = extract_domain(&snapshot.url);

        // A remembered successful path for this exact task replaces the
        // planning call entirely.
        if let Some(memory) = self.memory.as_ref() {
            if let Some(path) = memory.find_similar_successful_path(task_text, &domain).await {
                info!(
                    strategy = %path.strategy,
                    success_count = path.success_count,
                    "found proven path in memory"
                );
                let plan = MultiStepPlan {
                    estimated_steps: path.steps.len() as u32,
                    steps: path.steps,
                    overall_strategy: path.strategy,
                    fallback_strategy: "Replan if step fails".to_string(),
                };
                return self
                    .execute_multi_step_plan_with_memory(cancel, task_text, plan, max_steps, &domain)
                    .await;
            }
        }

        let plan = self
            .llm
            .plan_multi_step(cancel, task_text, &page_context, max_steps, None, None)
            .await
            .map_err(|e| e.context("failed to plan multi-step"))?;

        info!(
            steps = plan.steps.len(),
            strategy = %plan.overall_strategy,
            "multi-step plan created"
        );

        self.execute_multi_step_plan_with_memory(cancel, task_text, plan, max_steps, &domain)
            .await
    }

    async fn execute_multi_step_plan_with_memory(
        &self,
        cancel: &CancellationToken,
        task_text: &str,
        plan: MultiStepPlan,
        max_steps: u32,
        domain: &str,
    ) -> anyhow::Result<()> {
        let started = std::time::Instant::now();
        let steps_for_memory = plan.steps.clone();
        let strategy = plan.overall_strategy.clone();

        self.execute_multi_step_plan(cancel, task_text, plan, max_steps)
            .await?;

        if let Some(memory) = self.memory.as_ref() {
            memory
                .record_success(task_text, &steps_for_memory, &strategy, started.elapsed(), domain)
                .await;
            info!(duration = ?started.elapsed(), "successful path saved to memory");
        }

        Ok(())
    }

    async fn execute_multi_step_plan(
        &self,
        cancel: &CancellationToken,
        task_text: &str,
        initial_plan: MultiStepPlan,
        max_steps: u32,
    ) -> anyhow::Result<()> {
        let mut plan = initial_plan;
        let mut budget = max_steps;
        let mut index = 0usize;

        while index < plan.steps.len() && (index as u32) < budget {
            let step = plan.steps[index].clone();
            let step_no = index as u32 + 1;

            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }

            info!(
                step = step_no,
                total = plan.steps.len(),
                action = %step.action,
                reasoning = %step.reasoning,
                "executing planned step"
            );

            if step.action == "complete" {
                info!(step = step_no, "plan complete");
                return Ok(());
            }

            // Snapshot before the step so a replan sees the page as it was
            // when the step failed.
            let snapshot: Option<PageSnapshot> = match self.driver.page_snapshot(cancel).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(step = step_no, error = %e, "failed to snapshot before step");
                    None
                }
            };

            let approved = self.check_security_and_confirm(cancel, &step, step_no).await?;
            if !approved {
                info!(step = step_no, action = %step.action, "step skipped by user");
                index += 1;
                continue;
            }

            if let Err(e) = self.execute_action_with_retry(cancel, &step).await {
                if is_cancellation(&e) {
                    return Err(e);
                }
                error!(step = step_no, action = %step.action, error = %e, "planned step failed");

                if is_critical_error(&e) {
                    let current_context = snapshot
                        .as_ref()
                        .map(|s| super::context::distill_snapshot(s, self.cfg.max_tokens))
                        .unwrap_or_default();
                    let remaining = budget.saturating_sub(step_no);

                    let new_plan = self
                        .llm
                        .replan(
                            cancel,
                            task_text,
                            &current_context,
                            &plan,
                            &step,
                            &e.to_string(),
                            remaining,
                            None,
                            None,
                        )
                        .await
                        .map_err(|replan_err| replan_err.context("failed to replan after error"))?;

                    info!(
                        new_steps = new_plan.steps.len(),
                        strategy = %new_plan.overall_strategy,
                        "replanned after critical step failure"
                    );

                    plan = new_plan;
                    budget = remaining;
                    index = 0;
                    continue;
                }

                warn!(step = step_no, error = %e, "non-critical step failure, continuing");
                if let Some(memory) = self.memory.as_ref() {
                    if let Some(recovery) = memory
                        .get_failure_recovery(&step.action, &step.selector, &e.to_string())
                        .await
                    {
                        info!(step = step_no, recovery = %recovery, "known recovery strategy found");
                    }
                    memory
                        .record_failure(&step.action, &step.selector, &e.to_string(), "")
                        .await;
                }
            }

            index += 1;
        }

        info!("all planned steps executed");
        Ok(())
    }
}

#[cfg(test)]
mod domain_tests {
    use super::extract_domain;

    #[test]
    fn domain_extraction() {
        assert_eq!(extract_domain("https://mail.yandex.ru/inbox"), "mail.yandex.ru");
        assert_eq!(extract_domain(""), "");
        assert_eq!(extract_domain("not a url"), "");
    }
}
