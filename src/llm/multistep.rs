//! Batch planning: an upfront sequence of steps, and replanning around a
//! failed step with the remaining budget.

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::prompts::{detect_task_category, system_prompt_for_category};
use super::{MultiStepPlan, OpenAiClient, StepPlan};

impl OpenAiClient {
    pub(crate) async fn plan_multi_step_impl(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        max_steps: u32,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<MultiStepPlan> {
        let max_steps = if max_steps == 0 { 5 } else { max_steps };

        let category = detect_task_category(task);
        let system_prompt = format!(
            "{}\n\nYou are an expert at planning multi-step web automation tasks. Think strategically and plan ahead.",
            system_prompt_for_category(category)
        );

        let prompt = format!(
            r#"You are an AI agent controlling a web browser. Plan a sequence of actions to accomplish this task.

Task: {task}

Current page context:
{page_context}

Plan the next {max_steps} steps to accomplish this task. Think strategically about the optimal sequence.

Available actions:
- navigate: go to a URL
- click: click an element
- type: type text into an element
- extract_info: extract information from the page
- ask_user: ask the user for information
- complete: task is finished

Respond in JSON format:
{{
  "steps": [
    {{
      "action": "action_name",
      "selector": "css_selector (if applicable)",
      "value": "value (if applicable)",
      "reasoning": "why this step"
    }}
  ],
  "overall_strategy": "high-level strategy description",
  "fallback_strategy": "what to do if a step fails",
  "estimated_steps": number
}}"#
        );

        let body = json!({
            "model": self.model(),
            "messages": [
                {"role": "system", "content": &system_prompt},
                {"role": "user", "content": &prompt},
            ],
            "response_format": {"type": "json_object"},
        });

        let response = self
            .chat(cancel, body)
            .await
            .map_err(|e| e.context("multi-step planning request failed"))?;

        let Some(choice) = response.choices.first() else {
            anyhow::bail!("empty multi-step planning response");
        };
        let content = choice.message.content.clone().unwrap_or_default();

        let plan: MultiStepPlan = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse multi-step plan: {}", e))?;

        self.log_request(
            task_id,
            step_id,
            "multistep_planning",
            &prompt,
            &content,
            response.usage.total_tokens,
        )
        .await;

        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn replan_impl(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        original_plan: &MultiStepPlan,
        failed_step: &StepPlan,
        error_message: &str,
        max_steps: u32,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<MultiStepPlan> {
        let max_steps = if max_steps == 0 { 5 } else { max_steps };

        let original_steps = serde_json::to_string_pretty(&original_plan.steps)
            .unwrap_or_else(|_| "[]".to_string());

        let prompt = format!(
            r#"You are an AI agent controlling a web browser. The original plan failed, you need to replan.

Task: {task}

Current page context:
{page_context}

Original plan:
{original_steps}

Failed step:
Action: {}
Selector: {}
Value: {}
Reasoning: {}

Error: {error_message}

Create a new plan that works around this failure. Consider alternative approaches.

Plan the next {max_steps} steps. Respond in JSON format:
{{
  "steps": [
    {{
      "action": "action_name",
      "selector": "css_selector (if applicable)",
      "value": "value (if applicable)",
      "reasoning": "why this step"
    }}
  ],
  "overall_strategy": "new strategy description",
  "fallback_strategy": "what to do if this fails",
  "estimated_steps": number
}}"#,
            failed_step.action, failed_step.selector, failed_step.value, failed_step.reasoning,
        );

        let body = json!({
            "model": self.model(),
            "messages": [
                {
                    "role": "system",
                    "content": "You are an expert at recovering from failures and finding alternative approaches to web automation tasks."
                },
                {"role": "user", "content": &prompt},
            ],
            "response_format": {"type": "json_object"},
        });

        let response = self
            .chat(cancel, body)
            .await
            .map_err(|e| e.context("replanning request failed"))?;

        let Some(choice) = response.choices.first() else {
            anyhow::bail!("empty replanning response");
        };
        let content = choice.message.content.clone().unwrap_or_default();

        let plan: MultiStepPlan = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse replan: {}", e))?;

        self.log_request(
            task_id,
            step_id,
            "replan",
            &prompt,
            &content,
            response.usage.total_tokens,
        )
        .await;

        Ok(plan)
    }
}
