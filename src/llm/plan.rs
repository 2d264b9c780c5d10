//! Planning phase: turn task + page context (+ reasoning) into exactly one
//! tool call. A content-only response is read as `complete`.

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::prompts::{detect_task_category, system_prompt_for_category, TaskCategory};
use super::{parse_tool_call, tool_definitions, ChatResponse, OpenAiClient, ReasoningStep, StepPlan};

fn plan_from_response(response: &ChatResponse) -> anyhow::Result<(StepPlan, String)> {
    let Some(choice) = response.choices.first() else {
        anyhow::bail!("empty planning response");
    };

    if let Some(tool_call) = choice.message.tool_calls.first() {
        let response_text = format!(
            "Tool call: {}({})",
            tool_call.function.name, tool_call.function.arguments
        );
        let plan = parse_tool_call(&tool_call.function.name, &tool_call.function.arguments);
        return Ok((plan, response_text));
    }

    // No tool call: the model considers the task done.
    let content = choice.message.content.clone().unwrap_or_default();
    let plan = StepPlan {
        action: "complete".to_string(),
        reasoning: content.clone(),
        ..Default::default()
    };
    Ok((plan, content))
}

impl OpenAiClient {
    /// Unified-prompt planning conditioned on the reasoning phase.
    pub(crate) async fn plan_action_with_reasoning_impl(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        reasoning: Option<&ReasoningStep>,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<StepPlan> {
        let system_prompt = system_prompt_for_category(TaskCategory::General);

        let mut prompt = format!(
            "Текущая задача: {}\n\nКонтекст страницы:\n{}",
            task, page_context
        );
        if let Some(reasoning) = reasoning {
            prompt.push_str(&format!(
                "\n\nРезультат reasoning фазы:\n- Наблюдение: {}\n- Анализ: {}\n- Стратегия: {}\n- Уверенность: {:.2}\n\nПланируй действие на основе выработанной стратегии.",
                reasoning.observation, reasoning.analysis, reasoning.strategy, reasoning.confidence
            ));
        }
        prompt.push_str(
            "\n\nОпредели КОНКРЕТНОЕ следующее действие для выполнения задачи. Используй tool calling.",
        );

        let body = json!({
            "model": self.model(),
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": &prompt},
            ],
            "tools": tool_definitions(),
        });

        let full_prompt = Self::format_prompt(system_prompt, &prompt);

        let response = match self.chat(cancel, body).await {
            Ok(response) => response,
            Err(e) => {
                self.log_request(
                    task_id,
                    step_id,
                    "planning_error",
                    &full_prompt,
                    &e.to_string(),
                    0,
                )
                .await;
                return Err(e.context("planning request failed"));
            }
        };

        let (plan, response_text) = plan_from_response(&response)?;
        self.log_request(
            task_id,
            step_id,
            "planning",
            &full_prompt,
            &response_text,
            response.usage.total_tokens,
        )
        .await;

        Ok(plan)
    }

    /// Legacy planning: category-detected prompt, no reasoning context.
    /// Still the entry point for specialized agents and category tuning.
    pub(crate) async fn plan_action_impl(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<StepPlan> {
        let category = detect_task_category(task);
        let system_prompt = system_prompt_for_category(category);

        let prompt = format!(
            "Текущая задача: {}\n\nКонтекст страницы:\n{}\n\nОпредели следующее действие для выполнения задачи. Используй доступные инструменты для взаимодействия с браузером.",
            task, page_context
        );

        let body = json!({
            "model": self.model(),
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": &prompt},
            ],
            "tools": tool_definitions(),
        });

        let full_prompt = Self::format_prompt(system_prompt, &prompt);

        let response = match self.chat(cancel, body).await {
            Ok(response) => response,
            Err(e) => {
                self.log_request(task_id, step_id, "error", &full_prompt, &e.to_string(), 0)
                    .await;
                return Err(e.context("planning request failed"));
            }
        };

        let (plan, response_text) = plan_from_response(&response)?;
        self.log_request(
            task_id,
            step_id,
            "assistant",
            &full_prompt,
            &response_text,
            response.usage.total_tokens,
        )
        .await;

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_tool_call(name: &str, arguments: &str) -> ChatResponse {
        serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{"function": {"name": name, "arguments": arguments}}]
                }
            }],
            "usage": {"total_tokens": 20}
        }))
        .unwrap()
    }

    #[test]
    fn tool_call_becomes_plan() {
        let response = response_with_tool_call(
            "navigate",
            r#"{"url": "https://example.com", "reasoning": "открыть сайт"}"#,
        );
        let (plan, logged) = plan_from_response(&response).unwrap();
        assert_eq!(plan.action, "navigate");
        assert_eq!(plan.value, "https://example.com");
        assert!(logged.starts_with("Tool call: navigate("));
    }

    #[test]
    fn content_only_means_complete() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "Задача выполнена", "tool_calls": []}}],
            "usage": {"total_tokens": 5}
        }))
        .unwrap();
        let (plan, _) = plan_from_response(&response).unwrap();
        assert_eq!(plan.action, "complete");
        assert_eq!(plan.reasoning, "Задача выполнена");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let response = ChatResponse::default();
        assert!(plan_from_response(&response).is_err());
    }
}
