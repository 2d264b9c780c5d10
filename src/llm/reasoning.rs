//! Explicit reasoning phase. The agent verbalizes observation, analysis,
//! and strategy before any concrete action is planned; the planner then
//! conditions on the latest step.

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{OpenAiClient, ReasoningHistory, ReasoningStep};

const REASONING_SYSTEM_PROMPT: &str = r#"Ты автономный AI-агент для управления браузером.

Твоя задача - проанализировать текущую ситуацию и выработать стратегию действий.

НЕ планируй конкретные действия - только рассуждай о том:
- Что ты видишь (observation)
- Как это анализируешь (analysis)
- Какую общую стратегию выберешь (strategy)
- Насколько уверен в этой стратегии (confidence: 0.0-1.0)
- Какие альтернативы рассматривал (alternatives)
- Что не понятно или вызывает неуверенность (uncertainties)
- Нужна ли дополнительная информация от пользователя (requires_user_input)

Отвечай ТОЛЬКО в формате JSON со следующей структурой:
{
  "observation": "что ты видишь...",
  "analysis": "твой анализ ситуации...",
  "strategy": "общая стратегия без конкретных действий...",
  "confidence": 0.8,
  "alternatives": ["альтернатива 1", "альтернатива 2"],
  "uncertainties": ["неясность 1"],
  "requires_user_input": false,
  "reason_for_user_input": ""
}"#;

const MEMORY_HINT: &str =
    "\n\nУчитывай опыт из похожих ситуаций, но адаптируй стратегию под текущий контекст.";

impl OpenAiClient {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn reason_impl(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        history: &ReasoningHistory,
        memory_context: Option<&str>,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<ReasoningStep> {
        let system_prompt = match memory_context {
            Some(_) => format!("{}{}", REASONING_SYSTEM_PROMPT, MEMORY_HINT),
            None => REASONING_SYSTEM_PROMPT.to_string(),
        };

        let mut user_prompt = format!(
            "Текущая задача: {}\n\nКонтекст страницы:\n{}",
            task, page_context
        );
        if let Some(memory) = memory_context {
            user_prompt.push_str(&format!("\n\nРелевантный опыт из памяти:\n{}", memory));
        }
        if !history.is_empty() {
            user_prompt.push_str(&format!(
                "\n\nИстория предыдущих рассуждений:\n{}",
                history.to_json()
            ));
        }

        let body = json!({
            "model": self.model(),
            "messages": [
                {"role": "system", "content": &system_prompt},
                {"role": "user", "content": &user_prompt},
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.7,
        });

        let role = if memory_context.is_some() {
            "reasoning_with_context"
        } else {
            "reasoning"
        };
        let full_prompt = Self::format_prompt(&system_prompt, &user_prompt);

        let response = match self.chat(cancel, body).await {
            Ok(response) => response,
            Err(e) => {
                self.log_request(
                    task_id,
                    step_id,
                    "reasoning_error",
                    &full_prompt,
                    &e.to_string(),
                    0,
                )
                .await;
                return Err(e.context("reasoning request failed"));
            }
        };

        let Some(choice) = response.choices.first() else {
            anyhow::bail!("empty reasoning response");
        };
        let content = choice.message.content.clone().unwrap_or_default();

        let reasoning: ReasoningStep = match serde_json::from_str(&content) {
            Ok(step) => step,
            Err(e) => {
                self.log_request(
                    task_id,
                    step_id,
                    "reasoning_parse_error",
                    &full_prompt,
                    &content,
                    response.usage.total_tokens,
                )
                .await;
                return Err(anyhow::anyhow!("failed to parse reasoning JSON: {}", e));
            }
        };

        self.log_request(
            task_id,
            step_id,
            role,
            &full_prompt,
            &content,
            response.usage.total_tokens,
        )
        .await;

        Ok(reasoning)
    }
}
