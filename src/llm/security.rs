//! LLM-side security checks: a second opinion on rule-flagged actions and
//! the sensitive-data classifier behind the sanitizer's AI rule.

use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{OpenAiClient, SecurityCheckResult};

impl OpenAiClient {
    pub(crate) async fn check_dangerous_action_impl(
        &self,
        cancel: &CancellationToken,
        action: &str,
        selector: &str,
        value: &str,
        reasoning: &str,
    ) -> anyhow::Result<SecurityCheckResult> {
        let prompt = format!(
            r#"Ты - система безопасности для AI-агента, который управляет браузером.

Агент планирует выполнить действие:
- Действие: {action}
- Селектор: {selector}
- Значение: {value}
- Обоснование: {reasoning}

Определи, является ли это действие потенциально опасным. Опасными считаются действия, которые могут:
- Привести к финансовым операциям (покупка, оплата, перевод)
- Удалить данные (удаление файлов, писем, аккаунтов)
- Отправить конфиденциальную информацию
- Подтвердить необратимые действия

Ответь в формате JSON:
{{
  "is_dangerous": true/false,
  "reason": "краткое объяснение почему действие опасно или безопасно",
  "message": "сообщение для пользователя с деталями действия"
}}"#
        );

        let body = json!({
            "model": self.model(),
            "messages": [
                {
                    "role": "system",
                    "content": "Ты - система безопасности. Анализируй действия AI-агента и определяй потенциальные риски."
                },
                {"role": "user", "content": &prompt},
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.3,
        });

        let response = self
            .chat(cancel, body)
            .await
            .map_err(|e| e.context("security check request failed"))?;

        let Some(choice) = response.choices.first() else {
            anyhow::bail!("empty security check response");
        };
        let content = choice.message.content.clone().unwrap_or_default();

        let result: SecurityCheckResult = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse security check response: {}", e))?;

        self.log_request(
            None,
            None,
            "security_check",
            &prompt,
            &content,
            response.usage.total_tokens,
        )
        .await;

        Ok(result)
    }

    pub(crate) async fn check_sensitive_data_impl(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> anyhow::Result<bool> {
        let prompt = format!(
            r#"Ты - система безопасности для маскирования персональных данных.

Проанализируй следующий текст и определи, содержит ли он персональные или чувствительные данные:
- Пароли, токены, API ключи
- Номера телефонов, email адреса
- Адреса проживания
- Номера банковских карт, CVV
- Другие персональные данные

Текст для анализа:
{text}

Ответь в формате JSON:
{{
  "is_sensitive": true/false,
  "reason": "краткое объяснение"
}}"#
        );

        let body = json!({
            "model": self.model(),
            "messages": [
                {
                    "role": "system",
                    "content": "Ты - система безопасности. Определяй наличие персональных данных в тексте."
                },
                {"role": "user", "content": &prompt},
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.1,
            "max_tokens": 100,
        });

        let response = self
            .chat(cancel, body)
            .await
            .map_err(|e| e.context("sensitive data check failed"))?;

        let Some(choice) = response.choices.first() else {
            anyhow::bail!("empty sensitive data response");
        };
        let content = choice.message.content.clone().unwrap_or_default();

        #[derive(Deserialize)]
        struct SensitiveVerdict {
            is_sensitive: bool,
        }

        let verdict: SensitiveVerdict = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse sensitive data verdict: {}", e))?;

        Ok(verdict.is_sensitive)
    }
}
