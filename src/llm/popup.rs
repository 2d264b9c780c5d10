//! Popup identification: given distilled page elements, find a modal or
//! overlay and its close control.

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{OpenAiClient, PopupInfo};

impl OpenAiClient {
    pub(crate) async fn analyze_popup_impl(
        &self,
        cancel: &CancellationToken,
        elements: &str,
    ) -> anyhow::Result<PopupInfo> {
        let prompt = format!(
            r#"Analyze the page elements and determine if there is a popup, modal, or overlay that should be closed.

Elements data:
{elements}

Determine:
1. Is there a popup/modal/overlay present?
2. If yes, what is the CSS selector of the close button?
3. Brief description of the popup

Respond in JSON format:
{{
  "has_popup": true/false,
  "close_selector": "CSS selector",
  "popup_description": "brief description",
  "reasoning": "your analysis"
}}"#
        );

        let body = json!({
            "model": self.model(),
            "messages": [
                {
                    "role": "system",
                    "content": "You are an expert at analyzing web page structure and identifying popups and their close buttons."
                },
                {"role": "user", "content": &prompt},
            ],
            "response_format": {"type": "json_object"},
        });

        let response = self
            .chat(cancel, body)
            .await
            .map_err(|e| e.context("popup analysis request failed"))?;

        let Some(choice) = response.choices.first() else {
            anyhow::bail!("empty popup analysis response");
        };
        let content = choice.message.content.clone().unwrap_or_default();

        let info: PopupInfo = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse popup analysis: {}", e))?;

        self.log_request(
            None,
            None,
            "popup_analysis",
            &prompt,
            &content,
            response.usage.total_tokens,
        )
        .await;

        Ok(info)
    }
}
