//! OpenAI-compatible LLM client: chat-completions over reqwest, token-bucket
//! rate limiting, sanitized prompt/response logging into the task store.

mod multistep;
mod parser;
mod plan;
mod popup;
pub mod prompts;
mod rate_limiter;
mod reasoning;
mod security;
mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use zeroize::Zeroize;

use crate::config::LlmConfig;
use crate::sanitizer::{DataSanitizer, SensitiveDataChecker};
use crate::traits::{LlmClient, LlmLogEntry, TaskStore};

pub use parser::{parse_tool_call, tool_definitions};
pub use rate_limiter::RateLimiter;
pub use types::{
    MultiStepPlan, PopupInfo, ReasoningHistory, ReasoningStep, SecurityCheckResult, StepPlan,
};

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    store: Option<Arc<dyn TaskStore>>,
    limiter: RateLimiter,
    sanitizer: OnceCell<Arc<DataSanitizer>>,
}

impl Drop for OpenAiClient {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

/// HTTPS is required for remote endpoints so the API key never travels in
/// cleartext; plain HTTP is allowed only for localhost model servers.
fn validate_base_url(base_url: &str) -> anyhow::Result<()> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| anyhow::anyhow!("invalid base_url '{}': {}", base_url, e))?;
    let host = parsed.host_str().unwrap_or("");

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                warn!(base_url, "using unencrypted HTTP for a local LLM server");
                Ok(())
            } else {
                anyhow::bail!(
                    "HTTP is not allowed for remote LLM endpoints ('{}'); use HTTPS",
                    base_url
                )
            }
        }
        scheme => anyhow::bail!("unsupported URL scheme '{}' in base_url", scheme),
    }
}

/// Parsed slice of a chat-completions response.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: ChatUsage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ChatChoice {
    #[serde(default)]
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ChatToolCall {
    #[serde(default)]
    pub function: ChatFunctionCall,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ChatFunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct ChatUsage {
    #[serde(default)]
    pub total_tokens: i64,
}

impl OpenAiClient {
    pub fn new(cfg: &LlmConfig, store: Option<Arc<dyn TaskStore>>) -> anyhow::Result<Arc<Self>> {
        validate_base_url(&cfg.base_url)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        let client = Arc::new(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            store,
            limiter: RateLimiter::new(cfg.requests_per_minute, cfg.tokens_per_hour),
            sanitizer: OnceCell::new(),
        });

        // The sanitizer's AI rule consults this same client, so the chain is
        // wired after construction.
        let sanitizer = Arc::new(DataSanitizer::with_ai(
            client.clone() as Arc<dyn SensitiveDataChecker>
        ));
        let _ = client.sanitizer.set(sanitizer);

        Ok(client)
    }

    pub(crate) fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn sanitizer(&self) -> Arc<DataSanitizer> {
        self.sanitizer
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::new(DataSanitizer::new()))
    }

    #[allow(dead_code)]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Rate-limited chat-completions request. Admission goes estimate-first:
    /// one request permit, then a token budget of prompt-length/4 plus the
    /// response cap; the budget is corrected with the reported usage once
    /// the response arrives.
    pub(crate) async fn chat(
        &self,
        cancel: &CancellationToken,
        body: Value,
    ) -> anyhow::Result<ChatResponse> {
        self.limiter.allow_request().await?;

        let prompt_chars: usize = body["messages"]
            .as_array()
            .map(|msgs| {
                msgs.iter()
                    .filter_map(|m| m["content"].as_str())
                    .map(|c| c.len())
                    .sum()
            })
            .unwrap_or(0);
        let max_tokens = body["max_tokens"].as_u64().unwrap_or(0) as usize;
        let estimate = (prompt_chars / 4 + max_tokens) as u32;
        self.limiter.allow_tokens(estimate).await?;

        let request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("LLM request cancelled"),
            response = request => response?,
        };

        let status = response.status();
        let text = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("LLM request cancelled"),
            text = response.text() => text?,
        };

        if !status.is_success() {
            anyhow::bail!(
                "LLM endpoint returned {}: {}",
                status,
                crate::utils::truncate_str(&text, 300)
            );
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("malformed chat response: {}", e))?;

        // Correct estimate drift with the actual usage.
        self.limiter
            .consume_tokens(parsed.usage.total_tokens - estimate as i64)
            .await;

        Ok(parsed)
    }

    pub(crate) fn format_prompt(system: &str, user: &str) -> String {
        format!("System: {}\n\nUser: {}", system, user)
    }

    /// Sanitize and persist one prompt/response pair. Logging failures are
    /// reported but never fail the calling phase.
    pub(crate) async fn log_request(
        &self,
        task_id: Option<i64>,
        step_id: Option<i64>,
        role: &str,
        prompt: &str,
        response: &str,
        tokens_used: i64,
    ) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let sanitizer = self.sanitizer();
        let entry = LlmLogEntry {
            task_id,
            step_id,
            role: role.to_string(),
            prompt_text: sanitizer.sanitize(prompt).await,
            response_text: sanitizer.sanitize(response).await,
            model: self.model.clone(),
            tokens_used,
        };

        if let Err(e) = store.log_llm_request(&entry).await {
            warn!(role, error = %e, "failed to persist LLM log");
        }
    }
}

/// The sanitizer's AI rule runs on the logging path, so it gets a short
/// deadline and no cancellation plumbing of its own.
#[async_trait]
impl SensitiveDataChecker for OpenAiClient {
    async fn check_sensitive_data(&self, text: &str) -> anyhow::Result<bool> {
        let cancel = CancellationToken::new();
        match tokio::time::timeout(
            Duration::from_secs(2),
            self.check_sensitive_data_impl(&cancel, text),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => anyhow::bail!("sensitive-data check timed out"),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn reason(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        history: &ReasoningHistory,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<ReasoningStep> {
        self.reason_impl(cancel, task, page_context, history, None, task_id, step_id)
            .await
    }

    async fn reason_with_context(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        history: &ReasoningHistory,
        memory_context: &str,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<ReasoningStep> {
        self.reason_impl(
            cancel,
            task,
            page_context,
            history,
            Some(memory_context),
            task_id,
            step_id,
        )
        .await
    }

    async fn plan_action(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<StepPlan> {
        self.plan_action_impl(cancel, task, page_context, task_id, step_id)
            .await
    }

    async fn plan_action_with_reasoning(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        reasoning: Option<&ReasoningStep>,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<StepPlan> {
        self.plan_action_with_reasoning_impl(cancel, task, page_context, reasoning, task_id, step_id)
            .await
    }

    async fn plan_multi_step(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        max_steps: u32,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<MultiStepPlan> {
        self.plan_multi_step_impl(cancel, task, page_context, max_steps, task_id, step_id)
            .await
    }

    async fn replan(
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
        self.replan_impl(
            cancel,
            task,
            page_context,
            original_plan,
            failed_step,
            error_message,
            max_steps,
            task_id,
            step_id,
        )
        .await
    }

    async fn check_dangerous_action(
        &self,
        cancel: &CancellationToken,
        action: &str,
        selector: &str,
        value: &str,
        reasoning: &str,
    ) -> anyhow::Result<SecurityCheckResult> {
        self.check_dangerous_action_impl(cancel, action, selector, value, reasoning)
            .await
    }

    async fn analyze_popup(
        &self,
        cancel: &CancellationToken,
        elements: &str,
    ) -> anyhow::Result<PopupInfo> {
        self.analyze_popup_impl(cancel, elements).await
    }

    async fn check_sensitive_data(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> anyhow::Result<bool> {
        self.check_sensitive_data_impl(cancel, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_base_urls_pass() {
        assert!(validate_base_url("https://api.openai.com/v1").is_ok());
    }

    #[test]
    fn http_is_localhost_only() {
        assert!(validate_base_url("http://localhost:8080/v1").is_ok());
        assert!(validate_base_url("http://127.0.0.1:11434/v1").is_ok());
        assert!(validate_base_url("http://api.example.com/v1").is_err());
    }

    #[test]
    fn junk_urls_are_rejected() {
        assert!(validate_base_url("ftp://example.com").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn chat_response_parses_tool_calls() {
        let parsed: ChatResponse = serde_json::from_str(
            r##"{
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {"name": "click", "arguments": "{\"selector\": \"#go\"}"}
                        }]
                    }
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            }"##,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.tool_calls[0].function.name, "click");
        assert_eq!(parsed.usage.total_tokens, 15);
    }
}
