//! The agent core: a per-task ReAct loop (observe → reason → plan → check →
//! act → reflect → persist) over the browser driver, gated by the safety
//! envelope and backed by resilience primitives.

mod breaker;
mod context;
mod domains;
mod errors;
mod memory;
mod multistep;
mod router;
mod security;
mod specialized;
mod step_loop;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use breaker::{retry_with_exponential_backoff, CircuitBreaker, CircuitBreakerPool, CircuitState};
pub use context::{distill_html, distill_snapshot, ElementPriority, PageElement};
pub use domains::{check_domain_security, is_domain_blocked, is_domain_critical, DomainSecurity, DomainSecurityLevel};
pub use errors::{classify_error, is_cancellation, is_critical_error, retry_action, ActionError, Cancelled, ErrorKind};
pub use memory::{AgentMemory, FailurePattern, SiteInfo, SuccessfulPath};
pub use router::{AgentRouter, SpecializedAgent, TaskType};
pub use security::{is_confirmation_positive, SecurityChecker};
pub use specialized::{FoodDeliveryAgent, JobSearchAgent, MailboxAgent};

use crate::browser::selector::{normalize_selector, validate_selector};
use crate::llm::{ReasoningHistory, ReasoningStep, StepPlan};
use crate::sanitizer::DataSanitizer;
use crate::traits::{BrowserDriver, LlmClient, NewStep, TaskStore, UserInput};

/// Agent tuning knobs. Zero-valued fields fall back to the defaults the
/// rest of the system is calibrated for.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: u32,
    pub max_tokens: usize,
    pub retries: u32,
    pub retry_delay: Duration,
    pub confidence_min: f64,
    pub use_subagents: bool,
    pub use_multi_step: bool,
    pub multi_step_size: u32,
    pub use_memory: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_tokens: 2000,
            retries: 3,
            retry_delay: Duration::from_secs(2),
            confidence_min: 0.7,
            use_subagents: false,
            use_multi_step: false,
            multi_step_size: 5,
            use_memory: false,
        }
    }
}

impl AgentConfig {
    fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.max_steps == 0 {
            self.max_steps = defaults.max_steps;
        }
        if self.max_tokens == 0 {
            self.max_tokens = defaults.max_tokens;
        }
        if self.retries == 0 {
            self.retries = defaults.retries;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = defaults.retry_delay;
        }
        if self.confidence_min == 0.0 {
            self.confidence_min = defaults.confidence_min;
        }
        if self.multi_step_size == 0 {
            self.multi_step_size = defaults.multi_step_size;
        }
        self
    }
}

impl From<&crate::config::AgentSettings> for AgentConfig {
    fn from(settings: &crate::config::AgentSettings) -> Self {
        Self {
            max_steps: settings.max_steps,
            max_tokens: settings.max_tokens,
            retries: settings.retries,
            retry_delay: Duration::from_secs(settings.retry_delay_secs),
            confidence_min: settings.confidence_min,
            use_subagents: settings.use_subagents,
            use_multi_step: settings.use_multi_step,
            multi_step_size: settings.multi_step_size,
            use_memory: settings.use_memory,
        }
    }
}

pub struct Agent {
    driver: Arc<dyn BrowserDriver>,
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn TaskStore>,
    sanitizer: Arc<DataSanitizer>,
    user_input: Option<Arc<dyn UserInput>>,
    security: SecurityChecker,
    memory: Option<AgentMemory>,
    router: Option<AgentRouter>,
    breakers: CircuitBreakerPool,
    reasoning_history: Mutex<ReasoningHistory>,
    cfg: AgentConfig,
}

impl Agent {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn TaskStore>,
        sanitizer: Arc<DataSanitizer>,
        user_input: Option<Arc<dyn UserInput>>,
        cfg: AgentConfig,
    ) -> Arc<Self> {
        let cfg = cfg.with_defaults();

        Arc::new_cyclic(|weak: &Weak<Agent>| {
            let router = if cfg.use_subagents {
                let mut router = AgentRouter::new(cfg.confidence_min);
                let mailbox: Arc<dyn SpecializedAgent> = Arc::new(MailboxAgent::new(weak.clone()));
                router.register_agent(mailbox.clone());
                router.register_agent(Arc::new(FoodDeliveryAgent::new(weak.clone())));
                router.register_agent(Arc::new(JobSearchAgent::new(weak.clone())));
                router.set_default_agent(mailbox);
                Some(router)
            } else {
                None
            };

            let memory = cfg.use_memory.then(AgentMemory::new);

            Agent {
                security: SecurityChecker::new(Some(llm.clone())),
                driver,
                llm,
                store,
                sanitizer,
                user_input,
                memory,
                router,
                breakers: CircuitBreakerPool::new(),
                reasoning_history: Mutex::new(ReasoningHistory::default()),
                cfg,
            }
        })
    }

    pub fn memory(&self) -> Option<&AgentMemory> {
        self.memory.as_ref()
    }

    #[cfg(test)]
    pub(crate) async fn reasoning_history_len(&self) -> usize {
        self.reasoning_history.lock().await.len()
    }

    /// Distilled page context: snapshot when the driver can produce one,
    /// raw HTML otherwise.
    pub(crate) async fn page_context(&self, cancel: &CancellationToken) -> anyhow::Result<String> {
        if let Ok(snapshot) = self.driver.page_snapshot(cancel).await {
            return Ok(distill_snapshot(&snapshot, self.cfg.max_tokens));
        }

        let html = self.driver.page_html(cancel).await?;
        Ok(distill_html(&html, self.cfg.max_tokens))
    }

    pub(crate) async fn perform_reasoning(
        &self,
        cancel: &CancellationToken,
        task_text: &str,
        page_context: &str,
        task_id: Option<i64>,
    ) -> anyhow::Result<ReasoningStep> {
        let history = self.reasoning_history.lock().await.clone();
        retry_action(cancel, self.cfg.retries, self.cfg.retry_delay, || {
            self.llm
                .reason(cancel, task_text, page_context, &history, task_id, None)
        })
        .await
    }

    /// Plan the next action. With reasoning available the unified prompt
    /// is conditioned on it; when the reasoning phase produced nothing the
    /// category-tuned legacy planner takes over.
    pub(crate) async fn plan_for_step(
        &self,
        cancel: &CancellationToken,
        task_text: &str,
        page_context: &str,
        task_id: Option<i64>,
    ) -> anyhow::Result<StepPlan> {
        let latest = self.reasoning_history.lock().await.last_step().cloned();
        retry_action(cancel, self.cfg.retries, self.cfg.retry_delay, || {
            let latest = latest.as_ref();
            async move {
                match latest {
                    Some(reasoning) => {
                        self.llm
                            .plan_action_with_reasoning(
                                cancel,
                                task_text,
                                page_context,
                                Some(reasoning),
                                task_id,
                                None,
                            )
                            .await
                    }
                    None => {
                        self.llm
                            .plan_action(cancel, task_text, page_context, task_id, None)
                            .await
                    }
                }
            }
        })
        .await
    }

    /// Safety gate for one planned action. `Ok(true)` means approved (or
    /// nothing dangerous), `Ok(false)` means the user declined.
    pub(crate) async fn check_security_and_confirm(
        &self,
        cancel: &CancellationToken,
        plan: &StepPlan,
        step_no: u32,
    ) -> anyhow::Result<bool> {
        let (dangerous, llm_message) = self
            .security
            .is_dangerous_action(cancel, &plan.action, &plan.selector, &plan.value, &plan.reasoning)
            .await;

        if !dangerous {
            return Ok(true);
        }

        let Some(user_input) = self.user_input.as_ref() else {
            warn!(
                step = step_no,
                action = %plan.action,
                "dangerous action detected but no user-input provider is configured"
            );
            return Ok(true);
        };

        let confirmation = self.security.confirmation_message(
            &plan.action,
            &plan.selector,
            &plan.value,
            &plan.reasoning,
            &llm_message,
        );
        let answer = user_input
            .ask(cancel, &confirmation)
            .await
            .map_err(|e| e.context("confirmation request failed"))?;

        if is_confirmation_positive(&answer) {
            tracing::info!(step = step_no, action = %plan.action, "user approved dangerous action");
            Ok(true)
        } else {
            tracing::info!(step = step_no, action = %plan.action, "user declined dangerous action");
            Ok(false)
        }
    }

    /// Sanitized step record ready for the store.
    pub(crate) async fn step_record(
        &self,
        task_id: i64,
        step_no: u32,
        plan: &StepPlan,
        result: &str,
    ) -> NewStep {
        NewStep {
            task_id,
            step_no: step_no as i64,
            action_type: plan.action.clone(),
            target_selector: self.sanitizer.sanitize_selector(&plan.selector),
            reasoning: self.sanitizer.sanitize(&plan.reasoning).await,
            result: self.sanitizer.sanitize(result).await,
        }
    }

    /// Execute one planned action against the driver. Selector-based
    /// actions are normalized and validated before the driver sees them.
    pub(crate) async fn execute_action(
        &self,
        cancel: &CancellationToken,
        plan: &StepPlan,
    ) -> anyhow::Result<String> {
        match plan.action.as_str() {
            "navigate" => {
                self.driver.navigate(cancel, &plan.value).await?;
                Ok(format!("Переход на {}", plan.value))
            }
            "click" => {
                let selector = self.prepare_selector(&plan.selector)?;
                self.driver.click(cancel, &selector).await?;
                Ok(format!("Клик по {}", selector))
            }
            "type" => {
                let selector = self.prepare_selector(&plan.selector)?;
                self.driver.type_text(cancel, &selector, &plan.value).await?;
                Ok(format!("Ввод '{}' в {}", plan.value, selector))
            }
            "extract_info" => {
                let html = self.driver.page_html(cancel).await?;
                Ok(format!("Извлечено: {}", distill_html(&html, self.cfg.max_tokens)))
            }
            "ask_user" => {
                let user_input = self
                    .user_input
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("no user-input provider configured"))?;
                let answer = user_input.ask(cancel, &plan.value).await?;
                Ok(format!("Ответ пользователя: {}", answer))
            }
            other => anyhow::bail!("unknown action: {}", other),
        }
    }

    fn prepare_selector(&self, selector: &str) -> anyhow::Result<String> {
        let (normalized, changed) = normalize_selector(selector);
        if changed {
            tracing::debug!(from = selector, to = %normalized, "normalized selector");
        }
        validate_selector(&normalized)?;
        Ok(normalized)
    }

    /// Retry wrapper around `execute_action`, with a per-action-type
    /// circuit breaker accounting every attempt.
    pub(crate) async fn execute_action_with_retry(
        &self,
        cancel: &CancellationToken,
        plan: &StepPlan,
    ) -> anyhow::Result<String> {
        let breaker = self.breakers.breaker(&plan.action).await;
        retry_action(cancel, self.cfg.retries, self.cfg.retry_delay, || {
            let breaker = breaker.clone();
            async move { breaker.call(|| self.execute_action(cancel, plan)).await }
        })
        .await
    }

    /// Reflection hook. Never fails the step: today it logs the outcome
    /// and feeds failure patterns into memory.
    pub(crate) async fn basic_reflection(
        &self,
        step_no: u32,
        plan: &StepPlan,
        exec_err: Option<&anyhow::Error>,
    ) {
        match exec_err {
            Some(err) => {
                tracing::debug!(step = step_no, action = %plan.action, error = %err, "step failed");
                if let Some(memory) = self.memory.as_ref() {
                    memory
                        .record_failure(&plan.action, &plan.selector, &err.to_string(), "")
                        .await;
                }
            }
            None => {
                tracing::debug!(step = step_no, action = %plan.action, "step succeeded");
            }
        }
    }
}
