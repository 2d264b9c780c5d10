use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::llm::{
    MultiStepPlan, PopupInfo, ReasoningHistory, ReasoningStep, SecurityCheckResult, StepPlan,
};

/// LLM capability consumed by the agent. All methods produce JSON-parseable
/// structured output, log the sanitized prompt/response pair through the
/// task store, and honor cancellation.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Explicit reasoning phase: observation / analysis / strategy /
    /// confidence, no concrete actions.
    async fn reason(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        history: &ReasoningHistory,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<ReasoningStep>;

    /// Reasoning enriched with relevant experience from memory.
    async fn reason_with_context(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        history: &ReasoningHistory,
        memory_context: &str,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<ReasoningStep>;

    /// Legacy planning entrypoint: category-detected prompt, no reasoning
    /// context. Still used by the multi-step planner and specialized agents.
    async fn plan_action(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<StepPlan>;

    /// Preferred planning entrypoint: the latest reasoning step steers the
    /// tool-call choice.
    async fn plan_action_with_reasoning(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        reasoning: Option<&ReasoningStep>,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<StepPlan>;

    async fn plan_multi_step(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        max_steps: u32,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<MultiStepPlan>;

    /// Rebuild the remainder of a failed multi-step plan around the failure.
    #[allow(clippy::too_many_arguments)]
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
    ) -> anyhow::Result<MultiStepPlan>;

    /// Second opinion on an action the rule-based checker flagged.
    async fn check_dangerous_action(
        &self,
        cancel: &CancellationToken,
        action: &str,
        selector: &str,
        value: &str,
        reasoning: &str,
    ) -> anyhow::Result<SecurityCheckResult>;

    /// Identify a popup/modal and its close button from distilled elements.
    async fn analyze_popup(
        &self,
        cancel: &CancellationToken,
        elements: &str,
    ) -> anyhow::Result<PopupInfo>;

    /// Does this text contain personal or secret data?
    async fn check_sensitive_data(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> anyhow::Result<bool>;
}
