use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One planned action. `value` carries the typed text for `type`, the URL
/// for `navigate`, and the question for `ask_user`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepPlan {
    pub action: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// A batch plan produced by `plan_multi_step` / `replan`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiStepPlan {
    #[serde(default)]
    pub steps: Vec<StepPlan>,
    #[serde(default)]
    pub overall_strategy: String,
    #[serde(default)]
    pub fallback_strategy: String,
    #[serde(default)]
    pub estimated_steps: u32,
}

/// One step of explicit reasoning — what the agent sees, how it reads the
/// situation, and the strategy it commits to before any action is planned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub observation: String,
    pub analysis: String,
    pub strategy: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncertainties: Vec<String>,
    #[serde(default)]
    pub requires_user_input: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason_for_user_input: String,
}

/// Reasoning steps of the current task, in execution order. Cleared when
/// the task ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningHistory {
    pub steps: Vec<ReasoningStep>,
}

impl ReasoningHistory {
    pub fn add_step(&mut self, step: ReasoningStep) {
        self.steps.push(step);
    }

    pub fn last_step(&self) -> Option<&ReasoningStep> {
        self.steps.last()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// JSON rendering for embedding into prompts.
    pub fn to_json(&self) -> String {
        if self.steps.is_empty() {
            return "[]".to_string();
        }
        serde_json::to_string_pretty(&self.steps).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Verdict of the LLM security double-check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityCheckResult {
    pub is_dangerous: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Result of popup analysis over distilled page elements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PopupInfo {
    pub has_popup: bool,
    #[serde(default)]
    pub close_selector: String,
    #[serde(default)]
    pub popup_description: String,
    #[serde(default)]
    pub reasoning: String,
}
