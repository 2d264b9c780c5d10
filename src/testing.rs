//! Shared test doubles: scripted LLM, driver, store, and user input.
//! Compiled only for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::llm::{
    MultiStepPlan, PopupInfo, ReasoningHistory, ReasoningStep, SecurityCheckResult, StepPlan,
};
use crate::traits::{
    AgentStep, BrowserDriver, FormField, LlmClient, LlmLogEntry, LoadState, NewStep, PageSnapshot,
    Task, TaskStatus, TaskStore, UserInput,
};

pub fn plan(action: &str, selector: &str, value: &str, reasoning: &str) -> StepPlan {
    StepPlan {
        action: action.to_string(),
        selector: selector.to_string(),
        value: value.to_string(),
        reasoning: reasoning.to_string(),
        parameters: Default::default(),
    }
}

/// LLM double driven by queues of scripted responses.
pub struct ScriptedLlm {
    pub plans: Mutex<VecDeque<Result<StepPlan, String>>>,
    pub multi_plans: Mutex<VecDeque<MultiStepPlan>>,
    pub replans: Mutex<VecDeque<MultiStepPlan>>,
    pub replan_calls: Mutex<Vec<ReplanCall>>,
    pub danger_verdict: SecurityCheckResult,
    pub reason_calls: AtomicUsize,
    pub plan_calls: AtomicUsize,
}

pub struct ReplanCall {
    pub failed_action: String,
    pub error_message: String,
    pub remaining: u32,
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self {
            plans: Mutex::new(VecDeque::new()),
            multi_plans: Mutex::new(VecDeque::new()),
            replans: Mutex::new(VecDeque::new()),
            replan_calls: Mutex::new(Vec::new()),
            danger_verdict: SecurityCheckResult {
                is_dangerous: true,
                reason: "scripted verdict".to_string(),
                message: "scripted danger detail".to_string(),
            },
            reason_calls: AtomicUsize::new(0),
            plan_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedLlm {
    pub fn with_plans(plans: Vec<StepPlan>) -> Self {
        let scripted = Self::default();
        *scripted.plans.lock().unwrap() = plans.into_iter().map(Ok).collect();
        scripted
    }

    fn next_plan(&self) -> anyhow::Result<StepPlan> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        match self.plans.lock().unwrap().pop_front() {
            Some(Ok(plan)) => Ok(plan),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            // Script exhausted: the model considers the task done.
            None => Ok(plan("complete", "", "", "nothing left to do")),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn reason(
        &self,
        _cancel: &CancellationToken,
        _task: &str,
        _page_context: &str,
        _history: &ReasoningHistory,
        _task_id: Option<i64>,
        _step_id: Option<i64>,
    ) -> anyhow::Result<ReasoningStep> {
        self.reason_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ReasoningStep {
            observation: "scripted observation".to_string(),
            analysis: "scripted analysis".to_string(),
            strategy: "scripted strategy".to_string(),
            confidence: 0.8,
            ..Default::default()
        })
    }

    async fn reason_with_context(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
        history: &ReasoningHistory,
        _memory_context: &str,
        task_id: Option<i64>,
        step_id: Option<i64>,
    ) -> anyhow::Result<ReasoningStep> {
        self.reason(cancel, task, page_context, history, task_id, step_id)
            .await
    }

    async fn plan_action(
        &self,
        _cancel: &CancellationToken,
        _task: &str,
        _page_context: &str,
        _task_id: Option<i64>,
        _step_id: Option<i64>,
    ) -> anyhow::Result<StepPlan> {
        self.next_plan()
    }

    async fn plan_action_with_reasoning(
        &self,
        _cancel: &CancellationToken,
        _task: &str,
        _page_context: &str,
        _reasoning: Option<&ReasoningStep>,
        _task_id: Option<i64>,
        _step_id: Option<i64>,
    ) -> anyhow::Result<StepPlan> {
        self.next_plan()
    }

    async fn plan_multi_step(
        &self,
        _cancel: &CancellationToken,
        _task: &str,
        _page_context: &str,
        _max_steps: u32,
        _task_id: Option<i64>,
        _step_id: Option<i64>,
    ) -> anyhow::Result<MultiStepPlan> {
        self.multi_plans
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted multi-step plan"))
    }

    #[allow(clippy::too_many_arguments)]
    async fn replan(
        &self,
        _cancel: &CancellationToken,
        _task: &str,
        _page_context: &str,
        _original_plan: &MultiStepPlan,
        failed_step: &StepPlan,
        error_message: &str,
        max_steps: u32,
        _task_id: Option<i64>,
        _step_id: Option<i64>,
    ) -> anyhow::Result<MultiStepPlan> {
        self.replan_calls.lock().unwrap().push(ReplanCall {
            failed_action: failed_step.action.clone(),
            error_message: error_message.to_string(),
            remaining: max_steps,
        });
        self.replans
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted replan"))
    }

    async fn check_dangerous_action(
        &self,
        _cancel: &CancellationToken,
        _action: &str,
        _selector: &str,
        _value: &str,
        _reasoning: &str,
    ) -> anyhow::Result<SecurityCheckResult> {
        Ok(self.danger_verdict.clone())
    }

    async fn analyze_popup(
        &self,
        _cancel: &CancellationToken,
        _elements: &str,
    ) -> anyhow::Result<PopupInfo> {
        Ok(PopupInfo::default())
    }

    async fn check_sensitive_data(
        &self,
        _cancel: &CancellationToken,
        _text: &str,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Driver double recording every invocation; click outcomes can be
/// scripted to fail.
#[derive(Default)]
pub struct ScriptedDriver {
    pub snapshot: PageSnapshot,
    pub click_outcomes: Mutex<VecDeque<Result<(), String>>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedDriver {
    pub fn with_click_outcomes(outcomes: Vec<Result<(), String>>) -> Self {
        Self {
            click_outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn launch(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.record("launch".to_string());
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.record("close".to_string());
        Ok(())
    }

    async fn navigate(&self, _cancel: &CancellationToken, url: &str) -> anyhow::Result<()> {
        self.record(format!("navigate:{}", url));
        Ok(())
    }

    async fn click(&self, _cancel: &CancellationToken, selector: &str) -> anyhow::Result<()> {
        self.record(format!("click:{}", selector));
        match self.click_outcomes.lock().unwrap().pop_front() {
            Some(Ok(())) | None => Ok(()),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
        }
    }

    async fn type_text(
        &self,
        _cancel: &CancellationToken,
        selector: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        self.record(format!("type:{}:{}", selector, text));
        Ok(())
    }

    async fn page_html(&self, _cancel: &CancellationToken) -> anyhow::Result<String> {
        self.record("page_html".to_string());
        Ok("<button id=\"go\">Go</button>".to_string())
    }

    async fn page_snapshot(&self, _cancel: &CancellationToken) -> anyhow::Result<PageSnapshot> {
        self.record("page_snapshot".to_string());
        Ok(self.snapshot.clone())
    }

    async fn wait_for_selector(
        &self,
        _cancel: &CancellationToken,
        _selector: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn wait_for_load_state(
        &self,
        _cancel: &CancellationToken,
        _state: LoadState,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close_popups(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    async fn find_form_fields(
        &self,
        _cancel: &CancellationToken,
        _form_selector: &str,
    ) -> anyhow::Result<Vec<FormField>> {
        Ok(Vec::new())
    }

    async fn fill_form_field(
        &self,
        _cancel: &CancellationToken,
        _selector: &str,
        _value: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn submit_form(
        &self,
        _cancel: &CancellationToken,
        _form_selector: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn validate_form(
        &self,
        _cancel: &CancellationToken,
        _form_selector: &str,
    ) -> anyhow::Result<(bool, Vec<String>)> {
        Ok((true, Vec::new()))
    }

    async fn wait_for_navigation(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    async fn wait_for_request(
        &self,
        _cancel: &CancellationToken,
        _url_pattern: &str,
        _timeout: Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn wait_for_response(
        &self,
        _cancel: &CancellationToken,
        _url_pattern: &str,
        _timeout: Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn wait_for_network_idle(
        &self,
        _cancel: &CancellationToken,
        _timeout: Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn scroll_to_element(
        &self,
        _cancel: &CancellationToken,
        _selector: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory task store.
#[derive(Default)]
pub struct MemStore {
    pub tasks: Mutex<HashMap<i64, Task>>,
    pub steps: Mutex<Vec<AgentStep>>,
    pub logs: Mutex<Vec<LlmLogEntry>>,
    next_task_id: AtomicUsize,
    next_step_id: AtomicUsize,
}

impl MemStore {
    pub fn task_status(&self, id: i64) -> Option<TaskStatus> {
        self.tasks.lock().unwrap().get(&id).map(|t| t.status)
    }

    pub fn steps_for(&self, task_id: i64) -> Vec<AgentStep> {
        let mut steps: Vec<AgentStep> = self
            .steps
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_no);
        steps
    }
}

#[async_trait]
impl TaskStore for MemStore {
    async fn create_task(&self, user_input: &str) -> anyhow::Result<Task> {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        let task = Task {
            id,
            user_input: user_input.to_string(),
            status: TaskStatus::Pending,
            result_summary: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.tasks.lock().unwrap().insert(id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: i64) -> anyhow::Result<Task> {
        self.tasks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("task {} not found", id))
    }

    async fn list_tasks(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|t| std::cmp::Reverse(t.id));
        Ok(tasks
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        summary: &str,
    ) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("task {} not found", id))?;
        task.status = status;
        task.result_summary = summary.to_string();
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn create_step(&self, step: &NewStep) -> anyhow::Result<i64> {
        let id = self.next_step_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        self.steps.lock().unwrap().push(AgentStep {
            id,
            task_id: step.task_id,
            step_no: step.step_no,
            action_type: step.action_type.clone(),
            target_selector: step.target_selector.clone(),
            reasoning: step.reasoning.clone(),
            result: step.result.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn steps_for_task(&self, task_id: i64) -> anyhow::Result<Vec<AgentStep>> {
        Ok(self.steps_for(task_id))
    }

    async fn log_llm_request(&self, entry: &LlmLogEntry) -> anyhow::Result<()> {
        self.logs.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// User-input double: scripted answers, default "yes".
#[derive(Default)]
pub struct ScriptedUserInput {
    pub answers: Mutex<VecDeque<String>>,
    pub questions: Mutex<Vec<String>>,
}

impl ScriptedUserInput {
    pub fn with_answers(answers: Vec<&str>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(String::from).collect()),
            questions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl UserInput for ScriptedUserInput {
    async fn ask(&self, _cancel: &CancellationToken, question: &str) -> anyhow::Result<String> {
        self.questions.lock().unwrap().push(question.to_string());
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "yes".to_string()))
    }
}
