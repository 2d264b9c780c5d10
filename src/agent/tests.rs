//! End-to-end scenarios for the step loop and the multi-step executor,
//! driven by scripted capability doubles.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{Agent, AgentConfig};
use crate::llm::MultiStepPlan;
use crate::sanitizer::DataSanitizer;
use crate::testing::{plan, MemStore, ScriptedDriver, ScriptedLlm, ScriptedUserInput};
use crate::traits::{TaskStatus, TaskStore};

fn fast_config() -> AgentConfig {
    AgentConfig {
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

struct Fixture {
    agent: Arc<Agent>,
    llm: Arc<ScriptedLlm>,
    driver: Arc<ScriptedDriver>,
    store: Arc<MemStore>,
    user_input: Arc<ScriptedUserInput>,
}

fn fixture(llm: ScriptedLlm, driver: ScriptedDriver, user_input: ScriptedUserInput, cfg: AgentConfig) -> Fixture {
    let llm = Arc::new(llm);
    let driver = Arc::new(driver);
    let store = Arc::new(MemStore::default());
    let user_input = Arc::new(user_input);

    let agent = Agent::new(
        driver.clone(),
        llm.clone(),
        store.clone(),
        Arc::new(DataSanitizer::new()),
        Some(user_input.clone()),
        cfg,
    );

    Fixture {
        agent,
        llm,
        driver,
        store,
        user_input,
    }
}

#[tokio::test]
async fn happy_path_completes_with_three_steps() {
    let llm = ScriptedLlm::with_plans(vec![
        plan("navigate", "", "https://example.com", "открыть сайт"),
        plan("click", "a[href*='contact']", "", "открыть контакты"),
        plan("complete", "", "", "ссылка найдена"),
    ]);
    let f = fixture(llm, ScriptedDriver::default(), ScriptedUserInput::default(), fast_config());

    let task = f.store.create_task("открой example.com и найди ссылку Contact").await.unwrap();
    let cancel = CancellationToken::new();
    f.agent.execute_task(&cancel, &task).await.unwrap();

    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Completed));

    let steps = f.store.steps_for(task.id);
    assert_eq!(steps.len(), 3);
    let numbers: Vec<i64> = steps.iter().map(|s| s.step_no).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(steps[0].action_type, "navigate");
    assert_eq!(steps[1].action_type, "click");
    assert_eq!(steps[2].action_type, "complete");

    assert_eq!(f.driver.calls_matching("navigate:https://example.com"), 1);
    assert_eq!(f.driver.calls_matching("click:a[href*='contact']"), 1);

    // One reasoning step per loop iteration.
    assert_eq!(f.agent.reasoning_history_len().await, 3);
}

#[tokio::test]
async fn dangerous_action_declined_by_user_is_recorded_and_skipped() {
    let llm = ScriptedLlm::with_plans(vec![
        plan("click", "#delete-account", "", "удалить аккаунт"),
        plan("complete", "", "", "задача завершена"),
    ]);
    let f = fixture(
        llm,
        ScriptedDriver::default(),
        ScriptedUserInput::with_answers(vec!["no"]),
        fast_config(),
    );

    let task = f.store.create_task("delete my account").await.unwrap();
    let cancel = CancellationToken::new();
    f.agent.execute_task(&cancel, &task).await.unwrap();

    // The declined action never reached the driver.
    assert_eq!(f.driver.calls_matching("click:"), 0);

    let steps = f.store.steps_for(task.id);
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].result, "Действие отменено пользователем");
    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Completed));

    // The user saw a confirmation prompt.
    let questions = f.user_input.questions.lock().unwrap();
    assert_eq!(questions.len(), 1);
    assert!(questions[0].contains("Продолжить? (yes/no)"));
}

#[tokio::test]
async fn blocked_domain_requires_confirmation() {
    let llm = ScriptedLlm::with_plans(vec![
        plan("navigate", "", "http://site.example/admin", "открыть админку"),
        plan("complete", "", "", "готово"),
    ]);
    let f = fixture(
        llm,
        ScriptedDriver::default(),
        ScriptedUserInput::with_answers(vec!["no"]),
        fast_config(),
    );

    let task = f.store.create_task("открой админ панель").await.unwrap();
    let cancel = CancellationToken::new();
    f.agent.execute_task(&cancel, &task).await.unwrap();

    assert_eq!(f.driver.calls_matching("navigate:"), 0);

    let steps = f.store.steps_for(task.id);
    assert_eq!(steps[0].result, "Действие отменено пользователем");

    let questions = f.user_input.questions.lock().unwrap();
    assert!(questions[0].contains("ЗАБЛОКИРОВАННЫЙ ДОМЕН"));
}

#[tokio::test]
async fn approved_dangerous_action_executes() {
    let llm = ScriptedLlm::with_plans(vec![
        plan("click", "#delete-spam", "", "удалить спам"),
        plan("complete", "", "", "готово"),
    ]);
    let f = fixture(
        llm,
        ScriptedDriver::default(),
        ScriptedUserInput::with_answers(vec!["да"]),
        fast_config(),
    );

    let task = f.store.create_task("удали спам").await.unwrap();
    let cancel = CancellationToken::new();
    f.agent.execute_task(&cancel, &task).await.unwrap();

    assert_eq!(f.driver.calls_matching("click:#delete-spam"), 1);
    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn timeout_is_retried_until_success() {
    let llm = ScriptedLlm::with_plans(vec![
        plan("click", "#load-more", "", "показать больше"),
        plan("complete", "", "", "готово"),
    ]);
    let driver = ScriptedDriver::with_click_outcomes(vec![
        Err("timeout".to_string()),
        Err("timeout".to_string()),
        Ok(()),
    ]);
    let f = fixture(llm, driver, ScriptedUserInput::default(), fast_config());

    let task = f.store.create_task("прокрути ленту").await.unwrap();
    let cancel = CancellationToken::new();
    f.agent.execute_task(&cancel, &task).await.unwrap();

    // Three underlying invocations, one persisted successful step.
    assert_eq!(f.driver.calls_matching("click:#load-more"), 3);
    let steps = f.store.steps_for(task.id);
    assert_eq!(steps.len(), 2);
    assert!(steps[0].result.contains("Клик по"));
    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn critical_error_in_multi_step_mode_triggers_replan() {
    let llm = ScriptedLlm::default();
    *llm.multi_plans.lock().unwrap() = vec![MultiStepPlan {
        steps: vec![
            plan("navigate", "", "https://example.com", "старт"),
            plan("click", "#step-two", "", "второй шаг"),
            plan("type", "#field", "", "третий шаг"),
            plan("extract_info", "body", "", "четвертый шаг"),
        ],
        overall_strategy: "прямой путь".to_string(),
        fallback_strategy: "replan".to_string(),
        estimated_steps: 4,
    }]
    .into();
    *llm.replans.lock().unwrap() = vec![MultiStepPlan {
        steps: vec![
            plan("click", "#alternative", "", "обходной путь"),
            plan("complete", "", "", "готово"),
        ],
        overall_strategy: "обходная стратегия".to_string(),
        fallback_strategy: String::new(),
        estimated_steps: 2,
    }]
    .into();

    let driver = ScriptedDriver::with_click_outcomes(vec![
        Err("unexpected state".to_string()), // #step-two, critical
        Ok(()),                              // #alternative
    ]);

    let cfg = AgentConfig {
        use_multi_step: true,
        multi_step_size: 5,
        retries: 1,
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let f = fixture(llm, driver, ScriptedUserInput::default(), cfg);

    let task = f.store.create_task("сложная задача").await.unwrap();
    let cancel = CancellationToken::new();
    f.agent.execute_task(&cancel, &task).await.unwrap();

    // Replan was called exactly once, from the failure point, with the
    // remaining budget.
    let replan_calls = f.llm.replan_calls.lock().unwrap();
    assert_eq!(replan_calls.len(), 1);
    assert_eq!(replan_calls[0].failed_action, "click");
    assert!(replan_calls[0].error_message.contains("unexpected state"));
    assert_eq!(replan_calls[0].remaining, 3);
    drop(replan_calls);

    // Execution followed the new plan.
    assert_eq!(f.driver.calls_matching("click:#alternative"), 1);
    assert_eq!(f.driver.calls_matching("type:"), 0);
    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn rate_limit_error_fails_the_task() {
    let llm = ScriptedLlm::default();
    *llm.plans.lock().unwrap() = vec![Err(
        "rate limit exceeded (2 RPM), retry in 30.0s".to_string()
    )]
    .into();
    let f = fixture(llm, ScriptedDriver::default(), ScriptedUserInput::default(), fast_config());

    let task = f.store.create_task("любая задача").await.unwrap();
    let cancel = CancellationToken::new();
    let err = f.agent.execute_task(&cancel, &task).await.unwrap_err();

    assert!(err.to_string().contains("critical planning error"));
    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Failed));
    // The planner was asked exactly once: a rate-limit refusal is not
    // retried.
    assert_eq!(f.llm.plan_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(f.store.steps_for(task.id).is_empty());
}

#[tokio::test]
async fn step_limit_bounds_the_loop_and_fails_the_task() {
    let llm = ScriptedLlm::with_plans(vec![
        plan("click", "#next", "", "дальше"),
        plan("click", "#next", "", "дальше"),
        plan("click", "#next", "", "дальше"),
        plan("click", "#next", "", "дальше"),
        plan("click", "#next", "", "дальше"),
    ]);
    let cfg = AgentConfig {
        max_steps: 3,
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let f = fixture(llm, ScriptedDriver::default(), ScriptedUserInput::default(), cfg);

    let task = f.store.create_task("бесконечная задача").await.unwrap();
    let cancel = CancellationToken::new();
    let err = f.agent.execute_task(&cancel, &task).await.unwrap_err();

    assert!(err.to_string().contains("step limit reached (3)"));
    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Failed));

    // P1/P2: persisted steps are dense, 1..=max_steps.
    let steps = f.store.steps_for(task.id);
    let numbers: Vec<i64> = steps.iter().map(|s| s.step_no).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn cancellation_leaves_task_status_alone() {
    let llm = ScriptedLlm::with_plans(vec![plan("click", "#x", "", "never runs")]);
    let f = fixture(llm, ScriptedDriver::default(), ScriptedUserInput::default(), fast_config());

    let task = f.store.create_task("отменяемая задача").await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = f.agent.execute_task(&cancel, &task).await.unwrap_err();
    assert!(super::is_cancellation(&err));

    // The loop moved the task to running; cancellation must not decide a
    // terminal status.
    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Running));
    assert!(f.store.steps_for(task.id).is_empty());
}

#[tokio::test]
async fn selector_that_is_a_url_is_a_recoverable_step_failure() {
    let llm = ScriptedLlm::with_plans(vec![
        plan("click", "https://example.com", "", "клик по ссылке"),
        plan("complete", "", "", "готово"),
    ]);
    let f = fixture(llm, ScriptedDriver::default(), ScriptedUserInput::default(), fast_config());

    let task = f.store.create_task("открой сайт").await.unwrap();
    let cancel = CancellationToken::new();
    f.agent.execute_task(&cancel, &task).await.unwrap();

    // The invalid selector never reached the driver, the step recorded the
    // failure, and the loop carried on to completion.
    assert_eq!(f.driver.calls_matching("click:"), 0);
    let steps = f.store.steps_for(task.id);
    assert!(steps[0].result.starts_with("Ошибка:"));
    assert!(steps[0].result.contains("navigate"));
    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn routing_delegates_to_mailbox_agent() {
    let llm = ScriptedLlm::with_plans(vec![plan("complete", "", "", "почта разобрана")]);
    let cfg = AgentConfig {
        use_subagents: true,
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let f = fixture(llm, ScriptedDriver::default(), ScriptedUserInput::default(), cfg);

    let task = f.store.create_task("удали спам из почты").await.unwrap();
    let cancel = CancellationToken::new();
    f.agent.execute_task(&cancel, &task).await.unwrap();

    // The specialized path runs without per-step persistence; the wrapper
    // still closes out the task.
    assert!(f.store.steps_for(task.id).is_empty());
    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn memory_replays_a_proven_path_without_planning() {
    let llm = ScriptedLlm::default();
    // No multi-step plan scripted: planning would fail if consulted.
    let cfg = AgentConfig {
        use_multi_step: true,
        use_memory: true,
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    };
    let f = fixture(llm, ScriptedDriver::default(), ScriptedUserInput::default(), cfg);

    // Seed memory with a successful path for this exact task.
    f.agent
        .memory()
        .unwrap()
        .record_success(
            "повтори задачу",
            &[
                plan("navigate", "", "https://example.com", "старт"),
                plan("complete", "", "", "готово"),
            ],
            "проверенный путь",
            Duration::from_secs(3),
            "",
        )
        .await;

    let task = f.store.create_task("повтори задачу").await.unwrap();
    let cancel = CancellationToken::new();
    f.agent.execute_task(&cancel, &task).await.unwrap();

    assert_eq!(f.driver.calls_matching("navigate:https://example.com"), 1);
    assert!(f.llm.multi_plans.lock().unwrap().is_empty());
    assert_eq!(f.store.task_status(task.id), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn sanitizer_runs_before_step_persistence() {
    let llm = ScriptedLlm::with_plans(vec![
        plan(
            "type",
            "#comment",
            "text",
            "ввести комментарий для user@example.com",
        ),
        plan("complete", "", "", "готово"),
    ]);
    let f = fixture(llm, ScriptedDriver::default(), ScriptedUserInput::default(), fast_config());

    let task = f.store.create_task("оставь комментарий").await.unwrap();
    let cancel = CancellationToken::new();
    f.agent.execute_task(&cancel, &task).await.unwrap();

    let steps = f.store.steps_for(task.id);
    assert!(steps[0].reasoning.contains("[FILTERED_EMAIL]"));
    assert!(!steps[0].reasoning.contains("user@example.com"));
}
