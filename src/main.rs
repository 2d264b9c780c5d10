mod agent;
mod browser;
mod config;
mod llm;
mod sanitizer;
mod state;
mod traits;
mod utils;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::agent::{Agent, AgentConfig};
use crate::browser::ChromiumDriver;
use crate::config::AppConfig;
use crate::llm::OpenAiClient;
use crate::sanitizer::{DataSanitizer, SensitiveDataChecker};
use crate::state::SqliteTaskStore;
use crate::traits::{TaskStore, UserInput};

/// Terminal question prompt. Runs the blocking read off the runtime and
/// abandons it when the task is cancelled.
struct TerminalInput;

#[async_trait]
impl UserInput for TerminalInput {
    async fn ask(&self, cancel: &CancellationToken, question: &str) -> anyhow::Result<String> {
        println!("\n{}", question);
        let read = tokio::task::spawn_blocking(|| {
            dialoguer::Input::<String>::new()
                .with_prompt(">")
                .allow_empty(true)
                .interact_text()
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(crate::agent::Cancelled.into()),
            result = read => Ok(result??),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chromiumoxide=off")),
        )
        .init();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let task_text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if task_text.trim().is_empty() {
        anyhow::bail!("usage: webpilot <task text>");
    }

    let config_path = std::env::var("WEBPILOT_CONFIG").unwrap_or_else(|_| "webpilot.toml".to_string());
    let config = AppConfig::load(Path::new(&config_path))?;

    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(&config.state.db_path).await?);
    let client = OpenAiClient::new(&config.llm, Some(store.clone()))?;
    let sanitizer = Arc::new(DataSanitizer::with_ai(
        client.clone() as Arc<dyn SensitiveDataChecker>
    ));
    let driver = Arc::new(ChromiumDriver::new(config.browser.clone()));

    let agent = Agent::new(
        driver,
        client,
        store.clone(),
        sanitizer,
        Some(Arc::new(TerminalInput)),
        AgentConfig::from(&config.agent),
    );

    let task = store.create_task(&task_text).await?;
    info!(task_id = task.id, "task created");

    // Ctrl-C cancels the running task; the loop exits at the next phase
    // boundary and the task keeps its non-terminal status.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    match agent.execute_task(&cancel, &task).await {
        Ok(()) => {
            let finished = store.get_task(task.id).await?;
            println!("\nЗадача завершена: {}", finished.result_summary);
            Ok(())
        }
        Err(e) if agent::is_cancellation(&e) => {
            println!("\nЗадача отменена");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
