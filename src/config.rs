use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, loaded from `webpilot.toml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_tokens_per_hour")]
    pub tokens_per_hour: u32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_tokens_per_hour() -> u32 {
    90_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default)]
    pub user_data_dir: Option<String>,
    /// Default timeout for most driver operations, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Navigation gets a longer window than in-page actions.
    #[serde(default = "default_navigate_timeout_secs")]
    pub navigate_timeout_secs: u64,
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            user_data_dir: None,
            timeout_secs: default_timeout_secs(),
            navigate_timeout_secs: default_navigate_timeout_secs(),
            action_timeout_secs: default_action_timeout_secs(),
        }
    }
}

fn default_headless() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_navigate_timeout_secs() -> u64 {
    60
}
fn default_action_timeout_secs() -> u64 {
    10
}

impl BrowserConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
    pub fn navigate_timeout(&self) -> Duration {
        Duration::from_secs(self.navigate_timeout_secs)
    }
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentSettings {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_confidence_min")]
    pub confidence_min: f64,
    #[serde(default)]
    pub use_subagents: bool,
    #[serde(default)]
    pub use_multi_step: bool,
    #[serde(default = "default_multi_step_size")]
    pub multi_step_size: u32,
    #[serde(default)]
    pub use_memory: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tokens: default_max_tokens(),
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            confidence_min: default_confidence_min(),
            use_subagents: false,
            use_multi_step: false,
            multi_step_size: default_multi_step_size(),
            use_memory: false,
        }
    }
}

fn default_max_steps() -> u32 {
    50
}
fn default_max_tokens() -> usize {
    2000
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    2
}
fn default_confidence_min() -> f64 {
    0.7
}
fn default_multi_step_size() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "webpilot.db".to_string()
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        let mut config: AppConfig = toml::from_str(&content)?;

        // Env var takes precedence over the file so the key never has to
        // live in a checked-in config.
        if let Ok(key) = std::env::var("WEBPILOT_API_KEY") {
            if !key.trim().is_empty() {
                config.llm.api_key = key;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            api_key = "sk-test"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.llm.model, "gpt-4o");
        assert_eq!(cfg.llm.requests_per_minute, 60);
        assert_eq!(cfg.agent.max_steps, 50);
        assert_eq!(cfg.agent.confidence_min, 0.7);
        assert!(cfg.browser.headless);
        assert_eq!(cfg.browser.navigate_timeout_secs, 60);
        assert_eq!(cfg.state.db_path, "webpilot.db");
    }

    #[test]
    fn overrides_are_respected() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            api_key = "sk-test"
            model = "gpt-4o-mini"

            [agent]
            max_steps = 10
            use_multi_step = true
            multi_step_size = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.agent.max_steps, 10);
        assert!(cfg.agent.use_multi_step);
        assert_eq!(cfg.agent.multi_step_size, 4);
    }
}
