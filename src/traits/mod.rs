//! Capability traits consumed by the agent core.
//!
//! The core never talks to a concrete browser, LLM endpoint, database, or
//! terminal directly — it consumes these traits. Concrete implementations
//! live in `browser/`, `llm/`, `state/`, and `main.rs`.

mod browser;
mod llm;
mod store;
mod user_input;

pub use browser::{BrowserDriver, ElementInfo, FormField, LoadState, PageSnapshot, ViewportBounds};
pub use llm::LlmClient;
pub use store::{AgentStep, LlmLogEntry, NewStep, Task, TaskStatus, TaskStore};
pub use user_input::UserInput;
