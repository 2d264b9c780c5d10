use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Channel back to the human during task execution — used to confirm
/// dangerous actions and to answer `ask_user` plans. May block until the
/// user responds; must return early when the token is cancelled.
#[async_trait]
pub trait UserInput: Send + Sync {
    async fn ask(&self, cancel: &CancellationToken, question: &str) -> anyhow::Result<String>;
}
