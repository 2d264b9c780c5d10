//! Error classification and the plain retry helper.
//!
//! Driver and LLM errors arrive as strings from many layers, so
//! classification is substring-based: network-ish failures are retryable,
//! missing elements are temporary (the page may still be settling), and
//! everything else aborts.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Temporary,
    Critical,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Retryable => write!(f, "retryable"),
            ErrorKind::Temporary => write!(f, "temporary"),
            ErrorKind::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{action}: {message}")]
pub struct ActionError {
    pub kind: ErrorKind,
    pub action: String,
    pub message: String,
}

/// Marker error for cooperative cancellation. The caller decides the
/// task's final status; the loop never maps this to `failed` on its own.
#[derive(Debug, thiserror::Error)]
#[error("task cancelled")]
pub struct Cancelled;

pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.is::<Cancelled>()
}

pub fn classify_error(action: &str, err: &anyhow::Error) -> ActionError {
    let message = err.to_string();
    let lower = message.to_lowercase();

    let kind = if lower.contains("timeout")
        || lower.contains("network")
        || lower.contains("connection")
        || message.contains("ECONNREFUSED")
        || message.contains("ETIMEDOUT")
    {
        ErrorKind::Retryable
    } else if lower.contains("not found") || lower.contains("selector") || lower.contains("element")
    {
        ErrorKind::Temporary
    } else {
        ErrorKind::Critical
    };

    ActionError {
        kind,
        action: action.to_string(),
        message,
    }
}

pub fn is_critical_error(err: &anyhow::Error) -> bool {
    classify_error("", err).kind == ErrorKind::Critical
}

/// Retry with a fixed delay between attempts. A classified-critical error
/// aborts immediately; cancellation is honored inside the sleeps.
pub async fn retry_action<T, F, Fut>(
    cancel: &CancellationToken,
    max_retries: u32,
    delay: Duration,
    mut f: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 0..max_retries {
        if attempt > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if is_cancellation(&err) || classify_error("", &err).kind == ErrorKind::Critical {
                    return Err(err);
                }
                last_err = Some(err);
            }
        }
    }

    let last = last_err.map(|e| e.to_string()).unwrap_or_default();
    Err(anyhow::anyhow!("after {} attempts: {}", max_retries, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn network_errors_are_retryable() {
        for msg in ["request timeout", "network unreachable", "ECONNREFUSED", "connection reset"] {
            let err = anyhow::anyhow!("{}", msg);
            assert_eq!(classify_error("click", &err).kind, ErrorKind::Retryable, "{msg}");
        }
    }

    #[test]
    fn missing_elements_are_temporary() {
        for msg in ["element not found", "no matching selector", "stale element"] {
            let err = anyhow::anyhow!("{}", msg);
            assert_eq!(classify_error("click", &err).kind, ErrorKind::Temporary, "{msg}");
        }
    }

    #[test]
    fn everything_else_is_critical() {
        let err = anyhow::anyhow!("unexpected browser state");
        assert_eq!(classify_error("click", &err).kind, ErrorKind::Critical);
        assert!(is_critical_error(&err));
    }

    #[tokio::test]
    async fn retry_succeeds_on_later_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry_action(
            &CancellationToken::new(),
            3,
            Duration::from_millis(1),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        anyhow::bail!("timeout")
                    }
                    Ok(42)
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn critical_error_aborts_retries() {
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry_action(
            &CancellationToken::new(),
            3,
            Duration::from_millis(1),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { anyhow::bail!("unexpected state") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempt_count() {
        let result: anyhow::Result<()> = retry_action(
            &CancellationToken::new(),
            2,
            Duration::from_millis(1),
            || async { anyhow::bail!("timeout") },
        )
        .await;
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("after 2 attempts"));
        assert!(msg.contains("timeout"));
    }

    #[tokio::test]
    async fn cancellation_is_honored_in_sleep() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: anyhow::Result<()> = retry_action(&cancel, 3, Duration::from_secs(60), || async {
            anyhow::bail!("timeout")
        })
        .await;
        assert!(is_cancellation(&result.unwrap_err()));
    }
}
