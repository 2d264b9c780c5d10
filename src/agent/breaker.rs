//! Circuit breakers around flaky dependencies, plus exponential backoff.
//!
//! A breaker trips open after `max_failures` consecutive failures and
//! refuses calls until `reset_timeout` has elapsed; the first call after
//! the window runs as a half-open probe — success closes the breaker,
//! failure re-opens it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::errors::{classify_error, Cancelled, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    max_failures: u32,
    reset_timeout: Duration,
    inner: RwLock<BreakerInner>,
}

struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        let max_failures = if max_failures == 0 { 5 } else { max_failures };
        let reset_timeout = if reset_timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            reset_timeout
        };

        Self {
            max_failures,
            reset_timeout,
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Run `f` if the breaker admits it, and account for the outcome.
    pub async fn call<T, F, Fut>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        {
            let mut inner = self.inner.write().await;
            if inner.state == CircuitState::Open {
                let elapsed_enough = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed_enough {
                    inner.state = CircuitState::HalfOpen;
                    inner.failures = 0;
                } else {
                    anyhow::bail!("circuit breaker is open");
                }
            }
        }

        let result = f().await;

        let mut inner = self.inner.write().await;
        match result {
            Err(err) => {
                inner.failures += 1;
                inner.last_failure = Some(Instant::now());
                if inner.state == CircuitState::HalfOpen || inner.failures >= self.max_failures {
                    inner.state = CircuitState::Open;
                }
                Err(err)
            }
            Ok(value) => {
                if inner.state == CircuitState::HalfOpen {
                    inner.state = CircuitState::Closed;
                }
                inner.failures = 0;
                Ok(value)
            }
        }
    }

    #[allow(dead_code)]
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    #[allow(dead_code)]
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.state = CircuitState::Closed;
        inner.failures = 0;
    }
}

/// Lazily-created breakers keyed by dependency name. Lookup takes the
/// shared lock; only a first-time insert takes the exclusive one.
pub struct CircuitBreakerPool {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerPool {
    pub fn new() -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(key) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().await;
        // Double-checked: another caller may have inserted between locks.
        if let Some(breaker) = breakers.get(key) {
            return breaker.clone();
        }
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(30)));
        breakers.insert(key.to_string(), breaker.clone());
        breaker
    }

    #[allow(dead_code)]
    pub async fn reset_all(&self) {
        let breakers = self.breakers.read().await;
        for breaker in breakers.values() {
            breaker.reset().await;
        }
    }
}

impl Default for CircuitBreakerPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry with exponential backoff: `base · 2^(attempt-1)`, capped at 30s.
/// Critical errors abort immediately; cancellation is honored in sleeps.
#[allow(dead_code)]
pub async fn retry_with_exponential_backoff<T, F, Fut>(
    cancel: &CancellationToken,
    max_retries: u32,
    base_delay: Duration,
    mut f: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_retries = if max_retries == 0 { 3 } else { max_retries };
    let base_delay = if base_delay.is_zero() {
        Duration::from_secs(1)
    } else {
        base_delay
    };
    const MAX_DELAY: Duration = Duration::from_secs(30);

    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 0..max_retries {
        if attempt > 0 {
            let delay = base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1))
                .min(MAX_DELAY);
            tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if classify_error("", &err).kind == ErrorKind::Critical {
                    return Err(err);
                }
                last_err = Some(err);
            }
        }
    }

    let last = last_err.map(|e| e.to_string()).unwrap_or_default();
    Err(anyhow::anyhow!("max retries exceeded: {}", last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn breaker_opens_after_max_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        for _ in 0..3 {
            let _ = breaker
                .call(|| async { Err::<(), _>(anyhow::anyhow!("boom")) })
                .await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Next call is refused without running the function.
        let mut invoked = false;
        let result = breaker
            .call(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;
        assert!(result.unwrap_err().to_string().contains("circuit breaker is open"));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(10));

        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(anyhow::anyhow!("boom")) })
                .await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(10));

        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(anyhow::anyhow!("boom")) })
                .await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _ = breaker
            .call(|| async { Err::<(), _>(anyhow::anyhow!("still broken")) })
            .await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(anyhow::anyhow!("boom")) })
                .await;
        }
        breaker.call(|| async { Ok(()) }).await.unwrap();

        // Two more failures should not trip the breaker after the reset.
        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(anyhow::anyhow!("boom")) })
                .await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn pool_returns_the_same_breaker_for_a_key() {
        let pool = CircuitBreakerPool::new();
        let a = pool.breaker("click").await;
        let b = pool.breaker("click").await;
        assert!(Arc::ptr_eq(&a, &b));

        let other = pool.breaker("navigate").await;
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn backoff_aborts_on_critical() {
        let mut calls = 0u32;
        let result: anyhow::Result<()> = retry_with_exponential_backoff(
            &CancellationToken::new(),
            3,
            Duration::from_millis(1),
            || {
                calls += 1;
                async { anyhow::bail!("fatal state") }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
