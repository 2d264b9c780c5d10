use std::time::Instant;

use tokio::sync::Mutex;

/// Token-bucket limits on LLM usage: requests per minute and tokens per
/// hour. The two buckets are independent and never locked together.
pub struct RateLimiter {
    requests_per_minute: u32,
    tokens_per_hour: u32,
    request_bucket: Mutex<Bucket>,
    token_bucket: Mutex<Bucket>,
}

struct Bucket {
    available: f64,
    capacity: f64,
    last_check: Instant,
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Self {
            available: capacity,
            capacity,
            last_check: Instant::now(),
        }
    }

    /// Refill proportionally to the time elapsed since the last check.
    fn refill(&mut self, per_second: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_check).as_secs_f64();
        self.available = (self.available + elapsed * per_second).min(self.capacity);
        self.last_check = now;
    }
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, tokens_per_hour: u32) -> Self {
        let rpm = if requests_per_minute == 0 {
            60
        } else {
            requests_per_minute
        };
        let tph = if tokens_per_hour == 0 {
            90_000
        } else {
            tokens_per_hour
        };

        Self {
            requests_per_minute: rpm,
            tokens_per_hour: tph,
            request_bucket: Mutex::new(Bucket::new(rpm as f64)),
            token_bucket: Mutex::new(Bucket::new(tph as f64)),
        }
    }

    /// Admit one request or fail with a wait hint.
    pub async fn allow_request(&self) -> anyhow::Result<()> {
        let mut bucket = self.request_bucket.lock().await;
        bucket.refill(self.requests_per_minute as f64 / 60.0);

        if bucket.available < 1.0 {
            let wait_secs = 60.0 / self.requests_per_minute as f64;
            anyhow::bail!(
                "rate limit exceeded ({} RPM), retry in {:.1}s",
                self.requests_per_minute,
                wait_secs
            );
        }

        bucket.available -= 1.0;
        Ok(())
    }

    /// Admit an estimated token cost or fail with a wait hint.
    pub async fn allow_tokens(&self, tokens: u32) -> anyhow::Result<()> {
        let mut bucket = self.token_bucket.lock().await;
        bucket.refill(self.tokens_per_hour as f64 / 3600.0);

        if bucket.available < tokens as f64 {
            let deficit = tokens as f64 - bucket.available;
            let wait_secs = deficit / (self.tokens_per_hour as f64 / 3600.0);
            anyhow::bail!(
                "token limit exceeded ({} TPH): {} requested, {:.0} available, retry in {:.0}s",
                self.tokens_per_hour,
                tokens,
                bucket.available,
                wait_secs
            );
        }

        bucket.available -= tokens as f64;
        Ok(())
    }

    /// Correct the budget with the actual usage after a response arrives.
    /// A positive delta (actual > estimate) draws the bucket down further;
    /// a negative delta refunds the over-estimate.
    pub async fn consume_tokens(&self, delta: i64) {
        let mut bucket = self.token_bucket.lock().await;
        bucket.available = (bucket.available - delta as f64).clamp(0.0, bucket.capacity);
    }

    /// Currently available (requests, tokens) after refill.
    #[allow(dead_code)]
    pub async fn stats(&self) -> (u32, u32) {
        let requests = {
            let mut bucket = self.request_bucket.lock().await;
            bucket.refill(self.requests_per_minute as f64 / 60.0);
            bucket.available as u32
        };
        let tokens = {
            let mut bucket = self.token_bucket.lock().await;
            bucket.refill(self.tokens_per_hour as f64 / 3600.0);
            bucket.available as u32
        };
        (requests, tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_config_falls_back_to_defaults() {
        let limiter = RateLimiter::new(0, 0);
        let (requests, tokens) = limiter.stats().await;
        assert_eq!(requests, 60);
        assert_eq!(tokens, 90_000);
    }

    #[tokio::test]
    async fn request_bucket_exhausts() {
        let limiter = RateLimiter::new(2, 90_000);
        assert!(limiter.allow_request().await.is_ok());
        assert!(limiter.allow_request().await.is_ok());

        let err = limiter.allow_request().await.unwrap_err();
        assert!(err.to_string().contains("rate limit exceeded"));
        assert!(err.to_string().contains("2 RPM"));
    }

    #[tokio::test]
    async fn token_bucket_tracks_estimates() {
        let limiter = RateLimiter::new(60, 1000);
        assert!(limiter.allow_tokens(600).await.is_ok());

        let err = limiter.allow_tokens(600).await.unwrap_err();
        assert!(err.to_string().contains("token limit exceeded"));

        assert!(limiter.allow_tokens(300).await.is_ok());
    }

    #[tokio::test]
    async fn consume_corrects_drift() {
        let limiter = RateLimiter::new(60, 1000);
        limiter.allow_tokens(400).await.unwrap();

        // Actual usage came in 100 tokens under the estimate: refund.
        limiter.consume_tokens(-100).await;
        let (_, tokens) = limiter.stats().await;
        assert!(tokens >= 700);

        // Overdraw beyond the estimate draws down, floored at zero.
        limiter.consume_tokens(10_000).await;
        let (_, tokens) = limiter.stats().await;
        assert!(tokens <= 1);
    }
}
