//! AI-backed sanitizer rule. Regex rules catch the known shapes; this rule
//! asks the LLM about strings that merely look suspicious (long blobs,
//! secret-adjacent keywords, high-entropy tokens). Verdicts are cached so
//! repeated log lines don't burn tokens.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::SanitizerRule;

/// The slice of the LLM capability this rule needs. The concrete client
/// implements it with its own short timeout so a slow model never stalls
/// the logging path.
#[async_trait]
pub trait SensitiveDataChecker: Send + Sync {
    async fn check_sensitive_data(&self, text: &str) -> anyhow::Result<bool>;
}

pub struct AiRule {
    checker: Arc<dyn SensitiveDataChecker>,
    cache: RwLock<HashMap<String, CachedVerdict>>,
    cache_ttl: Duration,
}

struct CachedVerdict {
    sensitive: bool,
    stored_at: DateTime<Utc>,
}

impl AiRule {
    pub fn new(checker: Arc<dyn SensitiveDataChecker>) -> Self {
        Self {
            checker,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(24 * 3600),
        }
    }

    /// Cheap pre-filter: only strings that plausibly carry a secret are
    /// worth an LLM round-trip.
    fn is_suspicious(text: &str) -> bool {
        if text.len() < 10 {
            return false;
        }
        if text.len() > 500 {
            return true;
        }

        let lower = text.to_lowercase();
        if ["password", "пароль", "token", "secret", "key"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            return true;
        }

        text.len() > 30 && Self::looks_like_random_string(text)
    }

    fn looks_like_random_string(text: &str) -> bool {
        if text.len() <= 20 {
            return false;
        }
        let alphanumeric = text
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .count();
        alphanumeric as f64 / text.chars().count() as f64 > 0.8
    }

    async fn check_with_cache(&self, text: &str) -> anyhow::Result<bool> {
        // Key by length: identical log lines repeat constantly and near
        // misses of the same shape share a verdict.
        let key = text.len().to_string();

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.get(&key) {
                let age = Utc::now().signed_duration_since(cached.stored_at);
                if age.to_std().map(|d| d < self.cache_ttl).unwrap_or(false) {
                    return Ok(cached.sensitive);
                }
            }
        }

        let sensitive = self.checker.check_sensitive_data(text).await?;

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            key,
            CachedVerdict {
                sensitive,
                stored_at: Utc::now(),
            },
        );

        Ok(sensitive)
    }

    fn mask_suspicious(text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= 20 {
            return "[FILTERED]".to_string();
        }
        if chars.len() <= 50 {
            let head: String = chars[..5].iter().collect();
            let tail: String = chars[chars.len() - 5..].iter().collect();
            return format!("{}...{} [FILTERED]", head, tail);
        }
        let head: String = chars[..10].iter().collect();
        let tail: String = chars[chars.len() - 10..].iter().collect();
        format!("{}...[FILTERED]...{}", head, tail)
    }
}

#[async_trait]
impl SanitizerRule for AiRule {
    async fn apply(&self, text: String) -> String {
        if !Self::is_suspicious(&text) {
            return text;
        }

        match self.check_with_cache(&text).await {
            Ok(true) => Self::mask_suspicious(&text),
            // On LLM failure keep the text: the regex rules already ran.
            Ok(false) | Err(_) => text,
        }
    }
}
