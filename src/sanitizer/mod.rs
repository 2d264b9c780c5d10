//! Redaction pipeline for everything that reaches persistent logs.
//!
//! An ordered chain of independent rules; each rule substitutes redacted
//! placeholders and passes the text on. Order matters: token-shaped rules
//! run before the email rule so a credential is never partially consumed
//! as an address.

mod ai;
mod rules;

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

pub use ai::{AiRule, SensitiveDataChecker};
use rules::{
    AddressRule, ApiKeyRule, CardRule, CookieRule, EmailRule, PasswordRule, PhoneRule, TokenRule,
};

#[async_trait]
pub trait SanitizerRule: Send + Sync {
    async fn apply(&self, text: String) -> String;
}

pub struct DataSanitizer {
    rules: Vec<Box<dyn SanitizerRule>>,
}

fn base_rules() -> Vec<Box<dyn SanitizerRule>> {
    vec![
        Box::new(PasswordRule),
        Box::new(TokenRule),
        Box::new(CookieRule),
        Box::new(CardRule),
        Box::new(ApiKeyRule),
        Box::new(EmailRule),
        Box::new(PhoneRule),
        Box::new(AddressRule),
    ]
}

impl DataSanitizer {
    pub fn new() -> Self {
        Self { rules: base_rules() }
    }

    /// Regex rules plus the LLM-gated rule for strings that only look
    /// suspicious.
    pub fn with_ai(checker: Arc<dyn SensitiveDataChecker>) -> Self {
        let mut rules = base_rules();
        rules.push(Box::new(AiRule::new(checker)));
        Self { rules }
    }

    /// Run the full chain over the text.
    pub async fn sanitize(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut result = text.to_string();
        for rule in &self.rules {
            result = rule.apply(result).await;
        }
        result
    }

    /// Selectors are replaced wholesale when they reference a sensitive
    /// field — the selector itself leaks what was typed where.
    pub fn sanitize_selector(&self, selector: &str) -> String {
        if selector.is_empty() {
            return String::new();
        }

        let lower = selector.to_lowercase();
        const SENSITIVE_KEYWORDS: &[&str] = &[
            "password", "пароль", "token", "api-key", "api_key", "email", "phone", "телефон",
            "address", "адрес",
        ];

        if SENSITIVE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            return "[FILTERED_SELECTOR]".to_string();
        }

        selector.to_string()
    }

    /// Values typed into the page: short values are checked against the
    /// keyword list and a random-token heuristic before the regular chain.
    pub async fn sanitize_value(&self, value: &str) -> String {
        if value.is_empty() {
            return String::new();
        }

        if value.len() <= 50 && looks_like_sensitive_value(value) {
            return "[FILTERED]".to_string();
        }

        self.sanitize(value).await
    }
}

impl Default for DataSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

static SINGLE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

fn looks_like_sensitive_value(value: &str) -> bool {
    let lower = value.to_lowercase();
    const SENSITIVE_PATTERNS: &[&str] = &[
        "password", "пароль", "token", "api", "secret", "card", "cvv", "cvc", "expir", "session",
        "email", "phone", "телефон", "address", "адрес",
    ];

    if SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }

    // A long single alphanumeric token is most likely a credential.
    value.len() > 20 && SINGLE_TOKEN.is_match(value)
}
