//! Rule-based danger detection with an optional LLM double-check, and the
//! confirmation text shown to the user.
//!
//! The verdict is monotone: once the rules flag an action, no LLM opinion
//! can clear it — the model only gets to sharpen the explanation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::domains::{check_domain_security, DomainSecurityLevel};
use crate::traits::LlmClient;

struct DangerousPattern {
    keywords: &'static [&'static str],
    description: &'static str,
    severity: Severity,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Severity {
    High,
    Medium,
}

const DANGEROUS_PATTERNS: &[DangerousPattern] = &[
    DangerousPattern {
        keywords: &[
            "pay", "payment", "купить", "оплат", "card", "карт", "checkout", "purchase", "buy",
            "transaction",
        ],
        description: "Финансовая операция или платеж",
        severity: Severity::High,
    },
    DangerousPattern {
        keywords: &["delete", "remove", "удал", "очист", "trash", "erase", "destroy"],
        description: "Удаление данных или контента",
        severity: Severity::High,
    },
    DangerousPattern {
        keywords: &[
            "password", "пароль", "security", "безопасност", "account", "аккаунт", "settings",
            "настройк",
        ],
        description: "Изменение критичных настроек аккаунта",
        severity: Severity::High,
    },
    DangerousPattern {
        keywords: &[
            "submit", "send", "отправ", "transfer", "перевод", "share", "публик", "publish",
        ],
        description: "Отправка или публикация данных",
        severity: Severity::Medium,
    },
    DangerousPattern {
        keywords: &["confirm", "подтверд", "accept", "принять", "agree", "соглас"],
        description: "Подтверждение необратимого действия",
        severity: Severity::Medium,
    },
];

const DANGEROUS_SELECTOR_PARTS: &[&str] = &[
    "delete", "удал", "remove", "trash", "confirm", "подтверд", "accept", "payment", "оплат",
    "checkout", "buy",
];

pub struct SecurityChecker {
    llm: Option<Arc<dyn LlmClient>>,
}

impl SecurityChecker {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    /// Keyword scan over the combined action text. Only high-severity
    /// family hits flag on keywords alone; medium families rely on the
    /// selector check.
    fn check_rule_based(
        &self,
        action: &str,
        selector: &str,
        value: &str,
        reasoning: &str,
    ) -> Option<String> {
        let combined = format!("{} {} {} {}", action, selector, value, reasoning).to_lowercase();

        for pattern in DANGEROUS_PATTERNS {
            for keyword in pattern.keywords {
                if combined.contains(keyword) && pattern.severity == Severity::High {
                    return Some(format!(
                        "Обнаружен паттерн опасного действия: {} (ключевое слово: '{}')",
                        pattern.description, keyword
                    ));
                }
            }
        }

        if self.is_dangerous_selector(selector) {
            return Some(
                "Обнаружен селектор критичного элемента (кнопка удаления, подтверждения платежа и т.д.)"
                    .to_string(),
            );
        }

        None
    }

    fn is_dangerous_selector(&self, selector: &str) -> bool {
        let selector_lower = selector.to_lowercase();
        DANGEROUS_SELECTOR_PARTS
            .iter()
            .any(|part| selector_lower.contains(part))
    }

    /// Full three-layer verdict: domain policy (navigate only), keyword
    /// rules, then the LLM double-check. Returns (dangerous, message).
    pub async fn is_dangerous_action(
        &self,
        cancel: &CancellationToken,
        action: &str,
        selector: &str,
        value: &str,
        reasoning: &str,
    ) -> (bool, String) {
        if action == "navigate" && !value.is_empty() {
            let domain_sec = check_domain_security(value);
            match domain_sec.level {
                DomainSecurityLevel::Blocked => {
                    return (
                        true,
                        format!(
                            "ЗАБЛОКИРОВАННЫЙ ДОМЕН: {}. {}",
                            domain_sec.description, domain_sec.reason
                        ),
                    );
                }
                DomainSecurityLevel::Critical => {
                    return (
                        true,
                        format!(
                            "КРИТИЧНЫЙ ДОМЕН: {}. {}",
                            domain_sec.description, domain_sec.reason
                        ),
                    );
                }
                DomainSecurityLevel::Safe => {}
            }
        }

        let Some(rule_message) = self.check_rule_based(action, selector, value, reasoning) else {
            return (false, String::new());
        };

        // The rules flagged the action. Ask the LLM for a better message,
        // but never let it downgrade the verdict.
        if let Some(llm) = self.llm.as_ref() {
            match llm
                .check_dangerous_action(cancel, action, selector, value, reasoning)
                .await
            {
                Ok(result) if result.is_dangerous && !result.message.is_empty() => {
                    return (true, result.message);
                }
                Ok(_) => return (true, rule_message),
                Err(e) => {
                    warn!(error = %e, "LLM security double-check failed, keeping rule verdict");
                    return (true, rule_message);
                }
            }
        }

        (true, rule_message)
    }

    /// Confirmation text tailored per action kind, with the LLM's message
    /// appended when present.
    pub fn confirmation_message(
        &self,
        action: &str,
        selector: &str,
        value: &str,
        reasoning: &str,
        llm_message: &str,
    ) -> String {
        let mut msg = if action.contains("click") {
            format!(
                "ВНИМАНИЕ: Агент хочет выполнить потенциально опасное действие - клик по элементу.\nСелектор: {}\nОбоснование: {}",
                selector, reasoning
            )
        } else if action.contains("type") {
            format!(
                "ВНИМАНИЕ: Агент хочет ввести данные в поле.\nСелектор: {}\nЗначение: {}\nОбоснование: {}",
                selector, value, reasoning
            )
        } else if action.contains("navigate") {
            format!(
                "ВНИМАНИЕ: Агент хочет перейти на страницу.\nURL: {}\nОбоснование: {}",
                value, reasoning
            )
        } else {
            format!(
                "ВНИМАНИЕ: Агент хочет выполнить потенциально опасное действие.\nДействие: {}\nОбоснование: {}",
                action, reasoning
            )
        };

        if !llm_message.is_empty() {
            msg.push_str("\n\n");
            msg.push_str(llm_message);
        }

        msg.push_str("\n\nПродолжить? (yes/no): ");
        msg
    }
}

/// A confirmation answer approves only as an explicit yes, in either
/// language.
pub fn is_confirmation_positive(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "yes" | "y" | "да" | "д"
    )
}
