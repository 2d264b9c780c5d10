//! The three bundled task-domain handlers. Each scores keyword overlap on
//! the task text plus domain indicators in the page context, and delegates
//! execution to the generic loop of the base agent.

use std::sync::Weak;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::router::{SpecializedAgent, TaskType};
use super::Agent;

fn keyword_confidence(
    task: &str,
    page_context: &str,
    keywords: &[&str],
    context_indicators: &[&str],
) -> f64 {
    let task_lower = task.to_lowercase();
    let context_lower = page_context.to_lowercase();

    let task_score = if keywords.iter().any(|kw| task_lower.contains(kw)) {
        0.9
    } else {
        0.0
    };
    let context_score = if context_indicators.iter().any(|ind| context_lower.contains(ind)) {
        0.3
    } else {
        0.0
    };

    task_score + context_score
}

fn upgrade(base: &Weak<Agent>) -> anyhow::Result<std::sync::Arc<Agent>> {
    base.upgrade()
        .ok_or_else(|| anyhow::anyhow!("base agent is gone"))
}

/// Mailbox work: reading mail, spotting and deleting spam.
pub struct MailboxAgent {
    base: Weak<Agent>,
}

impl MailboxAgent {
    pub fn new(base: Weak<Agent>) -> Self {
        Self { base }
    }

    const KEYWORDS: &'static [&'static str] = &[
        "почта",
        "почтовый",
        "письма",
        "письмо",
        "спам",
        "inbox",
        "яндекс почта",
        "яндекс.почта",
        "gmail",
        "почтовый ящик",
        "email",
        "mail",
        "message",
        "messages",
        "spam",
    ];

    const CONTEXT_INDICATORS: &'static [&'static str] = &[
        "mail.yandex",
        "gmail.com",
        "mail.google",
        "inbox",
        "письма",
        "входящие",
        "спам",
        "email",
    ];
}

#[async_trait]
impl SpecializedAgent for MailboxAgent {
    async fn can_handle(
        &self,
        _cancel: &CancellationToken,
        task: &str,
        page_context: &str,
    ) -> anyhow::Result<f64> {
        Ok(keyword_confidence(
            task,
            page_context,
            Self::KEYWORDS,
            Self::CONTEXT_INDICATORS,
        ))
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        task: &str,
        max_steps: u32,
    ) -> anyhow::Result<()> {
        upgrade(&self.base)?
            .execute_task_string(cancel, task, max_steps)
            .await
    }

    fn expertise(&self) -> &'static [&'static str] {
        &[
            "email_management",
            "spam_detection",
            "mail_organization",
            "yandex_mail",
            "gmail",
        ]
    }

    fn task_type(&self) -> TaskType {
        TaskType::EmailSpam
    }

    fn description(&self) -> &'static str {
        "Специализированный агент для работы с почтой: чтение писем, определение и удаление спама"
    }
}

/// Food ordering: restaurants, carts, delivery services.
pub struct FoodDeliveryAgent {
    base: Weak<Agent>,
}

impl FoodDeliveryAgent {
    pub fn new(base: Weak<Agent>) -> Self {
        Self { base }
    }

    const KEYWORDS: &'static [&'static str] = &[
        "еда",
        "заказ",
        "заказать",
        "ресторан",
        "доставка",
        "доставить",
        "яндекс.еда",
        "яндекс еда",
        "delivery club",
        "деливери клаб",
        "бургер",
        "пицца",
        "суши",
        "роллы",
        "шаурма",
        "корзина",
        "food",
        "order",
        "restaurant",
        "delivery",
        "deliver",
        "burger",
        "pizza",
        "sushi",
        "cart",
        "checkout",
    ];

    const CONTEXT_INDICATORS: &'static [&'static str] = &[
        "eda.yandex",
        "delivery-club",
        "deliveryclub",
        "ресторан",
        "меню",
        "корзина",
        "заказ",
    ];
}

#[async_trait]
impl SpecializedAgent for FoodDeliveryAgent {
    async fn can_handle(
        &self,
        _cancel: &CancellationToken,
        task: &str,
        page_context: &str,
    ) -> anyhow::Result<f64> {
        Ok(keyword_confidence(
            task,
            page_context,
            Self::KEYWORDS,
            Self::CONTEXT_INDICATORS,
        ))
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        task: &str,
        max_steps: u32,
    ) -> anyhow::Result<()> {
        upgrade(&self.base)?
            .execute_task_string(cancel, task, max_steps)
            .await
    }

    fn expertise(&self) -> &'static [&'static str] {
        &["food_ordering", "restaurant_search", "cart_management", "yandex_eda"]
    }

    fn task_type(&self) -> TaskType {
        TaskType::FoodDelivery
    }

    fn description(&self) -> &'static str {
        "Специализированный агент для заказа еды: поиск ресторанов, выбор блюд, оформление заказа"
    }
}

/// Job hunting: vacancies, resumes, applications.
pub struct JobSearchAgent {
    base: Weak<Agent>,
}

impl JobSearchAgent {
    pub fn new(base: Weak<Agent>) -> Self {
        Self { base }
    }

    const KEYWORDS: &'static [&'static str] = &[
        "вакансия",
        "вакансии",
        "работа",
        "работу",
        "hh.ru",
        "хедхантер",
        "резюме",
        "отклик",
        "откликнуться",
        "сопроводительное",
        "письмо",
        "соискатель",
        "трудоустройство",
        "карьера",
        "job",
        "vacancy",
        "vacancies",
        "resume",
        "cv",
        "cover letter",
        "apply",
        "application",
    ];

    const CONTEXT_INDICATORS: &'static [&'static str] = &[
        "hh.ru",
        "headhunter",
        "вакансия",
        "резюме",
        "отклик",
        "сопроводительное",
        "job",
    ];
}

#[async_trait]
impl SpecializedAgent for JobSearchAgent {
    async fn can_handle(
        &self,
        _cancel: &CancellationToken,
        task: &str,
        page_context: &str,
    ) -> anyhow::Result<f64> {
        Ok(keyword_confidence(
            task,
            page_context,
            Self::KEYWORDS,
            Self::CONTEXT_INDICATORS,
        ))
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        task: &str,
        max_steps: u32,
    ) -> anyhow::Result<()> {
        upgrade(&self.base)?
            .execute_task_string(cancel, task, max_steps)
            .await
    }

    fn expertise(&self) -> &'static [&'static str] {
        &["job_search", "resume_submission", "vacancy_filtering", "headhunter"]
    }

    fn task_type(&self) -> TaskType {
        TaskType::JobSearch
    }

    fn description(&self) -> &'static str {
        "Специализированный агент для поиска работы: подбор вакансий, отклики, сопроводительные письма"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_keywords_score_high() {
        let confidence = keyword_confidence(
            "удали спам из почты",
            "",
            MailboxAgent::KEYWORDS,
            MailboxAgent::CONTEXT_INDICATORS,
        );
        assert!((confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn context_indicators_add_to_score() {
        let confidence = keyword_confidence(
            "удали спам",
            "URL: https://mail.yandex.ru/inbox",
            MailboxAgent::KEYWORDS,
            MailboxAgent::CONTEXT_INDICATORS,
        );
        assert!((confidence - 1.2).abs() < f64::EPSILON);
    }

    #[test]
    fn unrelated_tasks_score_zero() {
        let confidence = keyword_confidence(
            "открой сайт с погодой",
            "",
            JobSearchAgent::KEYWORDS,
            JobSearchAgent::CONTEXT_INDICATORS,
        );
        assert_eq!(confidence, 0.0);
    }
}
