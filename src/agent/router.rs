//! Routing to specialized task handlers. Each handler scores its own
//! confidence for a task; the router picks the maximum and falls back to
//! the configured default when nothing clears the bar.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    EmailSpam,
    FoodDelivery,
    JobSearch,
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::EmailSpam => "email_spam",
            TaskType::FoodDelivery => "food_delivery",
            TaskType::JobSearch => "job_search",
            TaskType::General => "general",
        }
    }
}

/// A task-domain handler: scores how well it matches a task and, when
/// selected, runs the whole task itself.
#[async_trait]
pub trait SpecializedAgent: Send + Sync {
    /// Confidence in [0, 1]-ish space (keyword hit 0.9 + context hit 0.3).
    async fn can_handle(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
    ) -> anyhow::Result<f64>;

    async fn execute(
        &self,
        cancel: &CancellationToken,
        task: &str,
        max_steps: u32,
    ) -> anyhow::Result<()>;

    fn expertise(&self) -> &'static [&'static str];
    fn task_type(&self) -> TaskType;
    fn description(&self) -> &'static str;
}

pub struct AgentRouter {
    agents: HashMap<TaskType, Arc<dyn SpecializedAgent>>,
    default_agent: Option<Arc<dyn SpecializedAgent>>,
    confidence_min: f64,
}

impl AgentRouter {
    pub fn new(confidence_min: f64) -> Self {
        let confidence_min = if confidence_min == 0.0 { 0.7 } else { confidence_min };
        Self {
            agents: HashMap::new(),
            default_agent: None,
            confidence_min,
        }
    }

    pub fn register_agent(&mut self, agent: Arc<dyn SpecializedAgent>) {
        self.agents.insert(agent.task_type(), agent);
    }

    pub fn set_default_agent(&mut self, agent: Arc<dyn SpecializedAgent>) {
        self.default_agent = Some(agent);
    }

    /// Pick the max-confidence handler; below the threshold the default
    /// wins. Scoring errors from individual handlers are skipped.
    pub async fn route_task(
        &self,
        cancel: &CancellationToken,
        task: &str,
        page_context: &str,
    ) -> anyhow::Result<Arc<dyn SpecializedAgent>> {
        let mut best_agent = self.default_agent.clone();
        let mut best_confidence = 0.0_f64;

        for agent in self.agents.values() {
            let confidence = match agent.can_handle(cancel, task, page_context).await {
                Ok(confidence) => confidence,
                Err(_) => continue,
            };
            if confidence > best_confidence {
                best_confidence = confidence;
                best_agent = Some(agent.clone());
            }
        }

        if best_confidence < self.confidence_min {
            if let Some(default_agent) = self.default_agent.clone() {
                return Ok(default_agent);
            }
        }

        best_agent.ok_or_else(|| anyhow::anyhow!("no suitable agent found for task: {}", task))
    }

    #[allow(dead_code)]
    pub fn list_agents(&self) -> Vec<Arc<dyn SpecializedAgent>> {
        self.agents.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAgent {
        task_type: TaskType,
        confidence: f64,
    }

    #[async_trait]
    impl SpecializedAgent for FixedAgent {
        async fn can_handle(
            &self,
            _cancel: &CancellationToken,
            _task: &str,
            _page_context: &str,
        ) -> anyhow::Result<f64> {
            Ok(self.confidence)
        }

        async fn execute(
            &self,
            _cancel: &CancellationToken,
            _task: &str,
            _max_steps: u32,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        fn expertise(&self) -> &'static [&'static str] {
            &[]
        }

        fn task_type(&self) -> TaskType {
            self.task_type
        }

        fn description(&self) -> &'static str {
            "test agent"
        }
    }

    #[tokio::test]
    async fn highest_confidence_wins() {
        let mut router = AgentRouter::new(0.7);
        router.register_agent(Arc::new(FixedAgent {
            task_type: TaskType::EmailSpam,
            confidence: 0.9,
        }));
        router.register_agent(Arc::new(FixedAgent {
            task_type: TaskType::JobSearch,
            confidence: 0.8,
        }));

        let cancel = CancellationToken::new();
        let selected = router.route_task(&cancel, "task", "").await.unwrap();
        assert_eq!(selected.task_type(), TaskType::EmailSpam);
    }

    #[tokio::test]
    async fn below_threshold_falls_back_to_default() {
        let mut router = AgentRouter::new(0.7);
        router.register_agent(Arc::new(FixedAgent {
            task_type: TaskType::FoodDelivery,
            confidence: 0.4,
        }));
        router.set_default_agent(Arc::new(FixedAgent {
            task_type: TaskType::EmailSpam,
            confidence: 0.0,
        }));

        let cancel = CancellationToken::new();
        let selected = router.route_task(&cancel, "task", "").await.unwrap();
        assert_eq!(selected.task_type(), TaskType::EmailSpam);
    }

    #[tokio::test]
    async fn no_agents_is_an_error() {
        let router = AgentRouter::new(0.7);
        let cancel = CancellationToken::new();
        assert!(router.route_task(&cancel, "task", "").await.is_err());
    }

    #[test]
    fn zero_threshold_gets_default() {
        let router = AgentRouter::new(0.0);
        assert_eq!(router.confidence_min, 0.7);
    }
}
