//! Experience memory: successful step sequences keyed by a normalized task
//! hash, failure patterns with recovery hints, and per-site knowledge.
//! Everything lives in one instance-local map set behind a single RwLock.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::llm::StepPlan;

#[derive(Debug, Clone)]
pub struct SuccessfulPath {
    #[allow(dead_code)]
    pub task_hash: String,
    pub steps: Vec<StepPlan>,
    pub strategy: String,
    pub success_count: u32,
    pub last_used: DateTime<Utc>,
    pub average_time: Duration,
    pub domain: String,
}

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct FailurePattern {
    pub error_type: String,
    pub action: String,
    pub selector: String,
    pub count: u32,
    pub last_seen: DateTime<Utc>,
    pub recovery: String,
}

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct SiteInfo {
    pub domain: String,
    pub common_patterns: HashMap<String, String>,
    pub form_structure: Vec<String>,
    pub last_visited: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    successful_paths: HashMap<String, Vec<SuccessfulPath>>,
    failure_patterns: HashMap<String, FailurePattern>,
    site_knowledge: HashMap<String, SiteInfo>,
}

pub struct AgentMemory {
    inner: RwLock<MemoryInner>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
        }
    }

    /// "The same task" is the hash of the lowercased, trimmed input.
    pub fn hash_task(task: &str) -> String {
        let normalized = task.trim().to_lowercase();
        format!("{:x}", Sha256::digest(normalized.as_bytes()))
    }

    /// Two paths are similar when they have the same length and at least
    /// 80% of action slots match position-for-position.
    pub fn paths_are_similar(a: &[StepPlan], b: &[StepPlan]) -> bool {
        if a.len() != b.len() || a.is_empty() {
            return false;
        }
        let matching = a
            .iter()
            .zip(b.iter())
            .filter(|(x, y)| x.action == y.action)
            .count();
        matching as f64 / a.len() as f64 >= 0.8
    }

    fn classify_error_type(error_msg: &str) -> &'static str {
        let lower = error_msg.to_lowercase();
        if lower.contains("timeout") {
            "timeout"
        } else if lower.contains("not found") || lower.contains("no such element") {
            "element_not_found"
        } else if lower.contains("network") {
            "network"
        } else if lower.contains("permission") || lower.contains("access denied") {
            "permission"
        } else {
            "unknown"
        }
    }

    /// Record a successful run. A similar existing path is reinforced
    /// (count bumped, duration averaged) instead of appended.
    pub async fn record_success(
        &self,
        task: &str,
        steps: &[StepPlan],
        strategy: &str,
        duration: Duration,
        domain: &str,
    ) {
        let task_hash = Self::hash_task(task);
        let mut inner = self.inner.write().await;
        let paths = inner.successful_paths.entry(task_hash.clone()).or_default();

        for path in paths.iter_mut() {
            if Self::paths_are_similar(&path.steps, steps) {
                path.success_count += 1;
                path.last_used = Utc::now();
                path.average_time = (path.average_time + duration) / 2;
                return;
            }
        }

        paths.push(SuccessfulPath {
            task_hash,
            steps: steps.to_vec(),
            strategy: strategy.to_string(),
            success_count: 1,
            last_used: Utc::now(),
            average_time: duration,
            domain: domain.to_string(),
        });
    }

    /// Best stored path for this task: score = success count, +10 for a
    /// domain match, +5 if used within the last day.
    pub async fn find_similar_successful_path(
        &self,
        task: &str,
        domain: &str,
    ) -> Option<SuccessfulPath> {
        let task_hash = Self::hash_task(task);
        let inner = self.inner.read().await;
        let paths = inner.successful_paths.get(&task_hash)?;

        let mut best: Option<(&SuccessfulPath, i64)> = None;
        for path in paths {
            let mut score = path.success_count as i64;
            if path.domain == domain {
                score += 10;
            }
            let age = Utc::now().signed_duration_since(path.last_used);
            if age < chrono::Duration::hours(24) {
                score += 5;
            }
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((path, score));
            }
        }

        best.map(|(path, _)| path.clone())
    }

    pub async fn record_failure(
        &self,
        action: &str,
        selector: &str,
        error_msg: &str,
        recovery: &str,
    ) {
        let error_type = Self::classify_error_type(error_msg);
        let key = format!("{}:{}:{}", error_type, action, selector);

        let mut inner = self.inner.write().await;
        match inner.failure_patterns.get_mut(&key) {
            Some(pattern) => {
                pattern.count += 1;
                pattern.last_seen = Utc::now();
                if !recovery.is_empty() {
                    pattern.recovery = recovery.to_string();
                }
            }
            None => {
                inner.failure_patterns.insert(
                    key,
                    FailurePattern {
                        error_type: error_type.to_string(),
                        action: action.to_string(),
                        selector: selector.to_string(),
                        count: 1,
                        last_seen: Utc::now(),
                        recovery: recovery.to_string(),
                    },
                );
            }
        }
    }

    /// Recovery hint for this exact failure, else the first hint recorded
    /// for the same error type and action on any selector.
    pub async fn get_failure_recovery(
        &self,
        action: &str,
        selector: &str,
        error_msg: &str,
    ) -> Option<String> {
        let error_type = Self::classify_error_type(error_msg);
        let key = format!("{}:{}:{}", error_type, action, selector);

        let inner = self.inner.read().await;
        if let Some(pattern) = inner.failure_patterns.get(&key) {
            if !pattern.recovery.is_empty() {
                return Some(pattern.recovery.clone());
            }
        }

        let general_prefix = format!("{}:{}:", error_type, action);
        inner
            .failure_patterns
            .iter()
            .find(|(k, pattern)| k.starts_with(&general_prefix) && !pattern.recovery.is_empty())
            .map(|(_, pattern)| pattern.recovery.clone())
    }

    #[allow(dead_code)]
    pub async fn update_site_knowledge(
        &self,
        domain: &str,
        patterns: HashMap<String, String>,
        forms: Vec<String>,
    ) {
        let mut inner = self.inner.write().await;
        inner.site_knowledge.insert(
            domain.to_string(),
            SiteInfo {
                domain: domain.to_string(),
                common_patterns: patterns,
                form_structure: forms,
                last_visited: Utc::now(),
            },
        );
    }

    #[allow(dead_code)]
    pub async fn get_site_knowledge(&self, domain: &str) -> Option<SiteInfo> {
        let inner = self.inner.read().await;
        inner.site_knowledge.get(domain).cloned()
    }
}

impl Default for AgentMemory {
    fn default() -> Self {
        Self::new()
    }
}
