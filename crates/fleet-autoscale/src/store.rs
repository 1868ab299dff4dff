//! Keyed rule registry shared between the tick loop and registration callers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use fleet_core::ServiceId;

use crate::rule::{RuleError, ScalingRule};

/// Rules keyed by service. Cloning shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    rules: Arc<RwLock<BTreeMap<ServiceId, ScalingRule>>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert `rule`, replacing any rule for the same service.
    ///
    /// Returns the rule it replaced.
    pub async fn register(&self, rule: ScalingRule) -> Result<Option<ScalingRule>, RuleError> {
        rule.validate()?;
        info!(
            service = %rule.service_id,
            min = rule.min_replicas,
            max = rule.max_replicas,
            threshold = rule.cpu_threshold,
            "registered scaling rule"
        );
        Ok(self
            .rules
            .write()
            .await
            .insert(rule.service_id.clone(), rule))
    }

    pub async fn remove(&self, service_id: &str) -> Option<ScalingRule> {
        self.rules.write().await.remove(service_id)
    }

    pub async fn get(&self, service_id: &str) -> Option<ScalingRule> {
        self.rules.read().await.get(service_id).cloned()
    }

    pub async fn contains(&self, service_id: &str) -> bool {
        self.rules.read().await.contains_key(service_id)
    }

    /// Point-in-time copy in service order. The lock is not held while the
    /// caller iterates.
    pub async fn snapshot(&self) -> Vec<ScalingRule> {
        self.rules.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rule(service: &str, max: u64) -> ScalingRule {
        ScalingRule {
            service_id: service.to_string(),
            min_replicas: 1,
            max_replicas: max,
            cpu_threshold: 70.0,
            scale_up_step: 1,
            scale_down_step: 1,
            cooldown: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let store = RuleStore::new();
        assert!(store.register(rule("api", 5)).await.unwrap().is_none());
        assert_eq!(
            store.register(rule("api", 5)).await.unwrap(),
            Some(rule("api", 5))
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn register_replaces() {
        let store = RuleStore::new();
        store.register(rule("api", 5)).await.unwrap();
        store.register(rule("api", 9)).await.unwrap();
        assert_eq!(store.get("api").await.unwrap().max_replicas, 9);
    }

    #[tokio::test]
    async fn invalid_rule_not_stored() {
        let store = RuleStore::new();
        let mut bad = rule("api", 5);
        bad.min_replicas = 7;
        assert!(store.register(bad).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn snapshot_is_ordered_and_detached() {
        let store = RuleStore::new();
        store.register(rule("worker", 3)).await.unwrap();
        store.register(rule("api", 3)).await.unwrap();

        let snap = store.snapshot().await;
        store.remove("api").await;

        let names: Vec<_> = snap.iter().map(|r| r.service_id.as_str()).collect();
        assert_eq!(names, ["api", "worker"]);
        assert!(!store.contains("api").await);
    }

    #[tokio::test]
    async fn clones_share_rules() {
        let store = RuleStore::new();
        let handle = store.clone();
        handle.register(rule("api", 5)).await.unwrap();
        assert!(store.contains("api").await);
    }
}
