//! Rollout policy: how replicas are replaced and how failures revert.

use std::time::Duration;

use fleet_core::config::DeployConfig;
use fleet_core::{ConfigError, FailureAction, HealthCheck, UpdateConfig, UpdateOrder};

/// Everything a rolling update attaches to the service spec.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RolloutPolicy {
    /// Forward update: new task healthy before the old one stops.
    pub update: UpdateConfig,
    /// Reversion: fast rather than available, and halts if it fails too.
    pub rollback: UpdateConfig,
    pub health_check: HealthCheck,
}

impl Default for RolloutPolicy {
    fn default() -> Self {
        Self::with_delay(Duration::from_secs(10))
    }
}

impl RolloutPolicy {
    /// Default policy with `delay` between replaced tasks.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            update: UpdateConfig {
                parallelism: 1,
                delay,
                order: UpdateOrder::StartFirst,
                failure_action: FailureAction::Rollback,
                monitor: Duration::from_secs(5),
            },
            rollback: UpdateConfig {
                parallelism: 1,
                delay,
                order: UpdateOrder::StopFirst,
                failure_action: FailureAction::Pause,
                // Zero leaves the orchestrator's own monitor window in place.
                monitor: Duration::ZERO,
            },
            health_check: HealthCheck {
                test: vec![
                    "CMD-SHELL".to_string(),
                    "curl -f http://localhost/health || exit 1".to_string(),
                ],
                interval: Duration::from_secs(5),
                timeout: Duration::from_secs(3),
                retries: 3,
            },
        }
    }

    /// Policy from the `[deploy]` section of the operator config.
    pub fn from_config(config: &DeployConfig) -> Result<Self, ConfigError> {
        let mut policy = Self::with_delay(config.update_delay()?);
        policy.update.monitor = config.monitor()?;
        policy.update.failure_action = config.failure_action()?;
        Ok(policy)
    }
}
