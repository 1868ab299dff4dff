//! Deployable units: a service spec plus where its image comes from.

use std::collections::BTreeMap;
use std::path::PathBuf;

use fleet_core::config::DeployConfig;
use fleet_core::{ConfigError, ServiceSpec};
use fleet_rollout::RolloutPolicy;

/// Where a service's image comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Already in a registry; deploy as-is.
    Registry(String),
    /// Build from a local directory, then push.
    Context(BuildContext),
    /// Fetch a repository, build its root, then push.
    Repository { url: String, reference: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildContext {
    pub path: PathBuf,
    pub dockerfile: String,
    pub args: BTreeMap<String, String>,
    /// Explicit tag; `<registry>/<service>:latest` otherwise.
    pub tag: Option<String>,
}

/// One service to take through the pipeline.
///
/// `spec.image` is filled in once the image is known.
#[derive(Debug, Clone, PartialEq)]
pub struct ServicePlan {
    pub source: ImageSource,
    pub spec: ServiceSpec,
}

impl ServicePlan {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Values applied where a definition leaves them out.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDefaults {
    pub replicas: u64,
    pub policy: RolloutPolicy,
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self {
            replicas: 1,
            policy: RolloutPolicy::default(),
        }
    }
}

impl PlanDefaults {
    pub fn from_config(config: &DeployConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            replicas: config.replicas,
            policy: RolloutPolicy::from_config(config)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_config() {
        let config = DeployConfig {
            replicas: 4,
            ..Default::default()
        };
        let defaults = PlanDefaults::from_config(&config).unwrap();
        assert_eq!(defaults.replicas, 4);
        assert_eq!(defaults.policy, RolloutPolicy::default());
    }
}
