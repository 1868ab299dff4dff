//! YAML sections shared by deployment manifests and compose files.
//!
//! ```yaml
//! deploy:
//!   replicas: 2
//!   update_config:
//!     parallelism: 1
//!     delay: 10s
//!   restart_policy:
//!     condition: on-failure
//!     max_attempts: 3
//!   resources:
//!     limits:
//!       cpus: "0.5"
//!       memory: 512m
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use fleet_core::{
    FailureAction, ResourceLimits, RestartCondition, RestartPolicy, UnitError, UpdateConfig,
    UpdateOrder, parse_cpus, parse_duration, parse_memory,
};

/// A service definition that cannot be deployed as written.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("service {service}: invalid {field}: {source}")]
    Unit {
        service: String,
        field: &'static str,
        source: UnitError,
    },

    #[error("service {service}: {message}")]
    Invalid { service: String, message: String },
}

impl DefinitionError {
    pub(crate) fn invalid(service: &str, message: impl Into<String>) -> Self {
        DefinitionError::Invalid {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

/// Read and parse a YAML definition file.
pub(crate) fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| DefinitionError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    /// Used by compose files; manifests carry replicas at the service level.
    pub replicas: Option<u64>,
    pub update_config: Option<UpdateSection>,
    pub restart_policy: Option<RestartSection>,
    pub resources: ResourcesSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UpdateSection {
    pub parallelism: Option<u64>,
    pub delay: Option<String>,
    pub order: Option<String>,
    pub failure_action: Option<String>,
    pub monitor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RestartSection {
    pub condition: Option<String>,
    pub max_attempts: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResourcesSection {
    pub limits: LimitsSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub cpus: String,
    pub memory: String,
}

/// Local image build.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    pub context: String,
    pub dockerfile: Option<String>,
    pub args: BTreeMap<String, String>,
}

impl DeploySection {
    pub(crate) fn limits(&self, service: &str) -> Result<ResourceLimits, DefinitionError> {
        let limits = &self.resources.limits;
        let unit = |field, source| DefinitionError::Unit {
            service: service.to_string(),
            field,
            source,
        };
        Ok(ResourceLimits {
            nano_cpus: parse_cpus(&limits.cpus).map_err(|e| unit("cpus", e))?,
            memory_bytes: parse_memory(&limits.memory).map_err(|e| unit("memory", e))?,
        })
    }

    /// Update policy: the section's settings over `defaults`.
    pub(crate) fn update_config(
        &self,
        service: &str,
        defaults: &UpdateConfig,
    ) -> Result<UpdateConfig, DefinitionError> {
        let mut config = defaults.clone();
        let Some(section) = &self.update_config else {
            return Ok(config);
        };

        if let Some(parallelism) = section.parallelism {
            config.parallelism = parallelism;
        }
        if let Some(delay) = &section.delay {
            config.delay = optional_duration(service, "update_config.delay", delay)?;
        }
        if let Some(monitor) = &section.monitor {
            config.monitor = optional_duration(service, "update_config.monitor", monitor)?;
        }
        if let Some(order) = &section.order {
            config.order = order
                .parse::<UpdateOrder>()
                .map_err(|m| DefinitionError::invalid(service, m))?;
        }
        if let Some(action) = &section.failure_action {
            config.failure_action = action
                .parse::<FailureAction>()
                .map_err(|m| DefinitionError::invalid(service, m))?;
        }
        Ok(config)
    }

    pub(crate) fn restart_policy(
        &self,
        service: &str,
    ) -> Result<Option<RestartPolicy>, DefinitionError> {
        let Some(section) = &self.restart_policy else {
            return Ok(None);
        };
        let condition = match section.condition.as_deref() {
            None | Some("") => RestartCondition::Any,
            Some(c) => c
                .parse::<RestartCondition>()
                .map_err(|m| DefinitionError::invalid(service, m))?,
        };
        Ok(Some(RestartPolicy {
            condition,
            max_attempts: section.max_attempts,
        }))
    }
}

/// Empty means zero; anything else must parse.
fn optional_duration(
    service: &str,
    field: &'static str,
    value: &str,
) -> Result<Duration, DefinitionError> {
    if value.trim().is_empty() {
        return Ok(Duration::ZERO);
    }
    parse_duration(value).map_err(|source| DefinitionError::Unit {
        service: service.to_string(),
        field,
        source,
    })
}
