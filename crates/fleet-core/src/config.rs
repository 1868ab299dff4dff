//! config.toml operator configuration parser.
//!
//! ```toml
//! [docker]
//! host = "unix:///var/run/docker.sock"
//! registry = "registry.example.com"
//! username = "ci"
//! password = "secret"
//!
//! [deploy]
//! replicas = 2
//! update_delay = "10s"
//!
//! [autoscale]
//! interval = "30s"
//!
//! [[autoscale.rules]]
//! service = "api"
//! min_replicas = 1
//! max_replicas = 5
//! cpu_threshold = 70.0
//! scale_up_step = 2
//! cooldown = "60s"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{FailureAction, RegistryCredentials};
use crate::units::{UnitError, parse_duration};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field}: {source}")]
    Unit {
        field: &'static str,
        source: UnitError,
    },

    #[error("invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub docker: DockerConfig,
    pub deploy: DeployConfig,
    pub autoscale: AutoscaleConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// `unix:///path/to/docker.sock` or `tcp://host:port`.
    pub host: String,
    pub api_version: String,
    pub registry: String,
    pub username: String,
    pub password: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: "unix:///var/run/docker.sock".to_string(),
            api_version: "1.45".to_string(),
            registry: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl fmt::Debug for DockerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerConfig")
            .field("host", &self.host)
            .field("api_version", &self.api_version)
            .field("registry", &self.registry)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DockerConfig {
    pub fn credentials(&self) -> RegistryCredentials {
        RegistryCredentials {
            server: self.registry.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Defaults applied by the deployment pipeline and rolling updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub replicas: u64,
    pub update_delay: String,
    /// Health monitor window after each replaced task.
    pub monitor: String,
    pub failure_action: String,
    pub stage_timeout: String,
    pub pipeline_timeout: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            replicas: 1,
            update_delay: "10s".to_string(),
            monitor: "5s".to_string(),
            failure_action: "rollback".to_string(),
            stage_timeout: "5m".to_string(),
            pipeline_timeout: "10m".to_string(),
        }
    }
}

impl DeployConfig {
    pub fn update_delay(&self) -> Result<Duration, ConfigError> {
        duration_field("deploy.update_delay", &self.update_delay)
    }

    pub fn monitor(&self) -> Result<Duration, ConfigError> {
        duration_field("deploy.monitor", &self.monitor)
    }

    pub fn stage_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("deploy.stage_timeout", &self.stage_timeout)
    }

    pub fn pipeline_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("deploy.pipeline_timeout", &self.pipeline_timeout)
    }

    pub fn failure_action(&self) -> Result<FailureAction, ConfigError> {
        self.failure_action
            .parse()
            .map_err(|message| ConfigError::Invalid {
                field: "deploy.failure_action",
                message,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    /// Poll period.
    pub interval: String,
    /// Ceiling on each orchestrator call made during a tick.
    pub call_timeout: String,
    pub rules: Vec<RuleConfig>,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            interval: "30s".to_string(),
            call_timeout: "10s".to_string(),
            rules: Vec::new(),
        }
    }
}

impl AutoscaleConfig {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        duration_field("autoscale.interval", &self.interval)
    }

    pub fn call_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("autoscale.call_timeout", &self.call_timeout)
    }
}

/// One `[[autoscale.rules]]` entry, prior to validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub service: String,
    pub min_replicas: u64,
    pub max_replicas: u64,
    /// Scale up above this CPU percentage; scale down below half of it.
    pub cpu_threshold: f64,
    #[serde(default = "default_step")]
    pub scale_up_step: u64,
    #[serde(default = "default_step")]
    pub scale_down_step: u64,
    #[serde(default = "default_cooldown")]
    pub cooldown: String,
}

fn default_step() -> u64 {
    1
}

fn default_cooldown() -> String {
    "60s".to_string()
}

impl RuleConfig {
    pub fn cooldown(&self) -> Result<Duration, ConfigError> {
        duration_field("autoscale.rules.cooldown", &self.cooldown)
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).map_err(|source| ConfigError::Unit { field, source })
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// `$HOME/.fleet/config.toml`.
    pub fn default_path() -> PathBuf {
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        home.join(".fleet").join("config.toml")
    }
}
