//! Compose-style service definitions.
//!
//! Supports the subset that maps onto a replicated service: `image`,
//! `build`, `command`, `environment`, `ports`, `networks` and `deploy`.
//! Top-level `networks` and `volumes` are accepted and ignored. Services
//! are planned in name order.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use fleet_core::{PortConfig, PortProtocol, ServiceSpec};

use crate::plan::{BuildContext, ImageSource, PlanDefaults, ServicePlan};
use crate::schema::{BuildSection, DefinitionError, DeploySection, load_yaml};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ComposeFile {
    pub version: Option<String>,
    pub services: BTreeMap<String, ComposeService>,
    pub networks: BTreeMap<String, serde_yaml::Value>,
    pub volumes: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ComposeService {
    pub image: Option<String>,
    pub build: Option<BuildForm>,
    pub command: Option<CommandForm>,
    pub environment: Option<EnvironmentForm>,
    /// `"published:target"` with an optional `/tcp` or `/udp` suffix.
    pub ports: Vec<String>,
    pub networks: Vec<String>,
    pub deploy: DeploySection,
}

/// `build: ./dir` or the long form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BuildForm {
    Context(String),
    Full(BuildSection),
}

/// `command: serve --port 80` or `command: [serve, --port, "80"]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CommandForm {
    Line(String),
    Args(Vec<String>),
}

/// `environment` as a map or as a `KEY=VALUE` list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentForm {
    Map(BTreeMap<String, serde_yaml::Value>),
    List(Vec<String>),
}

impl CommandForm {
    fn args(&self) -> Vec<String> {
        match self {
            CommandForm::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandForm::Args(args) => args.clone(),
        }
    }
}

impl EnvironmentForm {
    fn entries(&self, service: &str) -> Result<Vec<String>, DefinitionError> {
        match self {
            EnvironmentForm::List(list) => Ok(list.clone()),
            EnvironmentForm::Map(map) => map
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_yaml::Value::Null => String::new(),
                        serde_yaml::Value::String(s) => s.clone(),
                        serde_yaml::Value::Bool(b) => b.to_string(),
                        serde_yaml::Value::Number(n) => n.to_string(),
                        _ => {
                            return Err(DefinitionError::invalid(
                                service,
                                format!("environment {key} must be a scalar"),
                            ));
                        }
                    };
                    Ok(format!("{key}={value}"))
                })
                .collect(),
        }
    }
}

/// Parse `"8080:80"` or `"5353:53/udp"` into a routing-mesh port.
pub fn parse_port(service: &str, value: &str) -> Result<PortConfig, DefinitionError> {
    let bad = || DefinitionError::invalid(service, format!("invalid port mapping {value:?}"));

    let (mapping, protocol) = match value.trim().split_once('/') {
        Some((mapping, "tcp")) => (mapping, PortProtocol::Tcp),
        Some((mapping, "udp")) => (mapping, PortProtocol::Udp),
        Some(_) => return Err(bad()),
        None => (value.trim(), PortProtocol::Tcp),
    };

    let (published, target) = mapping.split_once(':').ok_or_else(bad)?;
    let published: u32 = published.parse().map_err(|_| bad())?;
    let target: u32 = target.parse().map_err(|_| bad())?;
    if published > u16::MAX as u32 || target > u16::MAX as u32 || target == 0 {
        return Err(bad());
    }

    Ok(PortConfig {
        protocol,
        ..PortConfig::tcp(published, target)
    })
}

impl ComposeFile {
    pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
        load_yaml(path)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Plans in service-name order. Build contexts resolve against
    /// `base_dir`, normally the compose file's directory.
    pub fn plans(
        &self,
        base_dir: &Path,
        defaults: &PlanDefaults,
    ) -> Result<Vec<ServicePlan>, DefinitionError> {
        self.services
            .iter()
            .map(|(name, service)| service.plan(name, base_dir, defaults))
            .collect()
    }
}

impl ComposeService {
    fn plan(
        &self,
        name: &str,
        base_dir: &Path,
        defaults: &PlanDefaults,
    ) -> Result<ServicePlan, DefinitionError> {
        let image = self.image.as_deref().map(str::trim).filter(|i| !i.is_empty());
        let source = match (&self.build, image) {
            (Some(build), tag) => {
                let section = match build {
                    BuildForm::Context(context) => BuildSection {
                        context: context.clone(),
                        ..Default::default()
                    },
                    BuildForm::Full(section) => section.clone(),
                };
                ImageSource::Context(BuildContext {
                    path: base_dir.join(&section.context),
                    dockerfile: section
                        .dockerfile
                        .unwrap_or_else(|| "Dockerfile".to_string()),
                    args: section.args,
                    tag: tag.map(str::to_string),
                })
            }
            (None, Some(image)) => ImageSource::Registry(image.to_string()),
            (None, None) => {
                return Err(DefinitionError::invalid(name, "needs an image or a build section"));
            }
        };

        let ports = self
            .ports
            .iter()
            .map(|p| parse_port(name, p))
            .collect::<Result<Vec<_>, _>>()?;

        let env = match &self.environment {
            Some(form) => form.entries(name)?,
            None => Vec::new(),
        };

        let spec = ServiceSpec {
            name: name.to_string(),
            image: String::new(),
            replicas: self.deploy.replicas.unwrap_or(defaults.replicas),
            command: self.command.as_ref().map(CommandForm::args).unwrap_or_default(),
            env,
            resources: self.deploy.limits(name)?,
            restart_policy: self.deploy.restart_policy(name)?,
            update_config: Some(self.deploy.update_config(name, &defaults.policy.update)?),
            rollback_config: Some(defaults.policy.rollback.clone()),
            health_check: None,
            ports,
            networks: self.networks.clone(),
        };

        Ok(ServicePlan { source, spec })
    }
}
