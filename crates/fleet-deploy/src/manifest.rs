//! Multi-service deployment manifests.
//!
//! ```yaml
//! services:
//!   - name: api
//!     image: registry.local/api:1.4
//!     replicas: 3
//!     ports:
//!       - { published: 80, target: 8080 }
//!     environment:
//!       - MODE=prod
//!     networks: [backend]
//!     deploy:
//!       resources:
//!         limits: { cpus: "0.5", memory: 256m }
//!   - name: worker
//!     build:
//!       context: ./worker
//! ```
//!
//! A service either names an `image` or carries a `build` section. With
//! both, the built image is tagged `image`.

use std::path::Path;

use serde::Deserialize;

use fleet_core::{PortConfig, PortProtocol, PublishMode, ServiceSpec};

use crate::plan::{BuildContext, ImageSource, PlanDefaults, ServicePlan};
use crate::schema::{BuildSection, DefinitionError, DeploySection, load_yaml};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub services: Vec<ManifestService>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestService {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub build: Option<BuildSection>,
    #[serde(default)]
    pub replicas: Option<u64>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub ports: Vec<ManifestPort>,
    /// `KEY=VALUE` entries.
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub deploy: DeploySection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestPort {
    pub target: u32,
    pub published: u32,
    #[serde(default = "default_protocol")]
    pub protocol: PortProtocol,
    #[serde(default = "default_mode")]
    pub mode: PublishMode,
}

fn default_protocol() -> PortProtocol {
    PortProtocol::Tcp
}

fn default_mode() -> PublishMode {
    PublishMode::Ingress
}

impl Manifest {
    pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
        load_yaml(path)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Plans for every service, in file order.
    ///
    /// Any invalid service rejects the whole manifest before anything is
    /// deployed. Build contexts resolve against `base_dir`.
    pub fn plans(
        &self,
        base_dir: &Path,
        defaults: &PlanDefaults,
    ) -> Result<Vec<ServicePlan>, DefinitionError> {
        let mut seen = std::collections::HashSet::new();
        let mut plans = Vec::with_capacity(self.services.len());
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                return Err(DefinitionError::invalid(&service.name, "defined more than once"));
            }
            plans.push(service.plan(base_dir, defaults)?);
        }
        Ok(plans)
    }
}

impl ManifestService {
    fn plan(&self, base_dir: &Path, defaults: &PlanDefaults) -> Result<ServicePlan, DefinitionError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DefinitionError::invalid("<unnamed>", "name must not be empty"));
        }

        let image = self.image.as_deref().map(str::trim).filter(|i| !i.is_empty());
        let source = match (&self.build, image) {
            (Some(build), tag) => ImageSource::Context(BuildContext {
                path: base_dir.join(&build.context),
                dockerfile: build
                    .dockerfile
                    .clone()
                    .unwrap_or_else(|| "Dockerfile".to_string()),
                args: build.args.clone(),
                tag: tag.map(str::to_string),
            }),
            (None, Some(image)) => ImageSource::Registry(image.to_string()),
            (None, None) => {
                return Err(DefinitionError::invalid(name, "needs an image or a build section"));
            }
        };

        for entry in &self.environment {
            if !entry.contains('=') {
                return Err(DefinitionError::invalid(
                    name,
                    format!("environment entry {entry:?} is not KEY=VALUE"),
                ));
            }
        }

        let spec = ServiceSpec {
            name: name.to_string(),
            image: String::new(),
            replicas: self.replicas.unwrap_or(defaults.replicas),
            command: self.command.clone(),
            env: self.environment.clone(),
            resources: self.deploy.limits(name)?,
            restart_policy: self.deploy.restart_policy(name)?,
            update_config: Some(self.deploy.update_config(name, &defaults.policy.update)?),
            rollback_config: Some(defaults.policy.rollback.clone()),
            health_check: None,
            ports: self
                .ports
                .iter()
                .map(|p| PortConfig {
                    target: p.target,
                    published: p.published,
                    protocol: p.protocol,
                    publish_mode: p.mode,
                })
                .collect(),
            networks: self.networks.clone(),
        };

        Ok(ServicePlan { source, spec })
    }
}
