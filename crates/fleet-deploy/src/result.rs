//! Pipeline outcomes.

use std::fmt;

use fleet_core::{ImageRef, ServiceId};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Build,
    Push,
    Deploy,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Build => "build",
            Stage::Push => "push",
            Stage::Deploy => "deploy",
        })
    }
}

/// Whether the deploy stage created or updated the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    Created,
    Updated,
}

/// Terminal outcome of one service's pass through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentResult {
    Succeeded {
        service_id: ServiceId,
        image: ImageRef,
        action: DeployAction,
        warnings: Vec<String>,
    },
    FailedAtFetch { cause: String },
    FailedAtBuild { cause: String },
    FailedAtPush { cause: String },
    FailedAtDeploy { cause: String },
}

impl DeploymentResult {
    pub(crate) fn failed(stage: Stage, cause: String) -> Self {
        match stage {
            Stage::Fetch => DeploymentResult::FailedAtFetch { cause },
            Stage::Build => DeploymentResult::FailedAtBuild { cause },
            Stage::Push => DeploymentResult::FailedAtPush { cause },
            Stage::Deploy => DeploymentResult::FailedAtDeploy { cause },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeploymentResult::Succeeded { .. })
    }

    /// The stage that failed, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            DeploymentResult::Succeeded { .. } => None,
            DeploymentResult::FailedAtFetch { .. } => Some(Stage::Fetch),
            DeploymentResult::FailedAtBuild { .. } => Some(Stage::Build),
            DeploymentResult::FailedAtPush { .. } => Some(Stage::Push),
            DeploymentResult::FailedAtDeploy { .. } => Some(Stage::Deploy),
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            DeploymentResult::Succeeded { .. } => None,
            DeploymentResult::FailedAtFetch { cause }
            | DeploymentResult::FailedAtBuild { cause }
            | DeploymentResult::FailedAtPush { cause }
            | DeploymentResult::FailedAtDeploy { cause } => Some(cause),
        }
    }
}

impl fmt::Display for DeploymentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentResult::Succeeded {
                service_id,
                image,
                action,
                ..
            } => {
                let verb = match action {
                    DeployAction::Created => "created",
                    DeployAction::Updated => "updated",
                };
                write!(f, "{verb} {service_id} running {image}")
            }
            failed => write!(
                f,
                "failed at {}: {}",
                failed.failed_stage().map(|s| s.to_string()).unwrap_or_default(),
                failed.cause().unwrap_or_default()
            ),
        }
    }
}

/// Per-service results of a multi-service deployment, in deploy order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentReport {
    pub results: Vec<(String, DeploymentResult)>,
}

impl DeploymentReport {
    pub fn push(&mut self, service: &str, result: DeploymentResult) {
        self.results.push((service.to_string(), result));
    }

    pub fn get(&self, service: &str) -> Option<&DeploymentResult> {
        self.results
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, result)| result)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &DeploymentResult)> {
        self.results
            .iter()
            .filter(|(_, r)| !r.is_success())
            .map(|(name, r)| (name.as_str(), r))
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_success())
            .map(|(name, _)| name.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_success())
    }
}
