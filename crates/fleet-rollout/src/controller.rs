//! Rolling update controller.
//!
//! `apply` reads the service, rewrites a copy of its spec with the new
//! image, replica count, resource limits and rollout policy, and submits
//! it with the version it read. A version conflict is returned to the
//! caller as-is; nothing here retries or overwrites.
//!
//! `wait_for_rollout` polls the orchestrator's update status until the
//! submitted update completes, is rolled back, or pauses. The orchestrator
//! may report nothing, or the previous update's outcome, for a while after
//! the submission; neither counts as this update settling.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use fleet_core::{
    Orchestrator, OrchestratorError, ResourceLimits, ServiceId, ServiceSpec, SpecVersion,
    UpdateState, UpdateStatus, VersionedSpec, bounded,
};

use crate::strategy::RolloutPolicy;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("invalid rolling update: {0}")]
    Invalid(String),

    #[error("service not found: {0}")]
    NotFound(String),

    #[error("service {service} changed since it was read at {version}; re-run the update")]
    Conflict { service: String, version: SpecVersion },

    #[error("update of {service} was rolled back: {message}")]
    RolledBack { service: String, message: String },

    #[error("update of {service} paused: {message}")]
    Paused { service: String, message: String },

    #[error("rollback of {service} paused before restoring the previous spec: {message}")]
    RollbackPaused { service: String, message: String },

    #[error("update of {service} did not converge within {waited:?}")]
    WaitTimeout { service: String, waited: Duration },

    #[error(transparent)]
    Orchestrator(OrchestratorError),
}

impl RolloutError {
    fn from_orchestrator(service: &str, err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(_) => RolloutError::NotFound(service.to_string()),
            OrchestratorError::VersionConflict { version, .. } => RolloutError::Conflict {
                service: service.to_string(),
                version,
            },
            other => RolloutError::Orchestrator(other),
        }
    }
}

/// What to roll out.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingUpdateRequest {
    /// Service ID or name.
    pub service: String,
    pub image: String,
    pub replicas: u64,
    /// Replaces the current limits when set.
    pub resources: Option<ResourceLimits>,
}

impl RollingUpdateRequest {
    /// Three replicas of `image`, limits unchanged.
    pub fn new(service: &str, image: &str) -> Self {
        Self {
            service: service.to_string(),
            image: image.to_string(),
            replicas: 3,
            resources: None,
        }
    }
}

/// Outcome of a submitted rolling update.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutReport {
    pub service_id: ServiceId,
    pub previous_image: String,
    pub image: String,
    /// Version the update was written against.
    pub based_on: SpecVersion,
    /// Non-fatal orchestrator warnings.
    pub warnings: Vec<String>,
    /// Update status reported before the submission.
    pub prior_status: Option<UpdateStatus>,
}

pub struct RollingUpdater {
    orchestrator: Arc<dyn Orchestrator>,
    policy: RolloutPolicy,
    call_timeout: Duration,
}

impl RollingUpdater {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, policy: RolloutPolicy) -> Self {
        Self {
            orchestrator,
            policy,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RolloutPolicy {
        &self.policy
    }

    /// The spec to submit: `current` with the request and policy applied.
    pub fn prepare(&self, current: &VersionedSpec, request: &RollingUpdateRequest) -> ServiceSpec {
        let mut spec = current.spec.clone();
        spec.image = request.image.clone();
        spec.replicas = request.replicas;
        if let Some(resources) = request.resources {
            spec.resources = resources;
        }
        spec.update_config = Some(self.policy.update.clone());
        spec.rollback_config = Some(self.policy.rollback.clone());
        spec.health_check = Some(self.policy.health_check.clone());
        spec
    }

    /// Submit a rolling update.
    pub async fn apply(&self, request: &RollingUpdateRequest) -> Result<RolloutReport, RolloutError> {
        if request.image.trim().is_empty() {
            return Err(RolloutError::Invalid("image must not be empty".to_string()));
        }

        let current = bounded(
            self.call_timeout,
            self.orchestrator.inspect_service(&request.service),
        )
        .await
        .map_err(|e| RolloutError::from_orchestrator(&request.service, e))?;

        let spec = self.prepare(&current, request);

        info!(
            service = %current.id,
            from = %current.spec.image,
            to = %spec.image,
            replicas = spec.replicas,
            version = %current.version,
            "starting rolling update"
        );

        let warnings = bounded(
            self.call_timeout,
            self.orchestrator
                .update_service(&current.id, current.version, &spec),
        )
        .await
        .map_err(|e| RolloutError::from_orchestrator(&request.service, e))?;

        for warning in &warnings {
            warn!(service = %current.id, warning = %warning, "rolling update warning");
        }

        Ok(RolloutReport {
            service_id: current.id,
            previous_image: current.spec.image,
            image: spec.image,
            based_on: current.version,
            warnings,
            prior_status: current.update_status,
        })
    }

    /// Poll every `poll` until the update in `report` settles, for at most
    /// `deadline`.
    ///
    /// Until the orchestrator shows this update, either by clearing the
    /// status, reporting it in progress, or reporting anything other than
    /// `report.prior_status`, a terminal status is the previous update's
    /// and polling continues.
    pub async fn wait_for_rollout(
        &self,
        report: &RolloutReport,
        deadline: Duration,
        poll: Duration,
    ) -> Result<(), RolloutError> {
        match tokio::time::timeout(deadline, self.poll_until_settled(report, poll)).await {
            Ok(result) => result,
            Err(_) => Err(RolloutError::WaitTimeout {
                service: report.service_id.clone(),
                waited: deadline,
            }),
        }
    }

    async fn poll_until_settled(
        &self,
        report: &RolloutReport,
        poll: Duration,
    ) -> Result<(), RolloutError> {
        let service = report.service_id.as_str();
        let mut seen = false;

        loop {
            let current = bounded(self.call_timeout, self.orchestrator.inspect_service(service))
                .await
                .map_err(|e| RolloutError::from_orchestrator(service, e))?;

            let status = match current.update_status {
                None => {
                    debug!(service = %service, "update not started yet");
                    seen = true;
                    tokio::time::sleep(poll).await;
                    continue;
                }
                Some(status) => status,
            };
            seen = seen || Some(&status) != report.prior_status.as_ref();

            match status.state {
                UpdateState::Updating | UpdateState::RollbackStarted => {
                    debug!(service = %service, state = ?status.state, "update in progress");
                    seen = true;
                }
                _ if !seen => {
                    debug!(service = %service, state = ?status.state, "status predates this update");
                }
                UpdateState::Completed => {
                    info!(service = %service, "rolling update completed");
                    return Ok(());
                }
                UpdateState::Paused => {
                    return Err(RolloutError::Paused {
                        service: service.to_string(),
                        message: status.message,
                    });
                }
                UpdateState::RollbackPaused => {
                    return Err(RolloutError::RollbackPaused {
                        service: service.to_string(),
                        message: status.message,
                    });
                }
                UpdateState::RollbackCompleted => {
                    return Err(RolloutError::RolledBack {
                        service: service.to_string(),
                        message: status.message,
                    });
                }
            }
            tokio::time::sleep(poll).await;
        }
    }
}
