//! Domain types shared by the autoscaler, rollout and deploy crates.
//!
//! `ServiceSpec` mirrors the desired-state document the orchestrator keeps
//! for a replicated service. The orchestrator owns these records; the
//! control plane only ever reads a `VersionedSpec`, mutates a copy, and
//! writes it back with the version it read.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Orchestrator-assigned service identifier (a name also resolves).
pub type ServiceId = String;

/// Container identifier as reported by a task.
pub type ContainerId = String;

// ── Versioning ────────────────────────────────────────────────────

/// Monotonic version token used for compare-and-swap service updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpecVersion(pub u64);

impl SpecVersion {
    /// The version the orchestrator assigns after a successful write.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A service spec together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedSpec {
    pub id: ServiceId,
    pub version: SpecVersion,
    pub spec: ServiceSpec,
    /// Progress of the most recent rolling update, if one was started.
    pub update_status: Option<UpdateStatus>,
}

// ── Service spec ──────────────────────────────────────────────────

/// Desired state of a replicated service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub replicas: u64,
    /// Overrides the image entrypoint arguments when non-empty.
    pub command: Vec<String>,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    pub resources: ResourceLimits,
    pub restart_policy: Option<RestartPolicy>,
    pub update_config: Option<UpdateConfig>,
    pub rollback_config: Option<UpdateConfig>,
    pub health_check: Option<HealthCheck>,
    pub ports: Vec<PortConfig>,
    pub networks: Vec<String>,
}

impl ServiceSpec {
    /// A single-replica spec with no limits or policies attached.
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            replicas: 1,
            ..Default::default()
        }
    }
}

/// Per-task resource ceilings. Zero means "no limit".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU limit in billionths of a core.
    pub nano_cpus: i64,
    pub memory_bytes: i64,
}

// ── Update policy ─────────────────────────────────────────────────

/// Whether a replacement task starts before or after its predecessor stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateOrder {
    StartFirst,
    StopFirst,
}

impl UpdateOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOrder::StartFirst => "start-first",
            UpdateOrder::StopFirst => "stop-first",
        }
    }
}

impl FromStr for UpdateOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start-first" => Ok(UpdateOrder::StartFirst),
            "stop-first" => Ok(UpdateOrder::StopFirst),
            other => Err(format!("unknown update order: {other}")),
        }
    }
}

/// What the orchestrator does when an updated task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureAction {
    Rollback,
    Pause,
    Continue,
}

impl FailureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureAction::Rollback => "rollback",
            FailureAction::Pause => "pause",
            FailureAction::Continue => "continue",
        }
    }
}

impl FromStr for FailureAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rollback" => Ok(FailureAction::Rollback),
            "pause" => Ok(FailureAction::Pause),
            "continue" => Ok(FailureAction::Continue),
            other => Err(format!("unknown failure action: {other}")),
        }
    }
}

/// Rolling update (or rollback) behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Tasks replaced at a time.
    pub parallelism: u64,
    /// Pause between batches.
    pub delay: Duration,
    pub order: UpdateOrder,
    pub failure_action: FailureAction,
    /// How long a new task is watched before the update counts it healthy.
    pub monitor: Duration,
}

/// Container health probe the orchestrator runs inside each task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Probe command, e.g. `["CMD-SHELL", "curl -f http://localhost/health || exit 1"]`.
    pub test: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartCondition {
    None,
    OnFailure,
    Any,
}

impl RestartCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartCondition::None => "none",
            RestartCondition::OnFailure => "on-failure",
            RestartCondition::Any => "any",
        }
    }
}

impl FromStr for RestartCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RestartCondition::None),
            "on-failure" => Ok(RestartCondition::OnFailure),
            "any" => Ok(RestartCondition::Any),
            other => Err(format!("unknown restart condition: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub condition: RestartCondition,
    /// Zero means unlimited.
    pub max_attempts: u64,
}

// ── Endpoints ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    Ingress,
    Host,
}

/// A published service port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub target: u32,
    pub published: u32,
    pub protocol: PortProtocol,
    pub publish_mode: PublishMode,
}

impl PortConfig {
    /// TCP port published on the routing mesh.
    pub fn tcp(published: u32, target: u32) -> Self {
        Self {
            target,
            published,
            protocol: PortProtocol::Tcp,
            publish_mode: PublishMode::Ingress,
        }
    }
}

// ── Update status ─────────────────────────────────────────────────

/// Orchestrator-reported state of the latest update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Updating,
    Paused,
    Completed,
    RollbackStarted,
    RollbackPaused,
    RollbackCompleted,
}

impl UpdateState {
    /// Whether the orchestrator has stopped working on this update.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UpdateState::Updating | UpdateState::RollbackStarted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub state: UpdateState,
    pub message: String,
    /// When the update (or rollback) that produced this status began.
    /// Tells two updates with the same outcome apart.
    #[serde(default)]
    pub started_at: Option<String>,
}

// ── Tasks and usage ───────────────────────────────────────────────

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    New,
    Pending,
    Assigned,
    Preparing,
    Starting,
    Running,
    Complete,
    Shutdown,
    Failed,
    Rejected,
    Orphaned,
    #[serde(other)]
    Unknown,
}

/// One scheduled instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub service_id: ServiceId,
    pub state: TaskState,
    /// Present once the task has been given a container.
    pub container_id: Option<ContainerId>,
}

/// Task listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub service: Option<ServiceId>,
}

impl TaskFilter {
    pub fn service(id: &str) -> Self {
        Self {
            service: Some(id.to_string()),
        }
    }
}

/// Two successive CPU accounting readings for one container.
///
/// `cpu_total`/`system_total` are the current window; the `pre*` fields are
/// the previous one. All values are cumulative nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_total: u64,
    pub presystem_total: u64,
    pub online_cpus: u32,
}

// ── Images and registries ─────────────────────────────────────────

/// Fully qualified image reference, e.g. `registry.local/shop:latest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef(pub String);

impl ImageRef {
    /// `<registry>/<name>:latest`, or `<name>:latest` with no registry.
    pub fn latest(registry: &str, name: &str) -> Self {
        let registry = registry.trim_end_matches('/');
        if registry.is_empty() {
            Self(format!("{name}:latest"))
        } else {
            Self(format!("{registry}/{name}:latest"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry login used when pushing images.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
