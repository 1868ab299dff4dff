//! Docker Engine API JSON shapes and their mapping onto the domain types.
//!
//! Only the fields the control plane reads or writes are modelled. Other
//! spec fields (labels, placement, mounts, ...) are carried through in
//! `extra` so an update does not silently drop them.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fleet_core::{
    FailureAction, HealthCheck, PortConfig, PortProtocol, PublishMode, ResourceLimits,
    RestartCondition, RestartPolicy, ServiceSpec, SpecVersion, Task, TaskState, UpdateConfig,
    UpdateOrder, UpdateState, UpdateStatus, UsageSample, VersionedSpec,
};

type Extra = BTreeMap<String, Value>;

// ── Services ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Service {
    #[serde(rename = "ID")]
    pub id: String,
    pub version: ObjectVersion,
    pub spec: Spec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_status: Option<ServiceUpdateStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectVersion {
    pub index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceUpdateStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub started_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Spec {
    pub name: String,
    pub task_template: TaskTemplate,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_config: Option<UpdateSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_config: Option<UpdateSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_spec: Option<EndpointSpec>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskTemplate {
    pub container_spec: ContainerSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<WireRestartPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachment>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Durations are nanoseconds on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Healthcheck {
    #[serde(default)]
    pub test: Vec<String>,
    #[serde(default)]
    pub interval: i64,
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub retries: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(rename = "NanoCPUs", default)]
    pub nano_cpus: i64,
    #[serde(rename = "MemoryBytes", default)]
    pub memory_bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireRestartPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<RestartCondition>,
    #[serde(default)]
    pub max_attempts: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkAttachment {
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated: Option<Replicated>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Replicated {
    #[serde(default)]
    pub replicas: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateSettings {
    #[serde(default)]
    pub parallelism: u64,
    #[serde(default)]
    pub delay: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_action: Option<FailureAction>,
    #[serde(default)]
    pub monitor: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<UpdateOrder>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Port {
    #[serde(default)]
    pub protocol: String,
    pub target_port: u32,
    #[serde(default)]
    pub published_port: u32,
    #[serde(default)]
    pub publish_mode: String,
}

// ── Responses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceCreated {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Warning", default)]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceUpdated {
    #[serde(rename = "Warnings", default)]
    pub warnings: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemInfo {
    #[serde(rename = "Swarm", default)]
    pub swarm: SwarmInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwarmInfo {
    #[serde(rename = "LocalNodeState", default)]
    pub local_node_state: String,
    #[serde(rename = "ControlAvailable", default)]
    pub control_available: bool,
}

// ── Tasks ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WireTask {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(rename = "Status", default)]
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatus {
    #[serde(rename = "State", default = "unknown_state")]
    pub state: TaskState,
    #[serde(rename = "ContainerStatus", default)]
    pub container_status: Option<ContainerStatus>,
}

fn unknown_state() -> TaskState {
    TaskState::Unknown
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self {
            state: TaskState::Unknown,
            container_status: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerStatus {
    #[serde(rename = "ContainerID", default)]
    pub container_id: Option<String>,
}

// ── Stats ─────────────────────────────────────────────────────────

/// `GET /containers/{id}/stats?stream=false`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub precpu_stats: CpuStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: u64,
    #[serde(default)]
    pub online_cpus: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

// ── Mapping ───────────────────────────────────────────────────────

fn nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

fn duration(nanos: i64) -> Duration {
    Duration::from_nanos(nanos.max(0) as u64)
}

impl UpdateSettings {
    fn from_config(config: &UpdateConfig) -> Self {
        Self {
            parallelism: config.parallelism,
            delay: nanos(config.delay),
            failure_action: Some(config.failure_action),
            monitor: nanos(config.monitor),
            order: Some(config.order),
        }
    }

    /// Engine defaults fill in omitted fields.
    fn to_config(&self) -> UpdateConfig {
        UpdateConfig {
            parallelism: self.parallelism,
            delay: duration(self.delay),
            order: self.order.unwrap_or(UpdateOrder::StopFirst),
            failure_action: self.failure_action.unwrap_or(FailureAction::Pause),
            monitor: duration(self.monitor),
        }
    }
}

impl Spec {
    /// Wire spec for `spec`, with nothing carried over.
    pub fn from_spec(spec: &ServiceSpec) -> Self {
        let limits = spec.resources;
        Self {
            name: spec.name.clone(),
            task_template: TaskTemplate {
                container_spec: ContainerSpec {
                    image: spec.image.clone(),
                    args: spec.command.clone(),
                    env: spec.env.clone(),
                    healthcheck: spec.health_check.as_ref().map(|h| Healthcheck {
                        test: h.test.clone(),
                        interval: nanos(h.interval),
                        timeout: nanos(h.timeout),
                        retries: h.retries,
                    }),
                    extra: Extra::new(),
                },
                resources: Some(Resources {
                    limits: Some(Limits {
                        nano_cpus: limits.nano_cpus,
                        memory_bytes: limits.memory_bytes,
                    }),
                }),
                restart_policy: spec.restart_policy.map(|p| WireRestartPolicy {
                    condition: Some(p.condition),
                    max_attempts: p.max_attempts,
                }),
                networks: spec
                    .networks
                    .iter()
                    .map(|n| NetworkAttachment { target: n.clone() })
                    .collect(),
                extra: Extra::new(),
            },
            mode: Mode {
                replicated: Some(Replicated {
                    replicas: spec.replicas,
                }),
                extra: Extra::new(),
            },
            update_config: spec.update_config.as_ref().map(UpdateSettings::from_config),
            rollback_config: spec.rollback_config.as_ref().map(UpdateSettings::from_config),
            endpoint_spec: (!spec.ports.is_empty()).then(|| EndpointSpec {
                ports: spec.ports.iter().map(Port::from_config).collect(),
            }),
            extra: Extra::new(),
        }
    }

    /// `spec` laid over this one. Fields the domain spec does not model
    /// keep their current values.
    pub fn overlay(&self, spec: &ServiceSpec) -> Self {
        let mut next = Spec::from_spec(spec);
        next.extra = self.extra.clone();
        next.mode.extra = self.mode.extra.clone();
        next.task_template.extra = self.task_template.extra.clone();
        next.task_template.container_spec.extra = self.task_template.container_spec.extra.clone();
        next
    }

    pub fn to_spec(&self) -> ServiceSpec {
        let container = &self.task_template.container_spec;
        let limits = self
            .task_template
            .resources
            .as_ref()
            .and_then(|r| r.limits)
            .unwrap_or_default();
        ServiceSpec {
            name: self.name.clone(),
            image: container.image.clone(),
            replicas: self.mode.replicated.map(|r| r.replicas).unwrap_or(0),
            command: container.args.clone(),
            env: container.env.clone(),
            resources: ResourceLimits {
                nano_cpus: limits.nano_cpus,
                memory_bytes: limits.memory_bytes,
            },
            restart_policy: self.task_template.restart_policy.as_ref().map(|p| RestartPolicy {
                condition: p.condition.unwrap_or(RestartCondition::Any),
                max_attempts: p.max_attempts,
            }),
            update_config: self.update_config.as_ref().map(UpdateSettings::to_config),
            rollback_config: self.rollback_config.as_ref().map(UpdateSettings::to_config),
            health_check: container.healthcheck.as_ref().map(|h| HealthCheck {
                test: h.test.clone(),
                interval: duration(h.interval),
                timeout: duration(h.timeout),
                retries: h.retries,
            }),
            ports: self
                .endpoint_spec
                .as_ref()
                .map(|e| e.ports.iter().map(Port::to_config).collect())
                .unwrap_or_default(),
            networks: self
                .task_template
                .networks
                .iter()
                .map(|n| n.target.clone())
                .collect(),
        }
    }
}

impl Port {
    fn from_config(port: &PortConfig) -> Self {
        Self {
            protocol: match port.protocol {
                PortProtocol::Tcp => "tcp",
                PortProtocol::Udp => "udp",
            }
            .to_string(),
            target_port: port.target,
            published_port: port.published,
            publish_mode: match port.publish_mode {
                PublishMode::Ingress => "ingress",
                PublishMode::Host => "host",
            }
            .to_string(),
        }
    }

    /// Protocols other than UDP read as TCP.
    fn to_config(&self) -> PortConfig {
        PortConfig {
            target: self.target_port,
            published: self.published_port,
            protocol: if self.protocol == "udp" {
                PortProtocol::Udp
            } else {
                PortProtocol::Tcp
            },
            publish_mode: if self.publish_mode == "host" {
                PublishMode::Host
            } else {
                PublishMode::Ingress
            },
        }
    }
}

impl Service {
    pub fn to_versioned(&self) -> VersionedSpec {
        VersionedSpec {
            id: self.id.clone(),
            version: SpecVersion(self.version.index),
            spec: self.spec.to_spec(),
            update_status: self.update_status.as_ref().and_then(|s| {
                let state = match s.state.as_str() {
                    "updating" => UpdateState::Updating,
                    "paused" => UpdateState::Paused,
                    "completed" => UpdateState::Completed,
                    "rollback_started" => UpdateState::RollbackStarted,
                    "rollback_paused" => UpdateState::RollbackPaused,
                    "rollback_completed" => UpdateState::RollbackCompleted,
                    _ => return None,
                };
                Some(UpdateStatus {
                    state,
                    message: s.message.clone(),
                    started_at: s.started_at.clone(),
                })
            }),
        }
    }
}

impl WireTask {
    pub fn to_task(&self) -> Task {
        Task {
            id: self.id.clone(),
            service_id: self.service_id.clone(),
            state: self.status.state,
            container_id: self
                .status
                .container_status
                .as_ref()
                .and_then(|c| c.container_id.clone())
                .filter(|id| !id.is_empty()),
        }
    }
}

impl Stats {
    /// Older engines omit `online_cpus`; the per-CPU list length stands in.
    pub fn to_sample(&self) -> UsageSample {
        let online_cpus = match self.cpu_stats.online_cpus {
            0 => self
                .cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|v| v.len() as u32)
                .unwrap_or(0),
            n => n,
        };
        UsageSample {
            cpu_total: self.cpu_stats.cpu_usage.total_usage,
            precpu_total: self.precpu_stats.cpu_usage.total_usage,
            system_total: self.cpu_stats.system_cpu_usage,
            presystem_total: self.precpu_stats.system_cpu_usage,
            online_cpus,
        }
    }
}
