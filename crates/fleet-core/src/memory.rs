//! In-memory orchestrator (for testing).
//!
//! Models the parts of a swarm-style orchestrator the control plane relies
//! on: versioned specs with compare-and-swap updates, tasks with container
//! usage samples, and rolling updates that honour `UpdateConfig.order` and
//! `failure_action`. Every replacement step appends the service's healthy
//! replica count to an observation log so tests can assert availability.
//!
//! Failures and hangs can be injected per call kind.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::capability::Orchestrator;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::*;

/// Orchestrator call kinds, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Inspect,
    Update,
    Create,
    ListTasks,
    Stats,
}

struct TaskRecord {
    task: Task,
    image: String,
    healthy: bool,
}

struct ServiceRecord {
    version: SpecVersion,
    spec: ServiceSpec,
    update_status: Option<UpdateStatus>,
}

#[derive(Default)]
struct Inner {
    services: BTreeMap<ServiceId, ServiceRecord>,
    tasks: Vec<TaskRecord>,
    usage: HashMap<ContainerId, UsageSample>,
    unhealthy_images: HashSet<String>,
    failures: HashMap<Call, VecDeque<OrchestratorError>>,
    hanging: HashSet<Call>,
    bump_after_inspect: HashSet<ServiceId>,
    warnings: VecDeque<String>,
    healthy_log: HashMap<ServiceId, Vec<u64>>,
    calls: HashMap<Call, usize>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }

    /// Resolve an ID or a service name to an ID.
    fn resolve(&self, id_or_name: &str) -> Option<ServiceId> {
        if self.services.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.services
            .iter()
            .find(|(_, record)| record.spec.name == id_or_name)
            .map(|(id, _)| id.clone())
    }

    fn insert_service(&mut self, spec: ServiceSpec) -> ServiceId {
        let id = self.next_id("svc-");
        let replicas = spec.replicas;
        let image = spec.image.clone();
        self.services.insert(
            id.clone(),
            ServiceRecord {
                version: SpecVersion(1),
                spec,
                update_status: None,
            },
        );
        for _ in 0..replicas {
            self.start_task(&id, &image);
        }
        self.observe(&id);
        id
    }

    /// Start a task; returns whether it came up healthy.
    fn start_task(&mut self, service_id: &str, image: &str) -> bool {
        let healthy = !self.unhealthy_images.contains(image);
        let task_id = self.next_id("task-");
        let container_id = self.next_id("ctr-");
        self.tasks.push(TaskRecord {
            task: Task {
                id: task_id,
                service_id: service_id.to_string(),
                state: if healthy { TaskState::Running } else { TaskState::Failed },
                container_id: Some(container_id),
            },
            image: image.to_string(),
            healthy,
        });
        healthy
    }

    fn stop_task(&mut self, index: usize) {
        let record = &mut self.tasks[index];
        record.task.state = TaskState::Shutdown;
        record.healthy = false;
    }

    fn running_indices(&self, service_id: &str, image: Option<&str>) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.task.service_id == service_id
                    && t.task.state == TaskState::Running
                    && image.is_none_or(|img| t.image == img)
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn healthy_count(&self, service_id: &str) -> u64 {
        self.tasks
            .iter()
            .filter(|t| {
                t.task.service_id == service_id && t.task.state == TaskState::Running && t.healthy
            })
            .count() as u64
    }

    fn observe(&mut self, service_id: &str) {
        let count = self.healthy_count(service_id);
        self.healthy_log
            .entry(service_id.to_string())
            .or_default()
            .push(count);
    }

    /// Bring the number of running `image` tasks to `replicas`.
    fn reconcile(&mut self, service_id: &str, replicas: u64, image: &str) {
        let running = self.running_indices(service_id, Some(image));
        let running_count = running.len() as u64;
        if running_count > replicas {
            for &index in running.iter().skip(replicas as usize) {
                self.stop_task(index);
            }
        } else {
            for _ in running_count..replicas {
                self.start_task(service_id, image);
            }
        }
        self.observe(service_id);
    }

    /// Starting an update or a rollback stamps a fresh `started_at`; any
    /// other state keeps the stamp of the run it belongs to.
    fn set_status(&mut self, service_id: &str, state: UpdateState, message: &str) {
        let started_at = match state {
            UpdateState::Updating | UpdateState::RollbackStarted => Some(self.next_id("run")),
            _ => self
                .services
                .get(service_id)
                .and_then(|r| r.update_status.as_ref())
                .and_then(|s| s.started_at.clone()),
        };
        if let Some(record) = self.services.get_mut(service_id) {
            record.update_status = Some(UpdateStatus {
                state,
                message: message.to_string(),
                started_at,
            });
        }
    }

    /// Apply a new spec the way a swarm rolling update would.
    fn apply_update(&mut self, service_id: &str, spec: ServiceSpec) {
        let Some(record) = self.services.get_mut(service_id) else {
            return;
        };
        let previous = std::mem::replace(&mut record.spec, spec.clone());
        record.version = record.version.next();

        if previous.image == spec.image {
            self.reconcile(service_id, spec.replicas, &spec.image);
            return;
        }

        self.set_status(service_id, UpdateState::Updating, "update in progress");
        self.observe(service_id);

        let (order, failure_action) = spec
            .update_config
            .as_ref()
            .map(|c| (c.order, c.failure_action))
            .unwrap_or((UpdateOrder::StopFirst, FailureAction::Pause));

        let old_tasks: Vec<usize> = self
            .running_indices(service_id, None)
            .into_iter()
            .filter(|&i| self.tasks[i].image != spec.image)
            .collect();

        for old in old_tasks {
            let healthy = match order {
                UpdateOrder::StartFirst => {
                    let healthy = self.start_task(service_id, &spec.image);
                    self.observe(service_id);
                    if healthy {
                        self.stop_task(old);
                        self.observe(service_id);
                    }
                    healthy
                }
                UpdateOrder::StopFirst => {
                    self.stop_task(old);
                    self.observe(service_id);
                    let healthy = self.start_task(service_id, &spec.image);
                    self.observe(service_id);
                    healthy
                }
            };

            if healthy {
                continue;
            }

            match failure_action {
                FailureAction::Rollback => {
                    self.rollback(service_id, previous);
                    return;
                }
                FailureAction::Pause => {
                    self.set_status(
                        service_id,
                        UpdateState::Paused,
                        "update paused due to failure or early termination of task",
                    );
                    return;
                }
                FailureAction::Continue => {}
            }
        }

        self.reconcile(service_id, spec.replicas, &spec.image);
        self.set_status(service_id, UpdateState::Completed, "update completed");
    }

    fn rollback(&mut self, service_id: &str, previous: ServiceSpec) {
        self.set_status(
            service_id,
            UpdateState::RollbackStarted,
            "update rolled back due to failure or early termination of task",
        );
        let new_image = match self.services.get_mut(service_id) {
            Some(record) => {
                let failed = std::mem::replace(&mut record.spec, previous.clone());
                record.version = record.version.next();
                failed.image
            }
            None => return,
        };

        for index in self.running_indices(service_id, Some(&new_image)) {
            self.stop_task(index);
        }
        self.reconcile(service_id, previous.replicas, &previous.image);
        self.set_status(
            service_id,
            UpdateState::RollbackCompleted,
            "rollback completed",
        );
    }
}

/// Shared, cloneable in-memory orchestrator.
#[derive(Clone, Default)]
pub struct InMemoryOrchestrator {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a call; returns an injected failure or parks forever if hung.
    async fn enter(&self, call: Call) -> OrchestratorResult<()> {
        let hang = {
            let mut inner = self.lock();
            *inner.calls.entry(call).or_default() += 1;
            if let Some(err) = inner.failures.get_mut(&call).and_then(VecDeque::pop_front) {
                return Err(err);
            }
            inner.hanging.contains(&call)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    // ── Setup ──────────────────────────────────────────────────────

    /// Create a service with `spec.replicas` running tasks.
    pub fn add_service(&self, spec: ServiceSpec) -> ServiceId {
        self.lock().insert_service(spec)
    }

    /// Attach an extra task in an arbitrary state.
    pub fn add_task(&self, service_id: &str, state: TaskState, container_id: Option<&str>) {
        let mut inner = self.lock();
        let task_id = inner.next_id("task-");
        let image = inner
            .services
            .get(service_id)
            .map(|r| r.spec.image.clone())
            .unwrap_or_default();
        inner.tasks.push(TaskRecord {
            task: Task {
                id: task_id,
                service_id: service_id.to_string(),
                state,
                container_id: container_id.map(str::to_string),
            },
            image,
            healthy: state == TaskState::Running,
        });
    }

    pub fn set_usage(&self, container_id: &str, sample: UsageSample) {
        self.lock().usage.insert(container_id.to_string(), sample);
    }

    /// Give every running container of a service the same usage sample.
    pub fn set_service_usage(&self, service_id: &str, sample: UsageSample) {
        for container in self.running_containers(service_id) {
            self.set_usage(&container, sample);
        }
    }

    pub fn running_containers(&self, service_id: &str) -> Vec<ContainerId> {
        let inner = self.lock();
        inner
            .running_indices(service_id, None)
            .into_iter()
            .filter_map(|i| inner.tasks[i].task.container_id.clone())
            .collect()
    }

    /// Tasks started from `image` fail their health check.
    pub fn mark_image_unhealthy(&self, image: &str) {
        self.lock().unhealthy_images.insert(image.to_string());
    }

    /// Fail the next `call` with `error`. Queues up.
    pub fn fail_next(&self, call: Call, error: OrchestratorError) {
        self.lock().failures.entry(call).or_default().push_back(error);
    }

    /// Make every future `call` hang forever.
    pub fn hang(&self, call: Call) {
        self.lock().hanging.insert(call);
    }

    /// Simulate another writer touching the service right after it is next read.
    pub fn bump_version_after_next_inspect(&self, service_id: &str) {
        self.lock().bump_after_inspect.insert(service_id.to_string());
    }

    /// Overwrite the reported state of the latest update.
    pub fn set_update_status(&self, service_id: &str, state: UpdateState, message: &str) {
        let mut inner = self.lock();
        if let Some(id) = inner.resolve(service_id) {
            inner.set_status(&id, state, message);
        }
    }

    /// Returned as a warning by the next update.
    pub fn push_warning(&self, message: &str) {
        self.lock().warnings.push_back(message.to_string());
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn service(&self, id_or_name: &str) -> Option<VersionedSpec> {
        let inner = self.lock();
        let id = inner.resolve(id_or_name)?;
        inner.services.get(&id).map(|record| VersionedSpec {
            id,
            version: record.version,
            spec: record.spec.clone(),
            update_status: record.update_status.clone(),
        })
    }

    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.lock().services.keys().cloned().collect()
    }

    /// Healthy running replica counts recorded after every change.
    pub fn healthy_observations(&self, service_id: &str) -> Vec<u64> {
        self.lock()
            .healthy_log
            .get(service_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn call_count(&self, call: Call) -> usize {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn inspect_service(&self, id: &str) -> OrchestratorResult<VersionedSpec> {
        self.enter(Call::Inspect).await?;
        let mut inner = self.lock();
        let resolved = inner
            .resolve(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        let record = inner
            .services
            .get_mut(&resolved)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        let current = VersionedSpec {
            id: resolved.clone(),
            version: record.version,
            spec: record.spec.clone(),
            update_status: record.update_status.clone(),
        };
        if inner.bump_after_inspect.remove(&resolved)
            && let Some(record) = inner.services.get_mut(&resolved)
        {
            record.version = record.version.next();
        }
        Ok(current)
    }

    async fn update_service(
        &self,
        id: &str,
        version: SpecVersion,
        spec: &ServiceSpec,
    ) -> OrchestratorResult<Vec<String>> {
        self.enter(Call::Update).await?;
        let mut inner = self.lock();
        let resolved = inner
            .resolve(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        let current = inner
            .services
            .get(&resolved)
            .map(|r| r.version)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        if current != version {
            return Err(OrchestratorError::VersionConflict {
                service: resolved,
                version,
            });
        }
        inner.apply_update(&resolved, spec.clone());
        Ok(inner.warnings.drain(..).collect())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> OrchestratorResult<ServiceId> {
        self.enter(Call::Create).await?;
        let mut inner = self.lock();
        if inner.resolve(&spec.name).is_some() {
            return Err(OrchestratorError::Api {
                status: 409,
                message: format!("name conflicts with an existing object: {}", spec.name),
            });
        }
        Ok(inner.insert_service(spec.clone()))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>> {
        self.enter(Call::ListTasks).await?;
        let inner = self.lock();
        let service = match &filter.service {
            Some(s) => Some(
                inner
                    .resolve(s)
                    .ok_or_else(|| OrchestratorError::NotFound(s.clone()))?,
            ),
            None => None,
        };
        Ok(inner
            .tasks
            .iter()
            .filter(|t| service.as_ref().is_none_or(|s| &t.task.service_id == s))
            .map(|t| t.task.clone())
            .collect())
    }

    async fn container_stats(&self, container_id: &str) -> OrchestratorResult<UsageSample> {
        self.enter(Call::Stats).await?;
        let inner = self.lock();
        if let Some(sample) = inner.usage.get(container_id) {
            return Ok(*sample);
        }
        let known = inner
            .tasks
            .iter()
            .any(|t| t.task.container_id.as_deref() == Some(container_id));
        if known {
            Ok(UsageSample::default())
        } else {
            Err(OrchestratorError::NotFound(container_id.to_string()))
        }
    }
}
