//! CPU utilization sampling.
//!
//! A service's utilization is the mean CPU percentage of its running
//! tasks. Each task contributes one percentage computed from two
//! successive accounting windows:
//!
//! ```text
//! cpu% = (cpu_delta / system_delta) * online_cpus * 100
//! ```
//!
//! Readings with a non-positive delta are measurement artifacts and are
//! left out of the mean rather than counted as idle.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use fleet_core::{
    Orchestrator, OrchestratorError, ServiceId, SpecVersion, TaskFilter, TaskState, UsageSample,
    bounded,
};

/// One tick's view of a service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSnapshot {
    pub service_id: ServiceId,
    /// Replicas in the service spec, not the number of running tasks.
    pub replicas: u64,
    pub cpu_percent: f64,
    /// Spec version the replica count was read at.
    pub version: SpecVersion,
}

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to inspect {service}: {source}")]
    Inspect {
        service: String,
        source: OrchestratorError,
    },

    #[error("failed to list tasks of {service}: {source}")]
    ListTasks {
        service: String,
        source: OrchestratorError,
    },

    /// Every running task was queried and every stats call failed.
    #[error("no stats readable for any task of {service}: {source}")]
    Stats {
        service: String,
        source: OrchestratorError,
    },
}

impl SampleError {
    pub fn is_transient(&self) -> bool {
        match self {
            SampleError::Inspect { source, .. }
            | SampleError::ListTasks { source, .. }
            | SampleError::Stats { source, .. } => source.is_transient(),
        }
    }
}

/// CPU percentage for one reading, or `None` if either delta is not positive.
pub fn cpu_percent(sample: &UsageSample) -> Option<f64> {
    let cpu_delta = sample.cpu_total as i128 - sample.precpu_total as i128;
    let system_delta = sample.system_total as i128 - sample.presystem_total as i128;
    if cpu_delta <= 0 || system_delta <= 0 {
        return None;
    }
    let cpus = sample.online_cpus.max(1) as f64;
    Some(cpu_delta as f64 / system_delta as f64 * cpus * 100.0)
}

/// Reads snapshots through the orchestrator, one bounded call at a time.
#[derive(Clone)]
pub struct MetricSampler {
    orchestrator: Arc<dyn Orchestrator>,
    call_timeout: Duration,
}

impl MetricSampler {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, call_timeout: Duration) -> Self {
        Self {
            orchestrator,
            call_timeout,
        }
    }

    /// Sample `service_id` (an ID or name).
    ///
    /// Failing to read an individual task's stats drops that task from the
    /// mean. Failing to read the service, its task list, or the stats of
    /// every running task is an error.
    pub async fn sample(&self, service_id: &str) -> Result<ServiceSnapshot, SampleError> {
        let current = bounded(self.call_timeout, self.orchestrator.inspect_service(service_id))
            .await
            .map_err(|source| SampleError::Inspect {
                service: service_id.to_string(),
                source,
            })?;

        let tasks = bounded(
            self.call_timeout,
            self.orchestrator.list_tasks(&TaskFilter::service(&current.id)),
        )
        .await
        .map_err(|source| SampleError::ListTasks {
            service: service_id.to_string(),
            source,
        })?;

        let mut readings = Vec::new();
        let mut queried = 0usize;
        let mut failed = 0usize;
        let mut last_error = None;
        for task in tasks.iter().filter(|t| t.state == TaskState::Running) {
            let Some(container) = task.container_id.as_deref() else {
                continue;
            };
            queried += 1;
            match bounded(self.call_timeout, self.orchestrator.container_stats(container)).await {
                Ok(sample) => {
                    if let Some(pct) = cpu_percent(&sample) {
                        readings.push(pct);
                    }
                }
                Err(e) => {
                    warn!(
                        service = %service_id,
                        task = %task.id,
                        error = %e,
                        "stats unavailable, task left out of sample"
                    );
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }

        // An engine that answers no stats call says nothing about load.
        if let Some(source) = last_error.filter(|_| failed == queried) {
            return Err(SampleError::Stats {
                service: service_id.to_string(),
                source,
            });
        }

        let cpu_percent = if readings.is_empty() {
            0.0
        } else {
            readings.iter().sum::<f64>() / readings.len() as f64
        };

        debug!(
            service = %service_id,
            replicas = current.spec.replicas,
            cpu = cpu_percent,
            counted = readings.len(),
            "sampled service"
        );

        Ok(ServiceSnapshot {
            service_id: current.id,
            replicas: current.spec.replicas,
            cpu_percent,
            version: current.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::ServiceSpec;
    use fleet_core::memory::{Call, InMemoryOrchestrator};

    fn usage(pct: u64, cpus: u32) -> UsageSample {
        UsageSample {
            cpu_total: 1_000 + pct,
            precpu_total: 1_000,
            system_total: 100 * cpus as u64 + 5_000,
            presystem_total: 5_000,
            online_cpus: cpus,
        }
    }

    fn sampler(orch: &InMemoryOrchestrator) -> MetricSampler {
        MetricSampler::new(Arc::new(orch.clone()), Duration::from_secs(5))
    }

    #[test]
    fn cpu_percent_formula() {
        let sample = UsageSample {
            cpu_total: 300,
            precpu_total: 100,
            system_total: 2_000,
            presystem_total: 1_000,
            online_cpus: 4,
        };
        // 200 / 1000 * 4 * 100
        assert_eq!(cpu_percent(&sample), Some(80.0));
    }

    #[test]
    fn cpu_percent_rejects_non_positive_deltas() {
        let mut sample = usage(50, 1);
        sample.system_total = sample.presystem_total;
        assert_eq!(cpu_percent(&sample), None);

        let mut sample = usage(50, 1);
        sample.cpu_total = sample.precpu_total;
        assert_eq!(cpu_percent(&sample), None);

        // Counter reset.
        let mut sample = usage(50, 1);
        sample.cpu_total = 0;
        assert_eq!(cpu_percent(&sample), None);
    }

    #[tokio::test]
    async fn averages_running_tasks() {
        let orch = InMemoryOrchestrator::new();
        let mut spec = ServiceSpec::new("api", "api:v1");
        spec.replicas = 2;
        let id = orch.add_service(spec);
        let containers = orch.running_containers(&id);
        orch.set_usage(&containers[0], usage(60, 1));
        orch.set_usage(&containers[1], usage(90, 1));

        let snap = sampler(&orch).sample("api").await.unwrap();
        assert_eq!(snap.service_id, id);
        assert_eq!(snap.replicas, 2);
        assert!((snap.cpu_percent - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn skips_non_running_and_artifact_samples() {
        let orch = InMemoryOrchestrator::new();
        let id = orch.add_service(ServiceSpec::new("api", "api:v1"));
        orch.set_service_usage(&id, usage(40, 2));

        orch.add_task(&id, TaskState::Failed, Some("ctr-dead"));
        orch.set_usage("ctr-dead", usage(100, 1));
        orch.add_task(&id, TaskState::Running, Some("ctr-flat"));
        orch.set_usage("ctr-flat", UsageSample::default());
        orch.add_task(&id, TaskState::Pending, None);

        let snap = sampler(&orch).sample(&id).await.unwrap();
        assert!((snap.cpu_percent - 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_qualifying_tasks_is_zero_load() {
        let orch = InMemoryOrchestrator::new();
        let mut spec = ServiceSpec::new("api", "api:v1");
        spec.replicas = 0;
        orch.add_service(spec);

        let snap = sampler(&orch).sample("api").await.unwrap();
        assert_eq!(snap.cpu_percent, 0.0);
        assert_eq!(snap.replicas, 0);
    }

    #[tokio::test]
    async fn replicas_come_from_spec() {
        let orch = InMemoryOrchestrator::new();
        let mut spec = ServiceSpec::new("api", "api:v1");
        spec.replicas = 3;
        let id = orch.add_service(spec);
        orch.add_task(&id, TaskState::Running, Some("ctr-extra"));

        let snap = sampler(&orch).sample(&id).await.unwrap();
        assert_eq!(snap.replicas, 3);
    }

    #[tokio::test]
    async fn stats_failure_drops_task() {
        let orch = InMemoryOrchestrator::new();
        let mut spec = ServiceSpec::new("api", "api:v1");
        spec.replicas = 2;
        let id = orch.add_service(spec);
        orch.set_service_usage(&id, usage(80, 1));
        orch.fail_next(Call::Stats, OrchestratorError::Unavailable("reset".into()));

        let snap = sampler(&orch).sample(&id).await.unwrap();
        assert!((snap.cpu_percent - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stats_outage_is_an_error_not_idle() {
        let orch = InMemoryOrchestrator::new();
        let mut spec = ServiceSpec::new("api", "api:v1");
        spec.replicas = 3;
        let id = orch.add_service(spec);
        orch.set_service_usage(&id, usage(5, 1));
        for _ in 0..3 {
            orch.fail_next(
                Call::Stats,
                OrchestratorError::Unavailable("engine unreachable".into()),
            );
        }

        let err = sampler(&orch).sample(&id).await.unwrap_err();
        assert!(matches!(
            err,
            SampleError::Stats {
                source: OrchestratorError::Unavailable(_),
                ..
            }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn failed_and_flat_readings_still_sample_as_idle() {
        let orch = InMemoryOrchestrator::new();
        let id = orch.add_service(ServiceSpec::new("api", "api:v1"));
        orch.set_service_usage(&id, UsageSample::default());
        orch.add_task(&id, TaskState::Running, Some("ctr-down"));
        orch.fail_next(Call::Stats, OrchestratorError::Unavailable("reset".into()));

        let snap = sampler(&orch).sample(&id).await.unwrap();
        assert_eq!(snap.cpu_percent, 0.0);
    }

    #[tokio::test]
    async fn missing_service_is_error() {
        let orch = InMemoryOrchestrator::new();
        let err = sampler(&orch).sample("ghost").await.unwrap_err();
        assert!(matches!(
            err,
            SampleError::Inspect {
                source: OrchestratorError::NotFound(_),
                ..
            }
        ));
        assert!(!err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_task_list_times_out() {
        let orch = InMemoryOrchestrator::new();
        orch.add_service(ServiceSpec::new("api", "api:v1"));
        orch.hang(Call::ListTasks);

        let err = sampler(&orch).sample("api").await.unwrap_err();
        assert!(matches!(
            err,
            SampleError::ListTasks {
                source: OrchestratorError::Timeout(_),
                ..
            }
        ));
        assert!(err.is_transient());
    }
}
