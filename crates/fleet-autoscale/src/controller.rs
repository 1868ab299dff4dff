//! Autoscaler: the periodic scaling loop.
//!
//! Each tick walks a snapshot of the rule store. For every rule it checks
//! the cooldown, samples the service, decides, and on a scale decision
//! re-reads the spec and writes the new replica count with the version it
//! read. The cooldown window starts only after the orchestrator accepts
//! the write.
//!
//! A failure for one service is logged and skips that service for the
//! tick. Every orchestrator call, and each service's whole evaluation, is
//! bounded so one hung service cannot stall the others.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use fleet_core::{Orchestrator, OrchestratorError, ServiceId, bounded};

use crate::cooldown::CooldownTracker;
use crate::decision::{ScaleDecision, decide};
use crate::rule::{RuleError, ScalingRule};
use crate::sampler::{MetricSampler, ServiceSnapshot};
use crate::store::RuleStore;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EVALUATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of evaluating one rule during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Scaled { from: u64, to: u64 },
    NoAction,
    CoolingDown,
    /// The service was skipped this tick; carries the reason.
    Skipped(String),
}

pub struct Autoscaler {
    orchestrator: Arc<dyn Orchestrator>,
    sampler: MetricSampler,
    rules: RuleStore,
    cooldowns: CooldownTracker,
    call_timeout: Duration,
    evaluation_timeout: Duration,
}

impl Autoscaler {
    /// Create an autoscaler over `rules`. Rules registered on any clone of
    /// the store are picked up on the next tick.
    pub fn new(orchestrator: Arc<dyn Orchestrator>, rules: RuleStore) -> Self {
        Self {
            sampler: MetricSampler::new(orchestrator.clone(), DEFAULT_CALL_TIMEOUT),
            orchestrator,
            rules,
            cooldowns: CooldownTracker::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            evaluation_timeout: DEFAULT_EVALUATION_TIMEOUT,
        }
    }

    /// Ceiling on every individual orchestrator call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self.sampler = MetricSampler::new(self.orchestrator.clone(), timeout);
        self
    }

    /// Ceiling on one service's complete evaluation.
    pub fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    pub async fn register_rule(&self, rule: ScalingRule) -> Result<(), RuleError> {
        self.rules.register(rule).await.map(|_| ())
    }

    /// Drop a rule and its cooldown entry.
    pub async fn remove_rule(&self, service_id: &str) -> Option<ScalingRule> {
        let removed = self.rules.remove(service_id).await;
        self.cooldowns.forget(service_id).await;
        if removed.is_some() {
            info!(service = %service_id, "removed scaling rule");
        }
        removed
    }

    /// Evaluate every registered rule once.
    pub async fn tick(&self) -> Vec<(ServiceId, TickOutcome)> {
        let rules = self.rules.snapshot().await;
        let mut outcomes = Vec::with_capacity(rules.len());

        for rule in &rules {
            let outcome =
                match tokio::time::timeout(self.evaluation_timeout, self.evaluate_rule(rule)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(
                            service = %rule.service_id,
                            timeout_secs = self.evaluation_timeout.as_secs(),
                            "evaluation timed out, skipping"
                        );
                        TickOutcome::Skipped(format!(
                            "evaluation exceeded {:?}",
                            self.evaluation_timeout
                        ))
                    }
                };
            outcomes.push((rule.service_id.clone(), outcome));
        }

        outcomes
    }

    /// Evaluate a single rule: cooldown, sample, decide, scale.
    pub async fn evaluate_rule(&self, rule: &ScalingRule) -> TickOutcome {
        let service = rule.service_id.as_str();

        if !self.cooldowns.allowed(service, rule.cooldown).await {
            debug!(service = %service, "in cooldown window");
            return TickOutcome::CoolingDown;
        }

        let snapshot = match self.sampler.sample(service).await {
            Ok(s) => s,
            Err(e) => {
                warn!(service = %service, error = %e, "sampling failed, skipping");
                return TickOutcome::Skipped(e.to_string());
            }
        };

        let decision = decide(rule, &snapshot);
        let Some(target) = decision.target() else {
            debug!(
                service = %service,
                replicas = snapshot.replicas,
                cpu = snapshot.cpu_percent,
                "no scaling needed"
            );
            return TickOutcome::NoAction;
        };

        match self.scale(&snapshot, target).await {
            Ok(()) => {
                // A rule removed mid-evaluation leaves no cooldown behind.
                if self.rules.contains(service).await {
                    self.cooldowns.record(service).await;
                }
                let direction = match decision {
                    ScaleDecision::ScaleUp(_) => "up",
                    _ => "down",
                };
                info!(
                    service = %service,
                    from = snapshot.replicas,
                    to = target,
                    cpu = snapshot.cpu_percent,
                    direction,
                    "scaled service"
                );
                TickOutcome::Scaled {
                    from: snapshot.replicas,
                    to: target,
                }
            }
            Err(e) if e.is_transient() => {
                warn!(service = %service, error = %e, "scale rejected, retrying next tick");
                TickOutcome::Skipped(e.to_string())
            }
            Err(e) => {
                error!(service = %service, error = %e, "scale failed");
                TickOutcome::Skipped(e.to_string())
            }
        }
    }

    /// Write `replicas` with compare-and-swap against the sampled version.
    async fn scale(&self, snapshot: &ServiceSnapshot, replicas: u64) -> Result<(), OrchestratorError> {
        let current = bounded(
            self.call_timeout,
            self.orchestrator.inspect_service(&snapshot.service_id),
        )
        .await?;

        // Someone else wrote the spec since we sampled it; the decision may
        // be based on a replica count that no longer holds.
        if current.version != snapshot.version {
            return Err(OrchestratorError::VersionConflict {
                service: snapshot.service_id.clone(),
                version: snapshot.version,
            });
        }

        let mut spec = current.spec;
        spec.replicas = replicas;
        let warnings = bounded(
            self.call_timeout,
            self.orchestrator
                .update_service(&current.id, current.version, &spec),
        )
        .await?;

        for warning in warnings {
            warn!(service = %snapshot.service_id, warning = %warning, "orchestrator warning");
        }
        Ok(())
    }

    /// Run ticks every `interval` until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
            // A tick may sit on slow engine calls; shutdown must not wait for it.
            tokio::select! {
                outcomes = self.tick() => {
                    let scaled = outcomes
                        .iter()
                        .filter(|(_, o)| matches!(o, TickOutcome::Scaled { .. }))
                        .count();
                    debug!(rules = outcomes.len(), scaled, "autoscaler tick complete");
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("autoscaler shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::memory::{Call, InMemoryOrchestrator};
    use fleet_core::{ServiceSpec, UsageSample};

    fn usage(pct: u64) -> UsageSample {
        UsageSample {
            cpu_total: pct,
            precpu_total: 0,
            system_total: 100,
            presystem_total: 0,
            online_cpus: 1,
        }
    }

    fn rule(service: &str) -> ScalingRule {
        ScalingRule {
            service_id: service.to_string(),
            min_replicas: 1,
            max_replicas: 5,
            cpu_threshold: 70.0,
            scale_up_step: 2,
            scale_down_step: 1,
            cooldown: Duration::from_secs(60),
        }
    }

    fn service(orch: &InMemoryOrchestrator, name: &str, replicas: u64, cpu: u64) -> ServiceId {
        let mut spec = ServiceSpec::new(name, &format!("{name}:v1"));
        spec.replicas = replicas;
        let id = orch.add_service(spec);
        orch.set_service_usage(&id, usage(cpu));
        id
    }

    async fn autoscaler(orch: &InMemoryOrchestrator, rules: &[ScalingRule]) -> Autoscaler {
        let scaler = Autoscaler::new(Arc::new(orch.clone()), RuleStore::new());
        for r in rules {
            scaler.register_rule(r.clone()).await.unwrap();
        }
        scaler
    }

    #[tokio::test(start_paused = true)]
    async fn scales_then_respects_cooldown() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 2, 85);
        let scaler = autoscaler(&orch, &[rule(&id)]).await;

        let outcomes = scaler.tick().await;
        assert_eq!(outcomes[0].1, TickOutcome::Scaled { from: 2, to: 4 });
        assert_eq!(orch.service(&id).unwrap().spec.replicas, 4);

        orch.set_service_usage(&id, usage(85));
        let outcomes = scaler.tick().await;
        assert_eq!(outcomes[0].1, TickOutcome::CoolingDown);
        assert_eq!(orch.service(&id).unwrap().spec.replicas, 4);

        tokio::time::advance(Duration::from_secs(60)).await;
        let outcomes = scaler.tick().await;
        assert_eq!(outcomes[0].1, TickOutcome::Scaled { from: 4, to: 5 });
    }

    #[tokio::test]
    async fn failed_update_does_not_start_cooldown() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 2, 85);
        let scaler = autoscaler(&orch, &[rule(&id)]).await;
        orch.fail_next(Call::Update, OrchestratorError::Unavailable("eof".into()));

        let outcomes = scaler.tick().await;
        assert!(matches!(outcomes[0].1, TickOutcome::Skipped(_)));
        assert!(scaler.cooldowns().is_empty().await);

        let outcomes = scaler.tick().await;
        assert_eq!(outcomes[0].1, TickOutcome::Scaled { from: 2, to: 4 });
    }

    #[tokio::test]
    async fn concurrent_write_skips_tick() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 2, 85);
        let scaler = autoscaler(&orch, &[rule(&id)]).await;
        orch.bump_version_after_next_inspect(&id);

        let outcomes = scaler.tick().await;
        assert!(matches!(&outcomes[0].1, TickOutcome::Skipped(msg) if msg.contains("version conflict")));
        assert_eq!(orch.service(&id).unwrap().spec.replicas, 2);
        assert_eq!(orch.call_count(Call::Update), 0);

        let outcomes = scaler.tick().await;
        assert_eq!(outcomes[0].1, TickOutcome::Scaled { from: 2, to: 4 });
    }

    #[tokio::test]
    async fn one_failing_service_does_not_block_others() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 2, 85);
        let scaler = autoscaler(&orch, &[rule("ghost"), rule(&id)]).await;

        let outcomes = scaler.tick().await;
        assert_eq!(outcomes.len(), 2);
        for (service, outcome) in outcomes {
            if service == "ghost" {
                assert!(matches!(outcome, TickOutcome::Skipped(_)));
            } else {
                assert_eq!(outcome, TickOutcome::Scaled { from: 2, to: 4 });
            }
        }
    }

    #[tokio::test]
    async fn stats_outage_skips_instead_of_scaling_down() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 3, 5);
        let scaler = autoscaler(&orch, &[rule(&id)]).await;
        for _ in 0..3 {
            orch.fail_next(
                Call::Stats,
                OrchestratorError::Unavailable("engine unreachable".into()),
            );
        }

        let outcomes = scaler.tick().await;
        assert!(matches!(&outcomes[0].1, TickOutcome::Skipped(msg) if msg.contains("no stats")));
        assert_eq!(orch.service(&id).unwrap().spec.replicas, 3);
        assert_eq!(orch.call_count(Call::Update), 0);
        assert!(scaler.cooldowns().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_is_bounded() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 2, 85);
        let scaler = autoscaler(&orch, &[rule(&id)])
            .await
            .with_call_timeout(Duration::from_secs(2));
        orch.hang(Call::Inspect);

        let outcomes = scaler.tick().await;
        assert!(matches!(&outcomes[0].1, TickOutcome::Skipped(msg) if msg.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_hung_tick() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 2, 85);
        let scaler = Arc::new(autoscaler(&orch, &[rule(&id)]).await);
        orch.hang(Call::ListTasks);

        let (tx, rx) = tokio::sync::watch::channel(false);
        let runner = tokio::spawn({
            let scaler = scaler.clone();
            async move { scaler.run(Duration::from_secs(30), rx).await }
        });

        // One second into the first tick, well inside the call timeout.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(orch.call_count(Call::ListTasks), 1);
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run should return while the tick is still blocked")
            .unwrap();
        assert_eq!(orch.call_count(Call::Update), 0);
    }

    #[tokio::test]
    async fn dead_band_and_scale_down() {
        let orch = InMemoryOrchestrator::new();
        let busy = service(&orch, "busy", 3, 50);
        let idle = service(&orch, "idle", 3, 10);
        let scaler = autoscaler(&orch, &[rule(&busy), rule(&idle)]).await;

        let outcomes: std::collections::HashMap<_, _> = scaler.tick().await.into_iter().collect();
        assert_eq!(outcomes[&busy], TickOutcome::NoAction);
        assert_eq!(outcomes[&idle], TickOutcome::Scaled { from: 3, to: 2 });
    }

    #[tokio::test]
    async fn duplicate_registration_evaluates_once() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 2, 85);
        let scaler = autoscaler(&orch, &[rule(&id), rule(&id)]).await;

        let outcomes = scaler.tick().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(orch.call_count(Call::Update), 1);
        assert_eq!(scaler.cooldowns().len().await, 1);
    }

    #[tokio::test]
    async fn remove_rule_forgets_cooldown() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 2, 85);
        let scaler = autoscaler(&orch, &[rule(&id)]).await;
        scaler.tick().await;
        assert!(scaler.cooldowns().last_scaled(&id).await.is_some());

        assert!(scaler.remove_rule(&id).await.is_some());
        assert!(scaler.cooldowns().is_empty().await);
        assert!(scaler.tick().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 2, 85);
        let scaler = Arc::new(autoscaler(&orch, &[rule(&id)]).await);
        let (tx, rx) = tokio::sync::watch::channel(false);

        let task = {
            let scaler = scaler.clone();
            tokio::spawn(async move { scaler.run(Duration::from_secs(30), rx).await })
        };

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(orch.service(&id).unwrap().spec.replicas, 4);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop did not stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rules_registered_while_running_are_picked_up() {
        let orch = InMemoryOrchestrator::new();
        let id = service(&orch, "api", 2, 85);
        let rules = RuleStore::new();
        let scaler = Arc::new(Autoscaler::new(Arc::new(orch.clone()), rules.clone()));
        let (tx, rx) = tokio::sync::watch::channel(false);

        let task = {
            let scaler = scaler.clone();
            tokio::spawn(async move { scaler.run(Duration::from_secs(30), rx).await })
        };

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(orch.service(&id).unwrap().spec.replicas, 2);

        rules.register(rule(&id)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(orch.service(&id).unwrap().spec.replicas, 4);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
