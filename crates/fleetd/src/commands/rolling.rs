use std::time::Duration;

use anyhow::Context;
use clap::Args;

use fleet_core::{FleetConfig, ResourceLimits, parse_cpus, parse_duration, parse_memory};
use fleet_rollout::{RollingUpdateRequest, RollingUpdater, RolloutPolicy};

#[derive(Args)]
pub struct RollingArgs {
    /// Service ID or name.
    service: String,

    /// Image to roll out.
    #[arg(long)]
    image: String,

    #[arg(long, default_value = "3")]
    replicas: u64,

    /// CPU limit per task, e.g. `0.5`.
    #[arg(long)]
    cpus: Option<String>,

    /// Memory limit per task, e.g. `512M`.
    #[arg(long)]
    memory: Option<String>,

    /// Delay between replaced tasks (default: [deploy].update_delay).
    #[arg(long)]
    update_delay: Option<String>,

    /// Wait for the orchestrator to report the update settled.
    #[arg(long)]
    wait: bool,

    #[arg(long, default_value = "10m")]
    wait_timeout: String,
}

impl RollingArgs {
    fn resources(&self) -> anyhow::Result<Option<ResourceLimits>> {
        if self.cpus.is_none() && self.memory.is_none() {
            return Ok(None);
        }
        let nano_cpus = match &self.cpus {
            Some(value) => parse_cpus(value).context("invalid --cpus")?,
            None => 0,
        };
        let memory_bytes = match &self.memory {
            Some(value) => parse_memory(value).context("invalid --memory")?,
            None => 0,
        };
        Ok(Some(ResourceLimits {
            nano_cpus,
            memory_bytes,
        }))
    }
}

pub async fn rolling(config: &FleetConfig, args: RollingArgs) -> anyhow::Result<()> {
    let mut policy = RolloutPolicy::from_config(&config.deploy)?;
    if let Some(delay) = &args.update_delay {
        let delay = parse_duration(delay).context("invalid --update-delay")?;
        policy.update.delay = delay;
        policy.rollback.delay = delay;
    }
    let wait_timeout = parse_duration(&args.wait_timeout).context("invalid --wait-timeout")?;

    let request = RollingUpdateRequest {
        resources: args.resources()?,
        replicas: args.replicas,
        ..RollingUpdateRequest::new(&args.service, &args.image)
    };

    let updater = RollingUpdater::new(super::orchestrator(config)?, policy);
    let report = updater.apply(&request).await?;

    println!(
        "✓ Rolling update submitted for {} ({} -> {})",
        report.service_id, report.previous_image, report.image
    );
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }

    if args.wait {
        updater
            .wait_for_rollout(&report, wait_timeout, Duration::from_secs(2))
            .await?;
        println!("✓ Update of {} completed", report.service_id);
    }
    Ok(())
}
