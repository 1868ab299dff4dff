use anyhow::{Context, bail};
use tokio::sync::watch;

use fleet_autoscale::{Autoscaler, RuleStore, ScalingRule, TickOutcome};
use fleet_core::{FleetConfig, parse_duration};

pub async fn autoscale(
    config: &FleetConfig,
    interval: Option<&str>,
    once: bool,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if config.autoscale.rules.is_empty() {
        bail!("no [[autoscale.rules]] configured");
    }

    let interval = match interval {
        Some(value) => parse_duration(value).context("invalid --interval")?,
        None => config.autoscale.interval()?,
    };

    let autoscaler = Autoscaler::new(super::orchestrator(config)?, RuleStore::new())
        .with_call_timeout(config.autoscale.call_timeout()?);
    for rule in &config.autoscale.rules {
        autoscaler.register_rule(ScalingRule::try_from(rule)?).await?;
    }

    if once {
        for (service, outcome) in autoscaler.tick().await {
            match outcome {
                TickOutcome::Scaled { from, to } => println!("{service}: scaled {from} -> {to}"),
                TickOutcome::NoAction => println!("{service}: no action"),
                TickOutcome::CoolingDown => println!("{service}: cooling down"),
                TickOutcome::Skipped(reason) => println!("{service}: skipped ({reason})"),
            }
        }
        return Ok(());
    }

    autoscaler.run(interval, shutdown).await;
    Ok(())
}
