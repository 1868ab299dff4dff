pub mod autoscale;
pub mod check;
pub mod deploy;
pub mod rolling;

use std::sync::Arc;

use anyhow::Context;

use fleet_core::FleetConfig;
use fleet_docker::DockerOrchestrator;

/// Engine-backed orchestrator from the `[docker]` section.
pub fn orchestrator(config: &FleetConfig) -> anyhow::Result<Arc<DockerOrchestrator>> {
    let orchestrator = DockerOrchestrator::from_config(&config.docker)
        .with_context(|| format!("invalid [docker].host {:?}", config.docker.host))?;
    Ok(Arc::new(orchestrator))
}
