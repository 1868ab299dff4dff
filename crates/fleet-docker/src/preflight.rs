//! Startup checks: the engine answers, and it can manage a swarm.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::transport::EngineClient;
use crate::wire::SystemInfo;

pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
pub const SWARM_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("docker engine is not reachable: {0}")]
    EngineUnreachable(String),

    #[error("{check} check timed out after {after:?}")]
    Timeout { check: &'static str, after: Duration },

    #[error("failed to read engine info: {0}")]
    Info(String),

    #[error("swarm mode is not enabled on this engine (node state: {state:?})")]
    NotSwarmManager { state: String },
}

/// `GET /_ping`, bounded by [`PING_TIMEOUT`].
pub async fn check_engine(client: &EngineClient) -> Result<(), PreflightError> {
    let response = tokio::time::timeout(PING_TIMEOUT, client.get(&client.path("/_ping")))
        .await
        .map_err(|_| PreflightError::Timeout {
            check: "engine ping",
            after: PING_TIMEOUT,
        })?
        .map_err(|e| PreflightError::EngineUnreachable(e.to_string()))?;

    if !response.status.is_success() {
        return Err(PreflightError::EngineUnreachable(format!(
            "ping returned {}",
            response.status
        )));
    }
    info!(endpoint = %client.endpoint(), "docker engine is running");
    Ok(())
}

/// `GET /info` and require a swarm manager, bounded by [`SWARM_TIMEOUT`].
pub async fn check_swarm_manager(client: &EngineClient) -> Result<(), PreflightError> {
    let response = tokio::time::timeout(SWARM_TIMEOUT, client.get(&client.path("/info")))
        .await
        .map_err(|_| PreflightError::Timeout {
            check: "swarm",
            after: SWARM_TIMEOUT,
        })?
        .map_err(|e| PreflightError::Info(e.to_string()))?;

    if !response.status.is_success() {
        return Err(PreflightError::Info(format!("info returned {}", response.status)));
    }
    let info: SystemInfo =
        serde_json::from_slice(&response.body).map_err(|e| PreflightError::Info(e.to_string()))?;

    if !info.swarm.control_available {
        warn!(state = %info.swarm.local_node_state, "swarm mode is not enabled");
        return Err(PreflightError::NotSwarmManager {
            state: info.swarm.local_node_state,
        });
    }
    info!("swarm mode is active");
    Ok(())
}

/// Both checks, engine first.
pub async fn preflight(client: &EngineClient) -> Result<(), PreflightError> {
    check_engine(client).await?;
    check_swarm_manager(client).await
}
