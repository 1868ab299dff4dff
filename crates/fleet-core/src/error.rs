//! Error types for orchestration calls.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::types::SpecVersion;

/// Result type alias for orchestration calls.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors an orchestration round-trip can produce.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    #[error("service not found: {0}")]
    NotFound(String),

    #[error("version conflict on {service}: {version} is no longer current")]
    VersionConflict { service: String, version: SpecVersion },

    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    #[error("orchestrator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("orchestrator rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed orchestrator response: {0}")]
    Decode(String),
}

impl OrchestratorError {
    /// Transient errors are retried on the next tick and never escalated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Unavailable(_)
                | OrchestratorError::Timeout(_)
                | OrchestratorError::VersionConflict { .. }
        )
    }
}

/// Run an orchestration call with a deadline.
///
/// The inner future is dropped when the deadline passes.
pub async fn bounded<T, F>(limit: Duration, call: F) -> OrchestratorResult<T>
where
    F: Future<Output = OrchestratorResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(OrchestratorError::Unavailable("eof".into()).is_transient());
        assert!(OrchestratorError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(
            OrchestratorError::VersionConflict {
                service: "api".into(),
                version: SpecVersion(3),
            }
            .is_transient()
        );
        assert!(!OrchestratorError::NotFound("api".into()).is_transient());
        assert!(
            !OrchestratorError::Api {
                status: 400,
                message: "bad spec".into(),
            }
            .is_transient()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out_hung_call() {
        let result: OrchestratorResult<()> =
            bounded(Duration::from_secs(2), std::future::pending()).await;
        assert_eq!(result, Err(OrchestratorError::Timeout(Duration::from_secs(2))));
    }

    #[tokio::test]
    async fn bounded_passes_through_result() {
        let result = bounded(Duration::from_secs(2), async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
