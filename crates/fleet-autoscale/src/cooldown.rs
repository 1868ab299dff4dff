//! Per-service cooldown windows.
//!
//! Timestamps use `tokio::time::Instant`, so paused test clocks apply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use fleet_core::ServiceId;

/// Last successful scale time per service. In memory only; a restart
/// forgets every window.
#[derive(Debug, Clone, Default)]
pub struct CooldownTracker {
    last_scaled: Arc<RwLock<HashMap<ServiceId, Instant>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `window` has elapsed since the last recorded scale.
    pub async fn allowed(&self, service_id: &str, window: Duration) -> bool {
        match self.last_scaled.read().await.get(service_id) {
            Some(at) => at.elapsed() >= window,
            None => true,
        }
    }

    /// Start a new window now.
    pub async fn record(&self, service_id: &str) {
        self.last_scaled
            .write()
            .await
            .insert(service_id.to_string(), Instant::now());
    }

    pub async fn forget(&self, service_id: &str) {
        self.last_scaled.write().await.remove(service_id);
    }

    pub async fn last_scaled(&self, service_id: &str) -> Option<Instant> {
        self.last_scaled.read().await.get(service_id).copied()
    }

    pub async fn len(&self) -> usize {
        self.last_scaled.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.last_scaled.read().await.is_empty()
    }
}
