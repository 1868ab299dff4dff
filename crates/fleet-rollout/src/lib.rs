//! fleet-rollout: zero-downtime rolling updates.
//!
//! A rolling update is a single compare-and-swap write of a service spec
//! that carries everything the orchestrator needs to replace replicas
//! safely: a start-first update policy, a stop-first rollback policy and
//! a health check. The orchestrator executes the replacement; this crate
//! prepares the spec, submits it, and optionally watches it converge.
//!
//! # Components
//!
//! - **`strategy`**: update/rollback/health-check policy and its defaults
//! - **`controller`**: `RollingUpdater` (apply, wait for convergence)

pub mod controller;
pub mod strategy;

pub use controller::{RollingUpdateRequest, RollingUpdater, RolloutError, RolloutReport};
pub use strategy::RolloutPolicy;
