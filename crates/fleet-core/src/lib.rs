//! fleet-core: shared vocabulary for the fleet control plane.
//!
//! Every other crate talks to the outside world through the capability
//! traits defined here and exchanges the domain types defined here.
//!
//! # Components
//!
//! - **`types`**: service specs, update/rollback policy, tasks, usage samples
//! - **`capability`**: `Orchestrator`, `SourceFetcher`, `ImageBuilder`
//! - **`error`**: typed orchestration errors (transient vs. permanent)
//! - **`units`**: total parsers for CPU, memory and duration strings
//! - **`config`**: operator configuration (`config.toml`)
//! - **`memory`**: in-memory orchestrator for tests (`testing` feature)

pub mod capability;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod types;
pub mod units;

pub use capability::{
    BuildRequest, ImageBuilder, Orchestrator, SourceFetcher, SourceTree, artifact_name,
};
pub use config::{ConfigError, FleetConfig};
pub use error::{OrchestratorError, OrchestratorResult, bounded};
pub use types::*;
pub use units::{UnitError, parse_cpus, parse_duration, parse_memory};
