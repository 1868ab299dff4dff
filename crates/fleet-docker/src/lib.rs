//! fleet-docker: the concrete systems behind the fleet capability traits.
//!
//! - **`engine`**: `Orchestrator` over the Docker Engine swarm API
//! - **`transport`**: HTTP/1.1 over a unix socket or TCP
//! - **`wire`**: engine JSON shapes and their domain mapping
//! - **`git`**: `SourceFetcher` using the `git` CLI
//! - **`builder`**: `ImageBuilder` using the `docker` CLI
//! - **`preflight`**: engine reachability and swarm-manager checks

pub mod builder;
pub mod engine;
pub mod git;
pub mod preflight;
pub mod transport;
pub mod wire;

pub use builder::DockerCliBuilder;
pub use engine::{DockerOrchestrator, registry_auth};
pub use git::GitFetcher;
pub use preflight::{PreflightError, check_engine, check_swarm_manager, preflight};
pub use transport::{EngineClient, Endpoint, TransportError};
