//! fleet-deploy: fetch, build, push and deploy services.
//!
//! Three entry points share one pipeline:
//!
//! - **repository**: clone a repository at a branch or tag, build its
//!   root `Dockerfile` as `<registry>/<repo>:latest`, push, create the service
//! - **manifest**: a YAML list of named services, each deployed independently
//! - **compose**: a compose-style file whose services may build from a
//!   local context instead of naming a registry image
//!
//! Manifest and compose services that already exist are updated through
//! the orchestrator's version check instead of being created.

pub mod compose;
pub mod manifest;
pub mod pipeline;
pub mod plan;
pub mod result;
pub mod schema;

pub use fleet_core::artifact_name;

pub use compose::ComposeFile;
pub use manifest::Manifest;
pub use pipeline::{Pipeline, PipelineConfig};
pub use plan::{BuildContext, ImageSource, PlanDefaults, ServicePlan};
pub use result::{DeployAction, DeploymentReport, DeploymentResult, Stage};
pub use schema::DefinitionError;
