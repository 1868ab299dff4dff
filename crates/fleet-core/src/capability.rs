//! Capability traits for the systems the control plane drives.
//!
//! The orchestrator, the version-control host and the image builder are
//! all external. Controllers hold them as `Arc<dyn Trait>` so tests can
//! substitute in-memory fakes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::error::OrchestratorResult;
use crate::types::*;

/// The container orchestration API.
///
/// Every method is a network round-trip and may fail transiently.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Read a service's current spec and version. Accepts an ID or a name.
    async fn inspect_service(&self, id: &str) -> OrchestratorResult<VersionedSpec>;

    /// Replace a service's spec if `version` is still current.
    ///
    /// Returns non-fatal warnings reported by the orchestrator.
    async fn update_service(
        &self,
        id: &str,
        version: SpecVersion,
        spec: &ServiceSpec,
    ) -> OrchestratorResult<Vec<String>>;

    /// Create a new service, returning its ID.
    async fn create_service(&self, spec: &ServiceSpec) -> OrchestratorResult<ServiceId>;

    async fn list_tasks(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>>;

    /// One-shot resource usage reading for a container.
    async fn container_stats(&self, container_id: &str) -> OrchestratorResult<UsageSample>;
}

/// A fetched source checkout living in a temporary directory.
///
/// The directory is removed when the tree is dropped, whichever way the
/// owning operation ends.
#[derive(Debug)]
pub struct SourceTree {
    dir: TempDir,
    name: String,
}

impl SourceTree {
    /// Wrap a checkout. `name` is the repository's short name.
    pub fn new(dir: TempDir, name: &str) -> Self {
        Self {
            dir,
            name: name.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Artifact name for a repository: its last path segment without `.git`.
///
/// Handles `https://host/org/shop.git`, `git@host:org/shop.git` and
/// trailing slashes.
pub fn artifact_name(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() || name.contains('@') {
        return None;
    }
    Some(name.to_ascii_lowercase())
}

/// Version-control fetch.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Check out `reference` (branch or tag) of `url` into a fresh tree.
    async fn fetch(&self, url: &str, reference: &str) -> anyhow::Result<SourceTree>;
}

/// Input to an image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Build context directory.
    pub context: PathBuf,
    /// Dockerfile name relative to the context.
    pub dockerfile: String,
    pub tag: ImageRef,
    pub args: BTreeMap<String, String>,
}

/// Image build and registry push.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> anyhow::Result<ImageRef>;

    async fn push(&self, image: &ImageRef, credentials: &RegistryCredentials) -> anyhow::Result<()>;
}
