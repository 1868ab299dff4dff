//! Source fetch with the `git` CLI.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use fleet_core::{SourceFetcher, SourceTree, artifact_name};

/// Shallow-clones a branch or tag into a temporary directory.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    program: PathBuf,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::with_program("git")
    }
}

impl GitFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, url: &str, reference: &str) -> anyhow::Result<SourceTree> {
        let name = artifact_name(url)
            .with_context(|| format!("cannot derive a repository name from {url:?}"))?;
        let dir = tempfile::Builder::new()
            .prefix("fleet-src-")
            .tempdir()
            .context("failed to create checkout directory")?;

        let mut cmd = Command::new(&self.program);
        cmd.args(["clone", "--quiet", "--depth", "1", "--branch", reference, "--", url])
            .arg(dir.path())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(?cmd, "running git");

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to execute {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git clone of {url} at {reference} failed (exit code: {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        info!(%url, %reference, path = %dir.path().display(), "fetched source");
        Ok(SourceTree::new(dir, &name))
    }
}
