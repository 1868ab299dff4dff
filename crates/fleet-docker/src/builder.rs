//! Image build and push with the `docker` CLI.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use fleet_core::{BuildRequest, ImageBuilder, ImageRef, RegistryCredentials};

#[derive(Debug, Clone)]
pub struct DockerCliBuilder {
    program: PathBuf,
}

impl Default for DockerCliBuilder {
    fn default() -> Self {
        Self::with_program("docker")
    }
}

impl DockerCliBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for `docker build`.
    pub fn build_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--file".to_string(),
            request.context.join(&request.dockerfile).display().to_string(),
            "--tag".to_string(),
            request.tag.0.clone(),
        ];
        for (key, value) in &request.args {
            args.push("--build-arg".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(request.context.display().to_string());
        args
    }

    async fn run(&self, what: &str, args: &[String], stdin: Option<&[u8]>) -> anyhow::Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(?cmd, "running docker");

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to execute {}", self.program.display()))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)
                .await
                .with_context(|| format!("failed to write to {what} stdin"))?;
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("{what} did not complete"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{what} failed (exit code: {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ImageBuilder for DockerCliBuilder {
    async fn build(&self, request: &BuildRequest) -> anyhow::Result<ImageRef> {
        info!(tag = %request.tag, context = %request.context.display(), "docker build");
        self.run("docker build", &Self::build_args(request), None)
            .await?;
        Ok(request.tag.clone())
    }

    async fn push(&self, image: &ImageRef, credentials: &RegistryCredentials) -> anyhow::Result<()> {
        if !credentials.username.is_empty() {
            let mut args = vec![
                "login".to_string(),
                "--username".to_string(),
                credentials.username.clone(),
                "--password-stdin".to_string(),
            ];
            if !credentials.server.is_empty() {
                args.push(credentials.server.clone());
            }
            self.run("docker login", &args, Some(credentials.password.as_bytes()))
                .await?;
        }

        info!(%image, "docker push");
        self.run("docker push", &["push".to_string(), image.0.clone()], None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn build_arguments() {
        let request = BuildRequest {
            context: PathBuf::from("/tmp/shop"),
            dockerfile: "Dockerfile".into(),
            tag: ImageRef("registry.local/shop:latest".into()),
            args: BTreeMap::from([("RUST_VERSION".to_string(), "1.85".to_string())]),
        };
        assert_eq!(
            DockerCliBuilder::build_args(&request),
            [
                "build",
                "--file",
                "/tmp/shop/Dockerfile",
                "--tag",
                "registry.local/shop:latest",
                "--build-arg",
                "RUST_VERSION=1.85",
                "/tmp/shop",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_build_surfaces_exit_code() {
        let builder = DockerCliBuilder::with_program("false");
        let request = BuildRequest {
            context: PathBuf::from("/tmp"),
            dockerfile: "Dockerfile".into(),
            tag: ImageRef("x:latest".into()),
            args: BTreeMap::new(),
        };
        let err = builder.build(&request).await.unwrap_err();
        assert!(err.to_string().contains("docker build failed (exit code: 1)"), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn push_without_credentials_skips_login() {
        let builder = DockerCliBuilder::with_program("true");
        builder
            .push(&ImageRef("x:latest".into()), &RegistryCredentials::default())
            .await
            .unwrap();
    }
}
