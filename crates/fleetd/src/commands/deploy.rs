use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use clap::Subcommand;
use tokio::sync::watch;

use fleet_core::FleetConfig;
use fleet_deploy::{
    ComposeFile, DeploymentReport, DeploymentResult, Manifest, Pipeline, PipelineConfig,
};
use fleet_docker::{DockerCliBuilder, GitFetcher};

#[derive(Subcommand)]
pub enum DeploySource {
    /// Clone a repository, build its root Dockerfile, push, and create a service.
    Repo {
        url: String,
        /// Branch or tag (default: main).
        #[arg(long = "ref")]
        reference: Option<String>,
    },
    /// Deploy every service in a `services: [...]` manifest.
    Manifest { file: PathBuf },
    /// Deploy every service in a compose file.
    Compose { file: PathBuf },
}

pub async fn deploy(
    config: &FleetConfig,
    source: DeploySource,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(
        super::orchestrator(config)?,
        Arc::new(GitFetcher::new()),
        Arc::new(DockerCliBuilder::new()),
        PipelineConfig::from_fleet_config(config)?,
    )
    .with_shutdown(shutdown);

    let report = match source {
        DeploySource::Repo { url, reference } => {
            let result = pipeline.deploy_repo(&url, reference.as_deref()).await;
            let mut report = DeploymentReport::default();
            report.push(&url, result);
            report
        }
        DeploySource::Manifest { file } => {
            let manifest = Manifest::from_file(&file)?;
            pipeline.deploy_manifest(&manifest, base_dir(&file)).await?
        }
        DeploySource::Compose { file } => {
            let compose = ComposeFile::from_file(&file)?;
            pipeline.deploy_compose(&compose, base_dir(&file)).await?
        }
    };

    print_report(&report);
    let failed = report.failures().count();
    if failed > 0 {
        bail!("{failed} of {} deployments failed", report.results.len());
    }
    Ok(())
}

fn base_dir(file: &Path) -> &Path {
    match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn print_report(report: &DeploymentReport) {
    for (name, result) in &report.results {
        match result {
            DeploymentResult::Succeeded { warnings, .. } => {
                println!("✓ {name}: {result}");
                for warning in warnings {
                    println!("  warning: {warning}");
                }
            }
            _ => eprintln!("✗ {name}: {result}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_dir_of_bare_file_is_cwd() {
        assert_eq!(base_dir(Path::new("compose.yml")), Path::new("."));
        assert_eq!(
            base_dir(Path::new("/srv/stack/compose.yml")),
            Path::new("/srv/stack")
        );
    }
}
