//! The deployment pipeline.
//!
//! Each service goes fetch → build → push → create/update. The first
//! failing stage ends that service's run with a `DeploymentResult`
//! naming the stage. A fetched source tree is a temporary directory
//! owned by the run, so it is removed on every exit path: success,
//! failure, timeout, shutdown, or the caller dropping the future.
//!
//! Every stage is bounded by `stage_timeout` and by the deadline of the
//! whole run (`pipeline_timeout`). Multi-service runs share one deadline
//! and collect failures per service without aborting the rest.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use fleet_core::{
    BuildRequest, ConfigError, FleetConfig, ImageBuilder, ImageRef, Orchestrator,
    OrchestratorError, OrchestratorResult, RegistryCredentials, ServiceId, ServiceSpec,
    SourceFetcher, SourceTree, artifact_name,
};

use crate::compose::ComposeFile;
use crate::manifest::Manifest;
use crate::plan::{BuildContext, ImageSource, PlanDefaults, ServicePlan};
use crate::result::{DeployAction, DeploymentReport, DeploymentResult, Stage};
use crate::schema::DefinitionError;

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Registry built images are tagged into. Empty disables the push stage.
    pub registry: String,
    pub credentials: RegistryCredentials,
    pub defaults: PlanDefaults,
    /// Branch or tag fetched when the caller names none.
    pub reference: String,
    pub stage_timeout: Duration,
    pub pipeline_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            registry: String::new(),
            credentials: RegistryCredentials::default(),
            defaults: PlanDefaults::default(),
            reference: "main".to_string(),
            stage_timeout: Duration::from_secs(5 * 60),
            pipeline_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl PipelineConfig {
    pub fn from_fleet_config(config: &FleetConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            registry: config.docker.registry.clone(),
            credentials: config.docker.credentials(),
            defaults: PlanDefaults::from_config(&config.deploy)?,
            stage_timeout: config.deploy.stage_timeout()?,
            pipeline_timeout: config.deploy.pipeline_timeout()?,
            ..Default::default()
        })
    }
}

pub struct Pipeline {
    orchestrator: Arc<dyn Orchestrator>,
    fetcher: Arc<dyn SourceFetcher>,
    builder: Arc<dyn ImageBuilder>,
    config: PipelineConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Pipeline {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        fetcher: Arc<dyn SourceFetcher>,
        builder: Arc<dyn ImageBuilder>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            orchestrator,
            fetcher,
            builder,
            config,
            shutdown: None,
        }
    }

    /// Cancel in-flight stages once `shutdown` turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetch `url` at `reference`, build its root, push, and create a
    /// service named after the repository.
    pub async fn deploy_repo(&self, url: &str, reference: Option<&str>) -> DeploymentResult {
        let Some(name) = artifact_name(url) else {
            return DeploymentResult::FailedAtFetch {
                cause: format!("cannot derive an artifact name from {url:?}"),
            };
        };

        let defaults = &self.config.defaults;
        let spec = ServiceSpec {
            replicas: defaults.replicas,
            update_config: Some(defaults.policy.update.clone()),
            rollback_config: Some(defaults.policy.rollback.clone()),
            ..ServiceSpec::new(&name, "")
        };
        let plan = ServicePlan {
            source: ImageSource::Repository {
                url: url.to_string(),
                reference: reference.unwrap_or(&self.config.reference).to_string(),
            },
            spec,
        };
        self.deploy(plan).await
    }

    /// Deploy every service in a manifest, in file order.
    ///
    /// The manifest is validated as a whole first; nothing is deployed if
    /// any service definition is invalid.
    pub async fn deploy_manifest(
        &self,
        manifest: &Manifest,
        base_dir: &Path,
    ) -> Result<DeploymentReport, DefinitionError> {
        let plans = manifest.plans(base_dir, &self.config.defaults)?;
        Ok(self.deploy_many(plans).await)
    }

    /// Deploy every service in a compose file, in name order.
    pub async fn deploy_compose(
        &self,
        compose: &ComposeFile,
        base_dir: &Path,
    ) -> Result<DeploymentReport, DefinitionError> {
        let plans = compose.plans(base_dir, &self.config.defaults)?;
        Ok(self.deploy_many(plans).await)
    }

    /// Run one plan under its own pipeline deadline.
    pub async fn deploy(&self, plan: ServicePlan) -> DeploymentResult {
        let deadline = Instant::now() + self.config.pipeline_timeout;
        self.execute(plan, deadline).await
    }

    /// Run plans one after another under a shared deadline.
    pub async fn deploy_many(&self, plans: Vec<ServicePlan>) -> DeploymentReport {
        let deadline = Instant::now() + self.config.pipeline_timeout;
        let mut report = DeploymentReport::default();
        for plan in plans {
            let name = plan.name().to_string();
            let result = self.execute(plan, deadline).await;
            if !result.is_success() {
                warn!(service = %name, %result, "service deployment failed");
            }
            report.push(&name, result);
        }
        info!(
            deployed = report.succeeded().count(),
            failed = report.failures().count(),
            "deployment finished"
        );
        report
    }

    async fn execute(&self, plan: ServicePlan, deadline: Instant) -> DeploymentResult {
        match self.run_stages(plan, deadline).await {
            Ok(result) | Err(result) => result,
        }
    }

    async fn run_stages(
        &self,
        plan: ServicePlan,
        deadline: Instant,
    ) -> Result<DeploymentResult, DeploymentResult> {
        let ServicePlan { source, mut spec } = plan;
        let name = spec.name.clone();

        let (image, create_only) = match source {
            ImageSource::Registry(image) => (ImageRef(image), false),
            ImageSource::Context(context) => {
                let tag = self.tag_for(&context, &name);
                let image = self
                    .build(&name, context.path.as_path(), &context, tag, deadline)
                    .await?;
                self.push(&name, &image, deadline).await?;
                (image, false)
            }
            ImageSource::Repository { url, reference } => {
                info!(service = %name, %url, %reference, "fetching source");
                let tree: SourceTree = self
                    .run_stage(Stage::Fetch, deadline, self.fetcher.fetch(&url, &reference))
                    .await?;
                let context = BuildContext {
                    path: tree.path().to_path_buf(),
                    dockerfile: "Dockerfile".to_string(),
                    args: Default::default(),
                    tag: None,
                };
                let tag = ImageRef::latest(&self.config.registry, tree.name());
                let image = self.build(&name, tree.path(), &context, tag, deadline).await?;
                drop(tree);
                debug!(service = %name, "removed source tree");
                self.push(&name, &image, deadline).await?;
                (image, true)
            }
        };

        spec.image = image.0.clone();
        info!(service = %name, %image, "deploying service");
        let (service_id, action, warnings) = self
            .run_stage(Stage::Deploy, deadline, self.create_or_update(&spec, create_only))
            .await?;
        for warning in &warnings {
            warn!(service = %name, %warning, "orchestrator warning");
        }
        info!(service = %name, %service_id, ?action, "service deployed");

        Ok(DeploymentResult::Succeeded {
            service_id,
            image,
            action,
            warnings,
        })
    }

    fn tag_for(&self, context: &BuildContext, name: &str) -> ImageRef {
        match &context.tag {
            Some(tag) => ImageRef(tag.clone()),
            None => ImageRef::latest(&self.config.registry, name),
        }
    }

    async fn build(
        &self,
        name: &str,
        path: &Path,
        context: &BuildContext,
        tag: ImageRef,
        deadline: Instant,
    ) -> Result<ImageRef, DeploymentResult> {
        let request = BuildRequest {
            context: path.to_path_buf(),
            dockerfile: context.dockerfile.clone(),
            tag,
            args: context.args.clone(),
        };
        info!(service = %name, tag = %request.tag, "building image");
        self.run_stage(Stage::Build, deadline, self.builder.build(&request))
            .await
    }

    async fn push(
        &self,
        name: &str,
        image: &ImageRef,
        deadline: Instant,
    ) -> Result<(), DeploymentResult> {
        if self.config.registry.is_empty() {
            debug!(service = %name, %image, "no registry configured, skipping push");
            return Ok(());
        }
        info!(service = %name, %image, "pushing image");
        self.run_stage(
            Stage::Push,
            deadline,
            self.builder.push(image, &self.config.credentials),
        )
        .await
    }

    /// Update the service named in `spec` at its current version, or
    /// create it if it does not exist.
    async fn create_or_update(
        &self,
        spec: &ServiceSpec,
        create_only: bool,
    ) -> OrchestratorResult<(ServiceId, DeployAction, Vec<String>)> {
        if !create_only {
            match self.orchestrator.inspect_service(&spec.name).await {
                Ok(current) => {
                    debug!(service = %spec.name, version = %current.version, "updating existing service");
                    let warnings = self
                        .orchestrator
                        .update_service(&current.id, current.version, spec)
                        .await?;
                    return Ok((current.id, DeployAction::Updated, warnings));
                }
                Err(OrchestratorError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let id = self.orchestrator.create_service(spec).await?;
        Ok((id, DeployAction::Created, Vec::new()))
    }

    /// Run one stage under the stage and pipeline deadlines, stopping
    /// early on shutdown.
    async fn run_stage<T, E, F>(
        &self,
        stage: Stage,
        deadline: Instant,
        work: F,
    ) -> Result<T, DeploymentResult>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let now = Instant::now();
        if now >= deadline {
            return Err(DeploymentResult::failed(
                stage,
                format!("pipeline deadline exceeded before {stage}"),
            ));
        }
        let stage_deadline = deadline.min(now + self.config.stage_timeout);
        let limit = if stage_deadline == deadline {
            "pipeline deadline".to_string()
        } else {
            format!("{:?}", self.config.stage_timeout)
        };

        tokio::select! {
            outcome = tokio::time::timeout_at(stage_deadline, work) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    let cause: anyhow::Error = e.into();
                    Err(DeploymentResult::failed(stage, format!("{cause:#}")))
                }
                Err(_) => Err(DeploymentResult::failed(
                    stage,
                    format!("{stage} timed out ({limit})"),
                )),
            },
            _ = shutdown_requested(self.shutdown.clone()) => {
                Err(DeploymentResult::failed(stage, "cancelled".to_string()))
            }
        }
    }
}

/// Resolves once shutdown is signalled. Never resolves without a
/// receiver or after the sender is gone.
async fn shutdown_requested(shutdown: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = shutdown else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_fleet_config() {
        let config = FleetConfig::from_toml_str(
            r#"
[docker]
registry = "registry.local"
username = "ci"
password = "hunter2"

[deploy]
replicas = 2
stage_timeout = "90s"
pipeline_timeout = "20m"
"#,
        )
        .unwrap();
        let pipeline = PipelineConfig::from_fleet_config(&config).unwrap();
        assert_eq!(pipeline.registry, "registry.local");
        assert_eq!(pipeline.credentials.username, "ci");
        assert_eq!(pipeline.defaults.replicas, 2);
        assert_eq!(pipeline.stage_timeout, Duration::from_secs(90));
        assert_eq!(pipeline.pipeline_timeout, Duration::from_secs(20 * 60));
        assert_eq!(pipeline.reference, "main");
    }

    #[test]
    fn bad_timeout_rejected() {
        let mut config = FleetConfig::default();
        config.deploy.stage_timeout = "soon".into();
        assert!(PipelineConfig::from_fleet_config(&config).is_err());
    }

    #[tokio::test]
    async fn shutdown_without_receiver_never_fires() {
        let fired = tokio::time::timeout(Duration::from_millis(10), shutdown_requested(None)).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn shutdown_already_signalled() {
        let (_tx, rx) = watch::channel(true);
        shutdown_requested(Some(rx)).await;
    }
}
