use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};
use crate::models::{
    ActionResult, CleanupReport, CleanupScope, ContainerSummary, DeployOutcome, Deployment,
    DeploymentListing, LogsOutcome, StatusReport,
};

use super::cleanup::CleanupEngine;
use super::orchestrator::Orchestrator;

/// Outward-facing deployment API. Every call returns an [`ActionResult`]
/// instead of an error so callers can render or serialise it directly.
pub struct Deployer {
    orchestrator: Arc<Orchestrator>,
    cleanup: CleanupEngine,
}

impl Deployer {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let cleanup = CleanupEngine::new(orchestrator.clone());
        Self {
            orchestrator,
            cleanup,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Materialize, build and start the project. Fails fast with
    /// `EngineUnavailable` when no engine answers. After a successful
    /// deploy, stopped deployments beyond the retention limit are pruned.
    pub async fn deploy(
        &self,
        project_id: i64,
        cancel: &CancellationToken,
    ) -> ActionResult<DeployOutcome> {
        let result = async {
            self.orchestrator.engine().ping().await?;
            self.orchestrator.deploy(project_id, cancel).await
        }
        .await;

        match result {
            Ok(deployment) => {
                let keep = self.orchestrator.config().retention.keep_stopped;
                let pruned = self.cleanup.prune_stopped(project_id, keep).await;
                if pruned > 0 {
                    tracing::info!(project_id, pruned, "pruned old deployments");
                }
                let message = match &deployment.url {
                    Some(url) => format!("deployment {} running at {url}", deployment.id),
                    None => format!("deployment {} running", deployment.id),
                };
                ActionResult::ok(outcome(&deployment), message)
            }
            Err(e) => ActionResult::failed(&e),
        }
    }

    /// Start the project from its existing image, building only if the
    /// image is missing.
    pub async fn start(
        &self,
        project_id: i64,
        cancel: &CancellationToken,
    ) -> ActionResult<DeployOutcome> {
        let result = async {
            self.orchestrator.engine().ping().await?;
            self.orchestrator.start(project_id, cancel).await
        }
        .await;
        ActionResult::from_result(
            result.map(|d| outcome(&d)),
            format!("project {project_id} started"),
        )
    }

    /// Materialize and build the project's image. Returns the image tag.
    pub async fn build(&self, project_id: i64, cancel: &CancellationToken) -> ActionResult<String> {
        let result = async {
            self.orchestrator.engine().ping().await?;
            self.orchestrator.build(project_id, cancel).await
        }
        .await;
        ActionResult::from_result(result, format!("project {project_id} built"))
    }

    pub async fn get_status(&self, deployment_id: i64) -> ActionResult<StatusReport> {
        ActionResult::from_result(
            self.orchestrator.status(deployment_id).await,
            format!("status of deployment {deployment_id}"),
        )
    }

    pub async fn get_logs(&self, deployment_id: i64, tail: usize) -> ActionResult<LogsOutcome> {
        let result = self
            .orchestrator
            .logs(deployment_id, tail)
            .await
            .map(|logs| LogsOutcome {
                deployment_id,
                logs,
            });
        ActionResult::from_result(result, format!("logs of deployment {deployment_id}"))
    }

    pub async fn stop(&self, deployment_id: i64) -> ActionResult<DeployOutcome> {
        let result = self.orchestrator.stop(deployment_id).await;
        ActionResult::from_result(
            result.map(|d| outcome(&d)),
            format!("deployment {deployment_id} stopped"),
        )
    }

    pub async fn restart(
        &self,
        deployment_id: i64,
        cancel: &CancellationToken,
    ) -> ActionResult<DeployOutcome> {
        let result = self.orchestrator.restart(deployment_id, cancel).await;
        ActionResult::from_result(
            result.map(|d| outcome(&d)),
            format!("deployment {deployment_id} restarted"),
        )
    }

    /// Every deployment record, newest last.
    pub async fn list_all(&self) -> ActionResult<Vec<DeploymentListing>> {
        let config = self.orchestrator.config();
        let listings: Vec<DeploymentListing> = self
            .orchestrator
            .store()
            .list_deployments()
            .await
            .into_iter()
            .map(|d| DeploymentListing {
                id: d.id,
                project_id: d.project_id,
                name: config.container_name(d.project_id, d.id),
                status: d.status,
                url: d.url,
            })
            .collect();
        let message = format!("{} deployment(s)", listings.len());
        ActionResult::ok(listings, message)
    }

    pub async fn list_running(&self) -> ActionResult<Vec<ContainerSummary>> {
        let result = self.orchestrator.list_running().await;
        let message = match &result {
            Ok(running) => format!("{} running container(s)", running.len()),
            Err(_) => String::new(),
        };
        ActionResult::from_result(result, message)
    }

    /// Run a cleanup. A run with collected errors is reported as a partial
    /// failure that still carries the report.
    pub async fn cleanup(&self, scope: CleanupScope, dry_run: bool) -> ActionResult<CleanupReport> {
        match self.cleanup.run(scope, dry_run).await {
            Ok(report) if report.is_clean() => {
                let verb = if dry_run { "would remove" } else { "removed" };
                let message = format!(
                    "{verb} {} container(s), {} image(s), {} file(s), {} record(s)",
                    report.removed_containers,
                    report.removed_images,
                    report.removed_files,
                    report.removed_records
                );
                ActionResult::ok(report, message)
            }
            Ok(report) => {
                let error = OrchestratorError::PartialFailure(report.errors.clone());
                ActionResult::failed_with(&error, report)
            }
            Err(e) => ActionResult::failed(&e),
        }
    }

    /// Repair drifted records. Returns the number repaired.
    pub async fn reconcile(&self) -> Result<usize> {
        self.orchestrator.reconcile().await
    }
}

fn outcome(deployment: &Deployment) -> DeployOutcome {
    DeployOutcome {
        deployment_id: deployment.id,
        status: deployment.status,
        port: deployment.host_port,
        url: deployment.url.clone(),
    }
}
