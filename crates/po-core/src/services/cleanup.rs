use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{OrchestratorError, Result};
use crate::models::{CleanupReport, CleanupScope, ContainerSummary, Deployment, DeploymentStatus};

use super::engine::owner_filter;
use super::materializer::count_files;
use super::orchestrator::Orchestrator;

/// Reclaims containers, images, materialized files and records.
///
/// Every run first computes a plan; a dry run reports the plan's
/// counts, a real run executes it step by step and collects failures instead
/// of aborting.
pub struct CleanupEngine {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Default)]
struct CleanupPlan {
    /// Containers believed to be running. Stopped before removal.
    stop: Vec<String>,
    containers: Vec<String>,
    images: Vec<String>,
    /// Directories to delete with the number of files inside.
    dirs: Vec<(PathBuf, usize)>,
    deployment_ids: Vec<i64>,
    records: usize,
    reset_tables: bool,
    /// Failures hit while planning, e.g. an unreachable engine.
    errors: Vec<String>,
}

impl CleanupPlan {
    fn add_container(&mut self, id: &str, running: bool) {
        if self.containers.iter().any(|c| c == id) {
            return;
        }
        if running {
            self.stop.push(id.to_string());
        }
        self.containers.push(id.to_string());
    }

    fn report(&self, dry_run: bool) -> CleanupReport {
        CleanupReport {
            dry_run,
            removed_containers: self.containers.len(),
            removed_images: self.images.len(),
            removed_files: self.dirs.iter().map(|(_, files)| files).sum(),
            removed_records: self.records,
            errors: self.errors.clone(),
        }
    }
}

impl CleanupEngine {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn run(&self, scope: CleanupScope, dry_run: bool) -> Result<CleanupReport> {
        let report = match scope {
            CleanupScope::Deployment { deployment_id } => {
                let store = self.orchestrator.store();
                let Some(deployment) = store.get_deployment(deployment_id).await else {
                    tracing::debug!(deployment_id, "nothing to clean up");
                    return Ok(CleanupReport {
                        dry_run,
                        ..Default::default()
                    });
                };
                let _guard = self.orchestrator.lock_project(deployment.project_id).await?;
                let targets: Vec<Deployment> = store
                    .get_deployment(deployment_id)
                    .await
                    .into_iter()
                    .collect();
                let plan = self
                    .plan_deployments(deployment.project_id, targets, false)
                    .await;
                self.finish(plan, dry_run).await
            }
            CleanupScope::Project { project_id } => {
                let _guard = self.orchestrator.lock_project(project_id).await?;
                let targets = self
                    .orchestrator
                    .store()
                    .deployments_for_project(project_id)
                    .await;
                let plan = self.plan_deployments(project_id, targets, true).await;
                self.finish(plan, dry_run).await
            }
            CleanupScope::FullReset { confirm } => {
                if !confirm && !dry_run {
                    return Err(OrchestratorError::InvalidRequest(
                        "full reset requires confirmation".to_string(),
                    ));
                }
                let plan = self.plan_full_reset().await;
                self.finish(plan, dry_run).await
            }
        };

        tracing::info!(
            ?scope,
            dry_run,
            containers = report.removed_containers,
            images = report.removed_images,
            files = report.removed_files,
            records = report.removed_records,
            errors = report.errors.len(),
            "cleanup finished"
        );
        Ok(report)
    }

    /// Prune stopped deployments of a project beyond the newest
    /// `keep_stopped`. Failures are logged, never surfaced.
    pub async fn prune_stopped(&self, project_id: i64, keep_stopped: usize) -> usize {
        let stopped: Vec<i64> = self
            .orchestrator
            .store()
            .deployments_for_project(project_id)
            .await
            .into_iter()
            .filter(|d| d.status == DeploymentStatus::Stopped)
            .map(|d| d.id)
            .collect();
        let excess = stopped.len().saturating_sub(keep_stopped);

        let mut pruned = 0;
        for deployment_id in stopped.into_iter().take(excess) {
            match self
                .run(CleanupScope::Deployment { deployment_id }, false)
                .await
            {
                Ok(report) if report.is_clean() => pruned += 1,
                Ok(report) => {
                    tracing::warn!(deployment_id, errors = ?report.errors, "pruning incomplete");
                }
                Err(e) => tracing::warn!(deployment_id, error = %e, "pruning failed"),
            }
        }
        pruned
    }

    async fn finish(&self, plan: CleanupPlan, dry_run: bool) -> CleanupReport {
        if dry_run {
            plan.report(true)
        } else {
            self.execute(plan).await
        }
    }

    /// Plan removal of `targets`. The project's image and directory go only
    /// when no other deployment of the project remains. With
    /// `whole_project`, stray labelled containers of the project are swept
    /// too.
    async fn plan_deployments(
        &self,
        project_id: i64,
        targets: Vec<Deployment>,
        whole_project: bool,
    ) -> CleanupPlan {
        let store = self.orchestrator.store();
        let config = self.orchestrator.config();
        let mut plan = CleanupPlan::default();

        let target_ids: HashSet<i64> = targets.iter().map(|d| d.id).collect();
        let live = match self.orchestrator.live_view().list_owned().await {
            Ok(live) => live,
            Err(e) => {
                plan.errors.push(format!("listing containers: {e}"));
                Vec::new()
            }
        };
        let is_live_running = |id: &str| {
            live.iter()
                .any(|c: &ContainerSummary| c.id == id && c.is_running())
        };

        for deployment in &targets {
            if let Some(container_id) = deployment.container_id.as_deref() {
                let running = deployment.status.is_active() || is_live_running(container_id);
                plan.add_container(container_id, running);
            }
        }
        for container in &live {
            let owned = match container.deployment_id() {
                Some(id) => target_ids.contains(&id),
                None => false,
            };
            let stray = whole_project && container.project_id() == Some(project_id);
            if owned || stray {
                plan.add_container(&container.id, container.is_running());
            }
        }

        let remaining = store
            .deployments_for_project(project_id)
            .await
            .into_iter()
            .filter(|d| !target_ids.contains(&d.id))
            .count();
        if remaining == 0 {
            let tag = config.image_tag(project_id);
            match self.orchestrator.engine().image_exists(&tag).await {
                Ok(true) => plan.images.push(tag),
                Ok(false) => {}
                Err(e) => plan.errors.push(format!("image {tag}: {e}")),
            }
            let dir = self.orchestrator.materializer().project_dir(project_id);
            self.plan_dir(&mut plan, dir).await;
        }

        plan.deployment_ids = target_ids.into_iter().collect();
        plan.deployment_ids.sort_unstable();
        plan.records = store.rows_for_deployments(&plan.deployment_ids).await;
        plan
    }

    /// Everything carrying the ownership label, the whole materialized root
    /// and every table.
    async fn plan_full_reset(&self) -> CleanupPlan {
        let engine = self.orchestrator.engine();
        let filter = owner_filter(&self.orchestrator.config().owner_label);
        let mut plan = CleanupPlan {
            reset_tables: true,
            ..Default::default()
        };

        match engine.list_containers(&filter).await {
            Ok(containers) => {
                for container in containers {
                    plan.add_container(&container.id, container.is_running());
                }
            }
            Err(e) => plan.errors.push(format!("listing containers: {e}")),
        }
        match engine.list_images(&filter).await {
            Ok(images) => plan.images = images,
            Err(e) => plan.errors.push(format!("listing images: {e}")),
        }

        let root = self.orchestrator.materializer().root().to_path_buf();
        self.plan_dir(&mut plan, root).await;
        plan.records = self.orchestrator.store().row_count().await;
        plan
    }

    async fn plan_dir(&self, plan: &mut CleanupPlan, dir: PathBuf) {
        if !dir.exists() {
            return;
        }
        match count_files(&dir).await {
            Ok(files) => plan.dirs.push((dir, files)),
            Err(e) => plan.errors.push(format!("{}: {e}", dir.display())),
        }
    }

    /// Carry out every step independently. Engine "not found" counts as
    /// removed.
    async fn execute(&self, plan: CleanupPlan) -> CleanupReport {
        let engine = self.orchestrator.engine();
        let grace = self.orchestrator.config().timeouts.stop_grace();
        let mut report = CleanupReport {
            errors: plan.errors,
            ..Default::default()
        };

        for id in &plan.stop {
            if let Err(e) = engine.stop_container(id, grace).await {
                if !e.is_not_found() {
                    tracing::debug!(container = %id, error = %e, "stop before removal failed");
                }
            }
        }
        for id in &plan.containers {
            match engine.remove_container(id, true).await {
                Ok(()) => report.removed_containers += 1,
                Err(e) if e.is_not_found() => report.removed_containers += 1,
                Err(e) => report.errors.push(format!("container {id}: {e}")),
            }
        }
        for image in &plan.images {
            match engine.remove_image(image, true).await {
                Ok(()) => report.removed_images += 1,
                Err(e) if e.is_not_found() => report.removed_images += 1,
                Err(e) => report.errors.push(format!("image {image}: {e}")),
            }
        }
        for (dir, files) in &plan.dirs {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => report.removed_files += files,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => report.removed_files += files,
                Err(e) => report.errors.push(format!("{}: {e}", dir.display())),
            }
        }

        let store = self.orchestrator.store();
        let records = if plan.reset_tables {
            store.reset_all().await
        } else {
            store.delete_deployments(&plan.deployment_ids).await
        };
        match records {
            Ok(removed) => report.removed_records = removed,
            Err(e) => report.errors.push(format!("records: {e}")),
        }
        report
    }
}
