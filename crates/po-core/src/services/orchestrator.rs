use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};
use crate::models::engine::{LABEL_DEPLOYMENT, LABEL_OWNER, LABEL_PROJECT};
use crate::models::{
    BuildSpec, ContainerSummary, Deployment, DeploymentStatus, Health, OrchestratorConfig,
    Project, RunSpec, StatusReport,
};

use super::engine::{owner_filter, ContainerEngine, EngineLiveView, LiveInstanceView};
use super::file_lock::FileLock;
use super::health::{assemble_stats, derive_health, probe_tcp};
use super::logs::{cap_to_last_bytes, tail_lines};
use super::materializer::{has_required_files, Materializer};
use super::ports::{PortAllocator, PortProbe, TcpPortProbe};
use super::project_source::ProjectSource;
use super::stack_registry::{resolve_stack, StackDescriptor};
use super::state::StateStore;

/// Drives deployments through `starting → running → stopped`, with `error`
/// reachable from any state.
///
/// Builds, starts, stops and restarts of the same project are serialised by
/// a per-project lock, also across processes sharing the workspace.
/// Different projects proceed concurrently. Status, log and listing queries
/// take no locks and never write the store.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    store: Arc<StateStore>,
    projects: Arc<dyn ProjectSource>,
    engine: Arc<dyn ContainerEngine>,
    live_view: Arc<dyn LiveInstanceView>,
    materializer: Materializer,
    port_allocator: PortAllocator,
    project_locks: std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one project's lifecycle. The lock file is released
/// before the in-process lock.
pub struct ProjectGuard {
    _file: FileLock,
    _local: OwnedMutexGuard<()>,
}

impl Orchestrator {
    /// Wire an orchestrator with the engine-backed live view and the TCP
    /// port probe.
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<StateStore>,
        projects: Arc<dyn ProjectSource>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        let live_view: Arc<dyn LiveInstanceView> = Arc::new(EngineLiveView::new(
            engine.clone(),
            owner_filter(&config.owner_label),
        ));
        Self::with_parts(config, store, projects, engine, live_view, Arc::new(TcpPortProbe))
    }

    pub fn with_parts(
        config: OrchestratorConfig,
        store: Arc<StateStore>,
        projects: Arc<dyn ProjectSource>,
        engine: Arc<dyn ContainerEngine>,
        live_view: Arc<dyn LiveInstanceView>,
        probe: Arc<dyn PortProbe>,
    ) -> Self {
        let materializer = Materializer::new(config.projects_dir());
        let port_allocator =
            PortAllocator::new(config.port_range, store.clone(), live_view.clone(), probe);
        Self {
            config: Arc::new(config),
            store,
            projects,
            engine,
            live_view,
            materializer,
            port_allocator,
            project_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn live_view(&self) -> &Arc<dyn LiveInstanceView> {
        &self.live_view
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    pub fn port_allocator(&self) -> &PortAllocator {
        &self.port_allocator
    }

    /// Exclusive access to a project's lifecycle.
    pub async fn lock_project(&self, project_id: i64) -> Result<ProjectGuard> {
        let lock = {
            let mut locks = self
                .project_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            locks.entry(project_id).or_default().clone()
        };
        let local = lock.lock_owned().await;
        let file = FileLock::exclusive(self.config.project_lock_file(project_id)).await?;
        Ok(ProjectGuard {
            _file: file,
            _local: local,
        })
    }

    /// Rewrite the project's build directory and build its image from it.
    /// On failure the project's latest deployment moves to `error`, unless it
    /// is still serving the previous image.
    pub async fn build(&self, project_id: i64, cancel: &CancellationToken) -> Result<String> {
        let project = self.projects.get_project(project_id).await?;
        let stack = resolve_stack(&project.stack_label);
        let _guard = self.lock_project(project_id).await?;
        let built = async {
            self.materializer
                .materialize(project.id, &project.name, &project.files, stack)
                .await?;
            self.build_image(project_id, stack, cancel).await
        }
        .await;
        match built {
            Ok(_) => Ok(self.config.image_tag(project_id)),
            Err(e) => {
                let latest = self.store.deployments_for_project(project_id).await.pop();
                if let Some(latest) = latest.filter(|d| d.status != DeploymentStatus::Running) {
                    let message = failure_message(&e);
                    self.store
                        .update_deployment(latest.id, |d| d.mark_error(message))
                        .await?;
                }
                Err(e)
            }
        }
    }

    /// Materialize, build and start a fresh deployment of the project.
    pub async fn deploy(&self, project_id: i64, cancel: &CancellationToken) -> Result<Deployment> {
        self.start_inner(project_id, true, cancel).await
    }

    /// Start a new deployment of the project, building only if the image is
    /// missing. Any running deployment of the project is stopped first.
    pub async fn start(&self, project_id: i64, cancel: &CancellationToken) -> Result<Deployment> {
        self.start_inner(project_id, false, cancel).await
    }

    async fn start_inner(
        &self,
        project_id: i64,
        fresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Deployment> {
        let project = self.projects.get_project(project_id).await?;
        let stack = resolve_stack(&project.stack_label);
        let _guard = self.lock_project(project_id).await?;

        let tag = self.config.image_tag(project_id);
        let deployment = self
            .store
            .create_deployment(project_id, stack.container_port, &tag)
            .await?;
        tracing::info!(
            project_id,
            deployment_id = deployment.id,
            stack = %stack.kind,
            "starting deployment"
        );

        let result = self.prepare_and_launch(&project, &deployment, stack, fresh, cancel).await;
        match result {
            Ok(running) => {
                tracing::info!(
                    deployment_id = running.id,
                    port = ?running.host_port,
                    "deployment running"
                );
                Ok(running)
            }
            Err(e) => {
                tracing::warn!(deployment_id = deployment.id, error = %e, "deployment failed");
                self.persist_failure(deployment.id, &e).await?;
                Err(e)
            }
        }
    }

    async fn prepare_and_launch(
        &self,
        project: &Project,
        deployment: &Deployment,
        stack: &'static StackDescriptor,
        fresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Deployment> {
        if fresh {
            self.materializer
                .materialize(project.id, &project.name, &project.files, stack)
                .await?;
        }
        let tag = self.config.image_tag(project.id);
        let built_at = if fresh || !self.engine.image_exists(&tag).await? {
            if !has_required_files(&self.materializer.project_dir(project.id), stack) {
                self.materializer
                    .materialize(project.id, &project.name, &project.files, stack)
                    .await?;
            }
            Some(self.build_image(project.id, stack, cancel).await?)
        } else {
            None
        };

        let previous: Vec<Deployment> = self
            .store
            .deployments_for_project(project.id)
            .await
            .into_iter()
            .filter(|d| d.id != deployment.id)
            .collect();
        for other in previous.iter().filter(|d| d.status.is_active()) {
            tracing::info!(
                deployment_id = other.id,
                replaced_by = deployment.id,
                "stopping previous deployment"
            );
            self.stop_locked(other.clone()).await?;
        }
        self.stop_project_containers(project.id, deployment.id).await?;

        let built_at = built_at.or_else(|| previous.iter().filter_map(|d| d.last_built_at).max());
        self.launch(deployment, stack, built_at, cancel).await
    }

    async fn build_image(
        &self,
        project_id: i64,
        stack: &StackDescriptor,
        cancel: &CancellationToken,
    ) -> Result<DateTime<Utc>> {
        let dir = self.materializer.project_dir(project_id);
        if !has_required_files(&dir, stack) {
            return Err(OrchestratorError::MaterializationFailed(format!(
                "{} is missing required files for {}",
                dir.display(),
                stack.kind
            )));
        }
        let spec = BuildSpec {
            context_dir: dir,
            tag: self.config.image_tag(project_id),
            labels: self.labels(project_id, None),
        };
        tracing::info!(project_id, tag = %spec.tag, "building image");
        let output = self.engine.build_image(&spec, cancel).await?;
        tracing::debug!(project_id, lines = output.lines().count(), "image built");
        Ok(Utc::now())
    }

    /// Allocate a port and run a new container for `deployment`, persisting
    /// `running` only once the engine has accepted it.
    async fn launch(
        &self,
        deployment: &Deployment,
        stack: &StackDescriptor,
        built_at: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<Deployment> {
        let port = self.port_allocator.allocate_default().await?;
        let mut spec = RunSpec {
            name: self
                .config
                .container_name(deployment.project_id, deployment.id),
            image: self.config.image_tag(deployment.project_id),
            host_port: port,
            container_port: stack.container_port,
            labels: self.labels(deployment.project_id, Some(deployment.id)),
            env: BTreeMap::from([
                ("PORT".to_string(), stack.container_port.to_string()),
                ("PROJECT_ID".to_string(), deployment.project_id.to_string()),
            ]),
        };
        let result = self.launch_spec(deployment, &mut spec, built_at, cancel).await;
        self.port_allocator.release(spec.host_port).await;
        result
    }

    async fn launch_spec(
        &self,
        deployment: &Deployment,
        spec: &mut RunSpec,
        built_at: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<Deployment> {
        let container_id = self.run_with_retry(deployment.id, spec, cancel).await?;

        let port = spec.host_port;
        let url = self.config.external_url(deployment.project_id, port);
        let persisted = self
            .store
            .update_deployment(deployment.id, |d| {
                d.container_id = Some(container_id.clone());
                d.host_port = Some(port);
                d.url = Some(url);
                d.status = DeploymentStatus::Running;
                d.last_error = None;
                d.last_built_at = built_at.or(d.last_built_at).or_else(|| Some(Utc::now()));
            })
            .await;
        if persisted.is_err() {
            // A container the store does not know about would leak.
            self.discard_container(&container_id).await;
        }
        persisted
    }

    /// Run the container, retrying per the configured policy and removing any
    /// half-created container between attempts. When the host port turned
    /// out to be taken, the retry moves to another port and `spec` carries
    /// the port finally used.
    async fn run_with_retry(
        &self,
        deployment_id: i64,
        spec: &mut RunSpec,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let policy = self.config.start_retry;
        let mut conflicted: HashSet<u16> = HashSet::new();
        let mut last_error = String::new();
        for attempt in 0..=policy.attempts {
            if attempt > 0 {
                tracing::warn!(
                    container = %spec.name,
                    attempt,
                    error = %last_error,
                    "container launch failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                    _ = tokio::time::sleep(policy.backoff()) => {}
                }
            }
            match self.engine.run_container(spec, cancel).await {
                Ok(id) => return Ok(id),
                Err(e @ (OrchestratorError::Cancelled | OrchestratorError::EngineUnavailable(_))) => {
                    self.discard_leftover(&spec.name, deployment_id).await;
                    return Err(e);
                }
                Err(e) => {
                    let port_taken = e.is_port_conflict();
                    last_error = match e {
                        OrchestratorError::StartFailed(message) => message,
                        other => other.to_string(),
                    };
                    self.discard_leftover(&spec.name, deployment_id).await;
                    if port_taken && attempt < policy.attempts {
                        conflicted.insert(spec.host_port);
                        let next = self.port_allocator.allocate_avoiding(&conflicted).await?;
                        self.port_allocator.release(spec.host_port).await;
                        tracing::info!(from = spec.host_port, to = next, "host port taken, moving");
                        spec.host_port = next;
                    }
                }
            }
        }
        Err(OrchestratorError::StartFailed(format!(
            "{} attempt(s) failed, last error: {last_error}",
            policy.attempts + 1
        )))
    }

    /// Remove what a failed `run` left behind under `name`. A container of
    /// that name belonging to another deployment is never touched.
    async fn discard_leftover(&self, name: &str, deployment_id: i64) {
        let owned = match self.live_view.list_owned().await {
            Ok(owned) => owned,
            Err(e) => {
                tracing::warn!(container = name, error = %e, "cannot look up failed container");
                return;
            }
        };
        for leftover in owned
            .iter()
            .filter(|c| c.name == name && c.deployment_id() == Some(deployment_id))
        {
            self.discard_container(&leftover.id).await;
        }
    }

    /// Force-remove a container, ignoring "not found".
    async fn discard_container(&self, id_or_name: &str) {
        match self.engine.remove_container(id_or_name, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!(container = id_or_name, error = %e, "failed to remove container"),
        }
    }

    /// Stop a deployment's container. The container is kept so `restart`
    /// can reuse it.
    pub async fn stop(&self, deployment_id: i64) -> Result<Deployment> {
        let deployment = self.store.require_deployment(deployment_id).await?;
        let _guard = self.lock_project(deployment.project_id).await?;
        let deployment = self.store.require_deployment(deployment_id).await?;
        self.stop_locked(deployment).await
    }

    /// Halt every running container of the project except `keep`'s,
    /// whatever its record claims, and mark the matching records `stopped`.
    /// Catches containers left running by a stop that failed half-way.
    async fn stop_project_containers(&self, project_id: i64, keep: i64) -> Result<()> {
        let strays: Vec<ContainerSummary> = self
            .live_view
            .list_owned()
            .await?
            .into_iter()
            .filter(|c| {
                c.is_running()
                    && c.project_id() == Some(project_id)
                    && c.deployment_id() != Some(keep)
            })
            .collect();
        for container in strays {
            tracing::warn!(
                project_id,
                container = %container.name,
                "stopping container left running"
            );
            self.halt_container(&container.id).await?;
            let Some(record) = container.deployment_id() else {
                continue;
            };
            if let Some(d) = self.store.get_deployment(record).await {
                if d.status != DeploymentStatus::Stopped {
                    self.store
                        .update_deployment(d.id, |d| d.status = DeploymentStatus::Stopped)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn stop_locked(&self, deployment: Deployment) -> Result<Deployment> {
        if deployment.status == DeploymentStatus::Stopped {
            return Ok(deployment);
        }
        if let Some(container_id) = deployment.container_id.as_deref() {
            if let Err(e) = self.halt_container(container_id).await {
                self.persist_failure(deployment.id, &e).await?;
                return Err(e);
            }
        }
        tracing::info!(deployment_id = deployment.id, "deployment stopped");
        self.store
            .update_deployment(deployment.id, |d| d.status = DeploymentStatus::Stopped)
            .await
    }

    /// Graceful stop bounded by the configured grace period, then a forced
    /// kill if the container is still alive.
    async fn halt_container(&self, container_id: &str) -> Result<()> {
        match self
            .engine
            .stop_container(container_id, self.config.timeouts.stop_grace())
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e @ OrchestratorError::EngineUnavailable(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(container = container_id, error = %e, "graceful stop failed");
            }
        }

        match self.engine.inspect_container(container_id).await {
            Ok(inspect) if !inspect.running => return Ok(()),
            Err(e) if e.is_not_found() => return Ok(()),
            _ => {}
        }
        tracing::warn!(container = container_id, "container still alive, killing");
        match self.engine.kill_container(container_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stop and start the deployment again: on the same container and port
    /// when the port is still free, otherwise in a fresh container on a newly
    /// allocated port.
    pub async fn restart(
        &self,
        deployment_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Deployment> {
        let deployment = self.store.require_deployment(deployment_id).await?;
        let project = self.projects.get_project(deployment.project_id).await?;
        let stack = resolve_stack(&project.stack_label);
        let _guard = self.lock_project(deployment.project_id).await?;

        let others = self.store.deployments_for_project(project.id).await;
        for other in others
            .into_iter()
            .filter(|d| d.id != deployment_id && d.status.is_active())
        {
            self.stop_locked(other).await?;
        }
        self.stop_project_containers(project.id, deployment_id).await?;

        let deployment = self.store.require_deployment(deployment_id).await?;
        let stopped = self.stop_locked(deployment).await?;
        // The port is released until the relaunch claims it again.
        self.store
            .update_deployment(deployment_id, |d| {
                d.status = DeploymentStatus::Starting;
                d.last_error = None;
                d.host_port = None;
            })
            .await?;

        match self.relaunch(&project, &stopped, stack, cancel).await {
            Ok(running) => Ok(running),
            Err(e) => {
                self.persist_failure(deployment_id, &e).await?;
                Err(e)
            }
        }
    }

    async fn relaunch(
        &self,
        project: &Project,
        deployment: &Deployment,
        stack: &'static StackDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Deployment> {
        if let (Some(container_id), Some(port)) =
            (deployment.container_id.as_deref(), deployment.host_port)
        {
            if self.port_allocator.try_reserve(port).await? {
                let started = self.engine.start_container(container_id).await;
                let outcome = match started {
                    Ok(()) => {
                        let url = self.config.external_url(deployment.project_id, port);
                        Some(
                            self.store
                                .update_deployment(deployment.id, |d| {
                                    d.status = DeploymentStatus::Running;
                                    d.host_port = Some(port);
                                    d.url = Some(url);
                                })
                                .await,
                        )
                    }
                    Err(e @ OrchestratorError::EngineUnavailable(_)) => Some(Err(e)),
                    Err(e) => {
                        tracing::warn!(
                            deployment_id = deployment.id,
                            error = %e,
                            "could not reuse container, launching a new one"
                        );
                        None
                    }
                };
                self.port_allocator.release(port).await;
                if let Some(outcome) = outcome {
                    return outcome;
                }
            } else {
                tracing::info!(deployment_id = deployment.id, port, "previous port taken");
            }
            self.discard_container(container_id).await;
        }

        let tag = self.config.image_tag(project.id);
        let built_at = if self.engine.image_exists(&tag).await? {
            None
        } else {
            if !has_required_files(&self.materializer.project_dir(project.id), stack) {
                self.materializer
                    .materialize(project.id, &project.name, &project.files, stack)
                    .await?;
            }
            Some(self.build_image(project.id, stack, cancel).await?)
        };
        self.launch(deployment, stack, built_at, cancel).await
    }

    /// Persist `error` with a message after a failed lifecycle operation.
    /// The container id and port are dropped since nothing runs for the
    /// deployment any more.
    async fn persist_failure(&self, deployment_id: i64, error: &OrchestratorError) -> Result<()> {
        let message = failure_message(error);
        let clears_container = !matches!(error, OrchestratorError::EngineUnavailable(_));
        self.store
            .update_deployment(deployment_id, |d| {
                d.mark_error(message);
                if clears_container && d.status == DeploymentStatus::Error {
                    d.host_port = None;
                }
            })
            .await?;
        Ok(())
    }

    /// Current status, health and resource usage. Read-only.
    pub async fn status(&self, deployment_id: i64) -> Result<StatusReport> {
        let deployment = self.store.require_deployment(deployment_id).await?;
        let mut report = StatusReport {
            deployment_id,
            status: deployment.status,
            health: Health::Unknown,
            stats: Default::default(),
            url: deployment.url.clone(),
            last_error: deployment.last_error.clone(),
        };

        let Some(container_id) = deployment.container_id.as_deref() else {
            report.health = match deployment.status {
                DeploymentStatus::Starting => Health::Starting,
                DeploymentStatus::Stopped => Health::Stopped,
                _ => Health::Unknown,
            };
            return Ok(report);
        };

        let inspect = match self.engine.inspect_container(container_id).await {
            Ok(inspect) => Some(inspect),
            Err(e) if e.is_not_found() => None,
            Err(e @ OrchestratorError::EngineUnavailable(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(deployment_id, error = %e, "inspect failed");
                return Ok(report);
            }
        };
        let running = inspect.as_ref().is_some_and(|i| i.running);

        let probe = match (running && self.config.health_probe, deployment.host_port) {
            (true, Some(port)) => Some(probe_tcp(port).await),
            _ => None,
        };
        let sample = if running {
            match self.engine.container_stats(container_id).await {
                Ok(sample) => Some(sample),
                Err(e) => {
                    tracing::debug!(deployment_id, error = %e, "stats unavailable");
                    None
                }
            }
        } else {
            None
        };

        report.health = derive_health(inspect.as_ref(), probe);
        report.stats = assemble_stats(sample, inspect.as_ref(), Utc::now());
        Ok(report)
    }

    /// Most recent `tail` lines of the container's combined output.
    pub async fn logs(&self, deployment_id: i64, tail: usize) -> Result<String> {
        let deployment = self.store.require_deployment(deployment_id).await?;
        let container_id = deployment.container_id.ok_or_else(|| {
            OrchestratorError::not_found(format!("container for deployment {deployment_id}"))
        })?;
        let raw = self.engine.container_logs(&container_id, tail).await?;
        Ok(cap_to_last_bytes(
            &tail_lines(&raw, tail),
            self.config.max_log_bytes,
        ))
    }

    /// Running orchestrator-owned containers, straight from the engine.
    pub async fn list_running(&self) -> Result<Vec<ContainerSummary>> {
        let owned = self.live_view.list_owned().await?;
        Ok(owned.into_iter().filter(|c| c.is_running()).collect())
    }

    /// Repair records that claim `starting`/`running` but whose container is
    /// gone or no longer running, and halt containers still running under an
    /// `error` record (a stop that failed half-way). Returns the number of
    /// repaired records.
    pub async fn reconcile(&self) -> Result<usize> {
        let live: HashMap<String, ContainerSummary> = self
            .live_view
            .list_owned()
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut repaired = 0;
        for candidate in self.store.list_deployments().await {
            if !needs_check(&candidate) {
                continue;
            }
            let _guard = self.lock_project(candidate.project_id).await?;
            let Some(deployment) = self.store.get_deployment(candidate.id).await else {
                continue;
            };
            if !needs_check(&deployment) {
                continue;
            }

            let container = deployment
                .container_id
                .as_deref()
                .and_then(|id| live.get(id).or_else(|| live.values().find(|c| c.id.starts_with(id))));
            let repair: Option<(DeploymentStatus, String)> = match container {
                _ if deployment.status == DeploymentStatus::Error => {
                    let Some(c) = container.filter(|c| c.is_running()) else {
                        continue;
                    };
                    match self.halt_container(&c.id).await {
                        Ok(()) => Some((
                            DeploymentStatus::Stopped,
                            "halted a container left running after an error".to_string(),
                        )),
                        Err(e) => {
                            tracing::warn!(deployment_id = deployment.id, error = %e, "cannot halt container");
                            None
                        }
                    }
                }
                None if deployment.container_id.is_none() => Some((
                    DeploymentStatus::Error,
                    "interrupted before the container started".to_string(),
                )),
                None => Some((
                    DeploymentStatus::Stopped,
                    "container no longer exists".to_string(),
                )),
                Some(c) if c.is_running() => None,
                Some(c) => Some(self.exit_outcome(&c.id).await),
            };
            if let Some((status, reason)) = repair {
                tracing::info!(
                    deployment_id = deployment.id,
                    %status,
                    reason = %reason,
                    "repairing drifted record"
                );
                self.store
                    .update_deployment(deployment.id, |d| {
                        d.status = status;
                        d.last_error = Some(reason);
                    })
                    .await?;
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    /// `error` for a non-zero exit, `stopped` otherwise.
    async fn exit_outcome(&self, container_id: &str) -> (DeploymentStatus, String) {
        match self.engine.inspect_container(container_id).await {
            Ok(inspect) if inspect.exit_code != 0 => (
                DeploymentStatus::Error,
                format!("container exited with code {}", inspect.exit_code),
            ),
            _ => (DeploymentStatus::Stopped, "container exited".to_string()),
        }
    }

    fn labels(&self, project_id: i64, deployment_id: Option<i64>) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            (LABEL_OWNER.to_string(), self.config.owner_label.clone()),
            (LABEL_PROJECT.to_string(), project_id.to_string()),
        ]);
        if let Some(id) = deployment_id {
            labels.insert(LABEL_DEPLOYMENT.to_string(), id.to_string());
        }
        labels
    }
}

/// Records `reconcile` looks at: active ones, and `error` ones that still
/// name a container.
fn needs_check(deployment: &Deployment) -> bool {
    deployment.status.is_active()
        || (deployment.status == DeploymentStatus::Error && deployment.container_id.is_some())
}

/// Message persisted as `last_error`. Build failures keep the tail of the
/// build output.
fn failure_message(error: &OrchestratorError) -> String {
    match error {
        OrchestratorError::Cancelled => "cancelled".to_string(),
        OrchestratorError::BuildFailed { output, .. } => {
            format!("{error}\n{}", tail_lines(output, 20))
        }
        other => other.to_string(),
    }
}
