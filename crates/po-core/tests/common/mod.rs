// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use po_core::models::{
    BuildSpec, ContainerInspect, ContainerSummary, OrchestratorConfig, PortRange, RunSpec,
    StatsSample,
};
use po_core::services::deployer::Deployer;
use po_core::services::engine::{owner_filter, ContainerEngine, EngineLiveView};
use po_core::services::orchestrator::Orchestrator;
use po_core::services::ports::PortProbe;
use po_core::services::state::StateStore;
use po_core::{OrchestratorError, Result};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub host_port: u16,
    pub running: bool,
    pub exit_code: i64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub available: bool,
    pub containers: BTreeMap<String, FakeContainer>,
    /// Image tag to labels.
    pub images: BTreeMap<String, BTreeMap<String, String>>,
    pub next_id: u64,
    pub fail_builds: bool,
    /// Builds wait for cancellation instead of finishing.
    pub hang_builds: bool,
    /// Number of upcoming `run_container` calls that fail.
    pub run_failures: usize,
    /// `stop_container` times out and leaves the container running.
    pub stop_times_out: bool,
    /// Image references whose removal fails.
    pub undeletable_images: HashSet<String>,
    pub builds: usize,
    pub runs: usize,
    pub kills: usize,
    pub logs: String,
}

/// In-memory container engine with docker-like semantics.
pub struct FakeEngine {
    pub state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                available: true,
                ..Default::default()
            }),
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn running_count(&self) -> usize {
        self.with(|s| s.containers.values().filter(|c| c.running).count())
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.with(|s| s.containers.get(id).cloned())
    }

    /// Add a foreign container that holds `port` but belongs to nobody.
    pub fn occupy_port(&self, owner_label: &str, port: u16) {
        self.with(|s| {
            s.next_id += 1;
            let id = format!("foreign{:04}", s.next_id);
            s.containers.insert(
                id.clone(),
                FakeContainer {
                    id,
                    name: format!("foreign-{port}"),
                    image: "nginx".into(),
                    labels: BTreeMap::from([(
                        "po.managed-by".to_string(),
                        owner_label.to_string(),
                    )]),
                    host_port: port,
                    running: true,
                    exit_code: 0,
                    started_at: Utc::now(),
                },
            );
        });
    }

    fn check_available(&self) -> Result<()> {
        if self.with(|s| s.available) {
            Ok(())
        } else {
            Err(OrchestratorError::EngineUnavailable(
                "Cannot connect to the Docker daemon".into(),
            ))
        }
    }
}

fn label_matches(labels: &BTreeMap<String, String>, filter: &str) -> bool {
    match filter.split_once('=') {
        Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
        None => labels.contains_key(filter),
    }
}

fn no_such(what: &str, id: &str) -> OrchestratorError {
    OrchestratorError::not_found(format!("{what} {id}"))
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn build_image(&self, spec: &BuildSpec, cancel: &CancellationToken) -> Result<String> {
        self.check_available()?;
        if self.with(|s| s.hang_builds) {
            cancel.cancelled().await;
            return Err(OrchestratorError::Cancelled);
        }
        assert!(spec.context_dir.join("Dockerfile").is_file());
        self.with(|s| {
            s.builds += 1;
            if s.fail_builds {
                return Err(OrchestratorError::BuildFailed {
                    tag: spec.tag.clone(),
                    output: "Step 4/9 : RUN npm run build\nnpm ERR! missing script: build"
                        .into(),
                });
            }
            s.images.insert(spec.tag.clone(), spec.labels.clone());
            Ok(format!("Successfully tagged {}", spec.tag))
        })
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.with(|s| s.images.contains_key(reference)))
    }

    async fn run_container(&self, spec: &RunSpec, _cancel: &CancellationToken) -> Result<String> {
        self.check_available()?;
        self.with(|s| {
            s.runs += 1;
            if !s.images.contains_key(&spec.image) {
                return Err(OrchestratorError::StartFailed(format!(
                    "Unable to find image '{}' locally",
                    spec.image
                )));
            }
            if s.containers.values().any(|c| c.name == spec.name) {
                return Err(OrchestratorError::StartFailed(format!(
                    "Conflict. The container name \"/{}\" is already in use",
                    spec.name
                )));
            }
            s.next_id += 1;
            let id = format!("{:064x}", s.next_id);
            if s.run_failures > 0 {
                s.run_failures -= 1;
                // Docker leaves the created container behind when start fails.
                s.containers.insert(
                    id.clone(),
                    FakeContainer {
                        id,
                        name: spec.name.clone(),
                        image: spec.image.clone(),
                        labels: spec.labels.clone(),
                        host_port: spec.host_port,
                        running: false,
                        exit_code: 128,
                        started_at: Utc::now(),
                    },
                );
                return Err(OrchestratorError::StartFailed(
                    "driver failed programming external connectivity".into(),
                ));
            }
            if s
                .containers
                .values()
                .any(|c| c.running && c.host_port == spec.host_port)
            {
                return Err(OrchestratorError::StartFailed(format!(
                    "Bind for 0.0.0.0:{} failed: port is already allocated",
                    spec.host_port
                )));
            }
            s.containers.insert(
                id.clone(),
                FakeContainer {
                    id: id.clone(),
                    name: spec.name.clone(),
                    image: spec.image.clone(),
                    labels: spec.labels.clone(),
                    host_port: spec.host_port,
                    running: true,
                    exit_code: 0,
                    started_at: Utc::now(),
                },
            );
            Ok(id)
        })
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.check_available()?;
        self.with(|s| {
            let port = s
                .containers
                .get(id)
                .ok_or_else(|| no_such("container", id))?
                .host_port;
            if s
                .containers
                .values()
                .any(|c| c.id != id && c.running && c.host_port == port)
            {
                return Err(OrchestratorError::Engine("port is already allocated".into()));
            }
            let container = s.containers.get_mut(id).ok_or_else(|| no_such("container", id))?;
            container.running = true;
            container.started_at = Utc::now();
            Ok(())
        })
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<()> {
        self.check_available()?;
        self.with(|s| {
            let times_out = s.stop_times_out;
            let container = s.containers.get_mut(id).ok_or_else(|| no_such("container", id))?;
            if times_out {
                return Err(OrchestratorError::Timeout {
                    operation: "docker stop".into(),
                    seconds: 40,
                });
            }
            container.running = false;
            Ok(())
        })
    }

    async fn kill_container(&self, id: &str) -> Result<()> {
        self.check_available()?;
        self.with(|s| {
            s.kills += 1;
            let container = s.containers.get_mut(id).ok_or_else(|| no_such("container", id))?;
            container.running = false;
            container.exit_code = 137;
            Ok(())
        })
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        self.check_available()?;
        self.with(|s| {
            let key = s
                .containers
                .values()
                .find(|c| c.id == id || c.name == id)
                .map(|c| c.id.clone())
                .ok_or_else(|| no_such("container", id))?;
            if s.containers[&key].running && !force {
                return Err(OrchestratorError::Engine(
                    "cannot remove a running container".into(),
                ));
            }
            s.containers.remove(&key);
            Ok(())
        })
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        self.check_available()?;
        let container = self.container(id).ok_or_else(|| no_such("object", id))?;
        Ok(ContainerInspect {
            id: container.id,
            running: container.running,
            status: if container.running { "running" } else { "exited" }.into(),
            exit_code: container.exit_code,
            started_at: Some(container.started_at),
            health: None,
        })
    }

    async fn container_stats(&self, id: &str) -> Result<StatsSample> {
        self.check_available()?;
        match self.container(id) {
            Some(c) if c.running => Ok(StatsSample {
                cpu_percent: Some(0.5),
                memory_percent: Some(1.25),
            }),
            Some(_) => Ok(StatsSample::default()),
            None => Err(no_such("container", id)),
        }
    }

    async fn container_logs(&self, id: &str, _tail: usize) -> Result<String> {
        self.check_available()?;
        self.container(id).ok_or_else(|| no_such("container", id))?;
        Ok(self.with(|s| s.logs.clone()))
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>> {
        self.check_available()?;
        Ok(self.with(|s| {
            s.containers
                .values()
                .filter(|c| label_matches(&c.labels, label))
                .map(|c| ContainerSummary {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    image: c.image.clone(),
                    state: if c.running { "running" } else { "exited" }.into(),
                    labels: c.labels.clone(),
                    host_ports: vec![c.host_port],
                })
                .collect()
        }))
    }

    async fn list_images(&self, label: &str) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(self.with(|s| {
            s.images
                .iter()
                .filter(|(_, labels)| label_matches(labels, label))
                .map(|(tag, _)| tag.clone())
                .collect()
        }))
    }

    async fn remove_image(&self, reference: &str, _force: bool) -> Result<()> {
        self.check_available()?;
        self.with(|s| {
            if s.undeletable_images.contains(reference) {
                return Err(OrchestratorError::Engine(format!(
                    "conflict: unable to delete {reference}"
                )));
            }
            s.images
                .remove(reference)
                .map(|_| ())
                .ok_or_else(|| no_such("image", reference))
        })
    }
}

/// Every port is free on the host; the fake engine does the bookkeeping.
pub struct FreePorts;

impl PortProbe for FreePorts {
    fn is_free(&self, _port: u16) -> bool {
        true
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub engine: Arc<FakeEngine>,
    pub store: Arc<StateStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub deployer: Deployer,
}

pub fn test_config(dir: &TempDir) -> OrchestratorConfig {
    let mut config = OrchestratorConfig {
        workspace_dir: dir.path().to_path_buf(),
        port_range: PortRange {
            start: 45000,
            end: 45009,
        },
        health_probe: false,
        ..Default::default()
    };
    config.start_retry.backoff_ms = 0;
    config
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(customize: impl FnOnce(&mut OrchestratorConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    customize(&mut config);

    let engine = Arc::new(FakeEngine::new());
    let store = Arc::new(StateStore::open(config.state_file()).await.unwrap());
    let live_view = Arc::new(EngineLiveView::new(
        engine.clone(),
        owner_filter(&config.owner_label),
    ));
    let orchestrator = Arc::new(Orchestrator::with_parts(
        config,
        store.clone(),
        store.clone(),
        engine.clone(),
        live_view,
        Arc::new(FreePorts),
    ));
    let deployer = Deployer::new(orchestrator.clone());
    Harness {
        dir,
        engine,
        store,
        orchestrator,
        deployer,
    }
}

impl Harness {
    /// Store a static-site project and return its id.
    pub async fn add_project(&self, name: &str) -> i64 {
        self.add_project_with(name, "static", static_site(name)).await
    }

    pub async fn add_project_with(
        &self,
        name: &str,
        stack: &str,
        files: BTreeMap<String, String>,
    ) -> i64 {
        self.store
            .create_project(name, stack, files)
            .await
            .unwrap()
            .id
    }

    /// Another orchestrator over the same workspace and engine, standing in
    /// for a second `po` process.
    pub async fn second_process(&self) -> Arc<Orchestrator> {
        let config = self.orchestrator.config().clone();
        let store = Arc::new(StateStore::open(config.state_file()).await.unwrap());
        let live_view = Arc::new(EngineLiveView::new(
            self.engine.clone(),
            owner_filter(&config.owner_label),
        ));
        Arc::new(Orchestrator::with_parts(
            config,
            store.clone(),
            store,
            self.engine.clone(),
            live_view,
            Arc::new(FreePorts),
        ))
    }

    pub async fn deploy(&self, project_id: i64) -> po_core::models::Deployment {
        self.orchestrator
            .deploy(project_id, &CancellationToken::new())
            .await
            .unwrap()
    }
}

pub fn static_site(title: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "index.html".to_string(),
            format!("<!doctype html><title>{title}</title><h1>{title}</h1>"),
        ),
        ("style.css".to_string(), "h1 { color: teal; }".to_string()),
    ])
}
