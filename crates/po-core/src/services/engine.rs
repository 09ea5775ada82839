use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{BuildSpec, ContainerInspect, ContainerSummary, RunSpec, StatsSample};

/// Boundary to the host container engine.
///
/// Implementations report a missing container or image as
/// [`OrchestratorError::NotFound`](crate::OrchestratorError::NotFound) and an
/// unreachable engine as `EngineUnavailable`. Every call is bounded by a
/// timeout.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Fails with `EngineUnavailable` when no engine answers.
    async fn ping(&self) -> Result<()>;

    /// Build an image. Returns the captured build output.
    async fn build_image(&self, spec: &BuildSpec, cancel: &CancellationToken) -> Result<String>;

    async fn image_exists(&self, reference: &str) -> Result<bool>;

    /// Create and start a detached container. Returns its id.
    async fn run_container(&self, spec: &RunSpec, cancel: &CancellationToken) -> Result<String>;

    /// Start an existing, stopped container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Ask the container to stop, letting the engine kill it after `grace`.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    async fn kill_container(&self, id: &str) -> Result<()>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect>;

    async fn container_stats(&self, id: &str) -> Result<StatsSample>;

    /// Last `tail` lines of combined stdout/stderr.
    async fn container_logs(&self, id: &str, tail: usize) -> Result<String>;

    /// All containers, running or not, carrying `label` (`key=value`).
    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>>;

    /// Ids of all images carrying `label` (`key=value`).
    async fn list_images(&self, label: &str) -> Result<Vec<String>>;

    async fn remove_image(&self, reference: &str, force: bool) -> Result<()>;
}

/// Live listing of orchestrator-owned containers. Never cached: every call
/// asks the engine.
#[async_trait]
pub trait LiveInstanceView: Send + Sync {
    async fn list_owned(&self) -> Result<Vec<ContainerSummary>>;
}

/// [`LiveInstanceView`] backed by a label-filtered engine listing.
pub struct EngineLiveView {
    engine: Arc<dyn ContainerEngine>,
    owner_filter: String,
}

impl EngineLiveView {
    pub fn new(engine: Arc<dyn ContainerEngine>, owner_filter: String) -> Self {
        Self {
            engine,
            owner_filter,
        }
    }
}

#[async_trait]
impl LiveInstanceView for EngineLiveView {
    async fn list_owned(&self) -> Result<Vec<ContainerSummary>> {
        self.engine.list_containers(&self.owner_filter).await
    }
}

/// `key=value` filter for the ownership label.
pub fn owner_filter(owner_label: &str) -> String {
    format!("{}={owner_label}", crate::models::engine::LABEL_OWNER)
}
