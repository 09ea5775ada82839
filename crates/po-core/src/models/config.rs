use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Orchestrator settings, read from `preview-orchestrator.yaml` in the
/// workspace directory. Every field is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Set by the loader from the workspace location, never read from the file.
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    pub port_range: PortRange,
    pub domain: String,
    pub use_subdomains: bool,
    pub image_prefix: String,
    pub owner_label: String,
    pub timeouts: Timeouts,
    pub start_retry: RetryPolicy,
    pub health_probe: bool,
    pub max_log_bytes: usize,
    pub retention: RetentionPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from(".preview-orchestrator"),
            port_range: PortRange::default(),
            domain: "localhost".into(),
            use_subdomains: false,
            image_prefix: "po-preview".into(),
            owner_label: "preview-orchestrator".into(),
            timeouts: Timeouts::default(),
            start_retry: RetryPolicy::default(),
            health_probe: true,
            max_log_bytes: 256 * 1024,
            retention: RetentionPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Root of all materialized project directories.
    pub fn projects_dir(&self) -> PathBuf {
        self.workspace_dir.join("projects")
    }

    pub fn state_file(&self) -> PathBuf {
        self.workspace_dir.join("state.json")
    }

    /// Lock file serialising lifecycle changes of one project across
    /// processes sharing this workspace.
    pub fn project_lock_file(&self, project_id: i64) -> PathBuf {
        self.workspace_dir
            .join("locks")
            .join(format!("project-{project_id}.lock"))
    }

    /// Image tag shared by every deployment of a project.
    pub fn image_tag(&self, project_id: i64) -> String {
        format!("{}-{project_id}:latest", self.image_prefix)
    }

    pub fn container_name(&self, project_id: i64, deployment_id: i64) -> String {
        format!("{}-{project_id}-{deployment_id}", self.image_prefix)
    }

    /// Externally reachable URL for a deployment listening on `host_port`.
    pub fn external_url(&self, project_id: i64, host_port: u16) -> String {
        if self.use_subdomains {
            format!("https://project-{project_id}.{}", self.domain)
        } else {
            format!("http://{}:{host_port}", self.domain)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 41000,
            end: 41999,
        }
    }
}

/// Upper bounds, in seconds, for each class of container engine call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub build_secs: u64,
    pub run_secs: u64,
    pub stop_secs: u64,
    pub inspect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            build_secs: 600,
            run_secs: 60,
            stop_secs: 30,
            inspect_secs: 10,
        }
    }
}

impl Timeouts {
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn run(&self) -> Duration {
        Duration::from_secs(self.run_secs)
    }

    /// Grace period handed to the engine before it kills the container.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_secs)
    }

    pub fn inspect(&self) -> Duration {
        Duration::from_secs(self.inspect_secs)
    }
}

/// How many extra launch attempts `start` makes and how long it waits
/// between them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Number of stopped deployments kept per project after a new deploy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub keep_stopped: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { keep_stopped: 2 }
    }
}
