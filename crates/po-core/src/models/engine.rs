use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label carrying the orchestrator's ownership marker on containers and images.
pub const LABEL_OWNER: &str = "po.managed-by";
pub const LABEL_PROJECT: &str = "po.project-id";
pub const LABEL_DEPLOYMENT: &str = "po.deployment-id";

/// Input to an image build.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub context_dir: PathBuf,
    pub tag: String,
    pub labels: BTreeMap<String, String>,
}

/// Input to a detached container launch.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub labels: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

/// One container as reported by a label-filtered listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Engine state word: `running`, `exited`, `created`, ...
    pub state: String,
    pub labels: BTreeMap<String, String>,
    /// Host ports published by the container.
    pub host_ports: Vec<u16>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    pub fn project_id(&self) -> Option<i64> {
        self.labels.get(LABEL_PROJECT)?.parse().ok()
    }

    pub fn deployment_id(&self) -> Option<i64> {
        self.labels.get(LABEL_DEPLOYMENT)?.parse().ok()
    }
}

/// Runtime state of a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    pub id: String,
    pub running: bool,
    pub status: String,
    pub exit_code: i64,
    pub started_at: Option<DateTime<Utc>>,
    /// Engine-side healthcheck verdict, when the image defines one.
    pub health: Option<String>,
}

/// One `stats` sample. Either reading may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSample {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}
