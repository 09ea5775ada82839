use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

impl DeploymentStatus {
    /// Whether the deployment holds (or is about to hold) its host port.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// A persisted deployment instance: one (possibly former) container of a
/// project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: i64,
    pub project_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    pub container_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_built_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(id: i64, project_id: i64, container_port: u16) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id,
            container_id: None,
            image_tag: None,
            host_port: None,
            container_port,
            url: None,
            status: DeploymentStatus::Starting,
            last_built_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = DeploymentStatus::Error;
        self.last_error = Some(message.into());
    }
}

/// Lifecycle transition recorded against a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    pub id: i64,
    pub deployment_id: i64,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DeploymentStatus>,
    pub to: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Health {
    Healthy,
    Unhealthy,
    Starting,
    Stopped,
    /// The record points at a container the engine no longer knows.
    Missing,
    Unknown,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Starting => "starting",
            Self::Stopped => "stopped",
            Self::Missing => "missing",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Best-effort resource usage; absent readings serialize as `"unknown"`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    #[serde(serialize_with = "unknown_if_none")]
    pub cpu_percent: Option<f64>,
    #[serde(serialize_with = "unknown_if_none")]
    pub memory_percent: Option<f64>,
    #[serde(serialize_with = "unknown_if_none")]
    pub uptime_secs: Option<i64>,
}

fn unknown_if_none<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    match value {
        Some(v) => v.serialize(serializer),
        None => serializer.serialize_str("unknown"),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub deployment_id: i64,
    pub status: DeploymentStatus,
    pub health: Health,
    pub stats: ContainerStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Row of the `list_all` listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentListing {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
