use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{OrchestratorError, Result};
use crate::models::{Deployment, DeploymentEvent, DeploymentStatus, Project};

use super::file_lock::FileLock;

/// Last identifier issued per table. The next row gets `last + 1`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Sequences {
    pub projects: i64,
    pub deployments: i64,
    pub deployment_events: i64,
}

/// Everything persisted by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTables {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
    #[serde(default)]
    pub deployment_events: Vec<DeploymentEvent>,
    #[serde(default)]
    pub sequences: Sequences,
}

impl StateTables {
    pub fn row_count(&self) -> usize {
        self.projects.len() + self.deployments.len() + self.deployment_events.len()
    }

    fn next_deployment_event_id(&mut self) -> i64 {
        self.sequences.deployment_events += 1;
        self.sequences.deployment_events
    }

    fn record_event(
        &mut self,
        deployment_id: i64,
        from: Option<DeploymentStatus>,
        to: DeploymentStatus,
        message: Option<String>,
    ) {
        let id = self.next_deployment_event_id();
        self.deployment_events.push(DeploymentEvent {
            id,
            deployment_id,
            at: Utc::now(),
            from,
            to,
            message,
        });
    }

    /// Every event must belong to an existing deployment.
    fn check_integrity(&self) -> Result<()> {
        let deployment_ids: HashSet<i64> = self.deployments.iter().map(|d| d.id).collect();
        if let Some(orphan) = self
            .deployment_events
            .iter()
            .find(|e| !deployment_ids.contains(&e.deployment_id))
        {
            return Err(OrchestratorError::State(format!(
                "event {} references missing deployment {}",
                orphan.id, orphan.deployment_id
            )));
        }
        Ok(())
    }
}

/// JSON-file backed store for the `projects`, `deployments` and
/// `deployment_events` tables.
///
/// Several `po` processes may share one state file. Every mutation runs as
/// a transaction under an exclusive lock file: the tables are re-read from
/// disk, the closure edits them, integrity is checked, and the result is
/// written to a temp file and renamed over the state file. A failing closure
/// or write leaves the file untouched. Reads load the latest committed file;
/// the in-memory copy is only used when the file cannot be read.
pub struct StateStore {
    state_file_path: PathBuf,
    lock_file_path: PathBuf,
    tables: Mutex<StateTables>,
}

impl StateStore {
    /// Open the store at `state_file_path`, loading existing rows if present.
    pub async fn open(state_file_path: impl Into<PathBuf>) -> Result<Self> {
        let state_file_path = state_file_path.into();
        let lock_file_path = state_file_path.with_extension("lock");
        let tables = load_tables(&state_file_path).await?;
        Ok(Self {
            state_file_path,
            lock_file_path,
            tables: Mutex::new(tables),
        })
    }

    /// Run `f` against the latest committed tables and commit the result
    /// atomically.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StateTables) -> Result<T>,
    {
        let mut guard = self.tables.lock().await;
        let _file_lock = FileLock::exclusive(self.lock_file_path.clone()).await?;
        let mut working = load_tables(&self.state_file_path).await?;
        let value = f(&mut working)?;
        working.check_integrity()?;
        save_tables(&self.state_file_path, &working).await?;
        *guard = working;
        Ok(value)
    }

    /// Tables as last committed by any process.
    async fn current(&self) -> MutexGuard<'_, StateTables> {
        let mut guard = self.tables.lock().await;
        match load_tables(&self.state_file_path).await {
            Ok(tables) => *guard = tables,
            Err(e) => tracing::warn!(error = %e, "state file unreadable, using cached tables"),
        }
        guard
    }

    // ─── Projects ──────────────────────────────────────────────────────

    pub async fn create_project(
        &self,
        name: &str,
        stack_label: &str,
        files: BTreeMap<String, String>,
    ) -> Result<Project> {
        self.transaction(|t| {
            t.sequences.projects += 1;
            let project = Project {
                id: t.sequences.projects,
                name: name.to_string(),
                stack_label: stack_label.to_string(),
                files,
                created_at: Utc::now(),
            };
            t.projects.push(project.clone());
            Ok(project)
        })
        .await
    }

    pub async fn get_project(&self, id: i64) -> Option<Project> {
        let tables = self.current().await;
        tables.projects.iter().find(|p| p.id == id).cloned()
    }

    pub async fn list_projects(&self) -> Vec<Project> {
        self.current().await.projects.clone()
    }

    /// Delete a project row. Refused while deployments still reference it.
    pub async fn delete_project(&self, id: i64) -> Result<()> {
        self.transaction(|t| {
            if t.deployments.iter().any(|d| d.project_id == id) {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "project {id} still has deployments, clean them up first"
                )));
            }
            let before = t.projects.len();
            t.projects.retain(|p| p.id != id);
            if t.projects.len() == before {
                return Err(OrchestratorError::not_found(format!("project {id}")));
            }
            Ok(())
        })
        .await
    }

    // ─── Deployments ───────────────────────────────────────────────────

    /// Insert a new deployment in `starting` state.
    pub async fn create_deployment(
        &self,
        project_id: i64,
        container_port: u16,
        image_tag: &str,
    ) -> Result<Deployment> {
        self.transaction(|t| {
            t.sequences.deployments += 1;
            let mut deployment = Deployment::new(t.sequences.deployments, project_id, container_port);
            deployment.image_tag = Some(image_tag.to_string());
            t.deployments.push(deployment.clone());
            t.record_event(deployment.id, None, deployment.status, None);
            Ok(deployment)
        })
        .await
    }

    pub async fn get_deployment(&self, id: i64) -> Option<Deployment> {
        let tables = self.current().await;
        tables.deployments.iter().find(|d| d.id == id).cloned()
    }

    /// Like [`get_deployment`](Self::get_deployment) but `NotFound` when absent.
    pub async fn require_deployment(&self, id: i64) -> Result<Deployment> {
        self.get_deployment(id)
            .await
            .ok_or_else(|| OrchestratorError::not_found(format!("deployment {id}")))
    }

    pub async fn list_deployments(&self) -> Vec<Deployment> {
        self.current().await.deployments.clone()
    }

    /// Deployments of a project, oldest first.
    pub async fn deployments_for_project(&self, project_id: i64) -> Vec<Deployment> {
        let tables = self.current().await;
        tables
            .deployments
            .iter()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect()
    }

    pub async fn events_for_deployment(&self, deployment_id: i64) -> Vec<DeploymentEvent> {
        let tables = self.current().await;
        tables
            .deployment_events
            .iter()
            .filter(|e| e.deployment_id == deployment_id)
            .cloned()
            .collect()
    }

    /// Host ports held by `starting`/`running` deployments.
    pub async fn active_ports(&self) -> HashSet<u16> {
        let tables = self.current().await;
        tables
            .deployments
            .iter()
            .filter(|d| d.status.is_active())
            .filter_map(|d| d.host_port)
            .collect()
    }

    /// Apply `f` to a deployment and persist it, recording a lifecycle event
    /// when the status changes.
    pub async fn update_deployment<F>(&self, id: i64, f: F) -> Result<Deployment>
    where
        F: FnOnce(&mut Deployment),
    {
        self.transaction(|t| {
            let deployment = t
                .deployments
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| OrchestratorError::not_found(format!("deployment {id}")))?;
            let before = deployment.status;
            f(deployment);
            deployment.updated_at = Utc::now();
            let updated = deployment.clone();
            if updated.status != before {
                let message = match updated.status {
                    DeploymentStatus::Error => updated.last_error.clone(),
                    _ => None,
                };
                t.record_event(id, Some(before), updated.status, message);
            }
            Ok(updated)
        })
        .await
    }

    /// Delete deployments and their events, children first. Returns the
    /// number of rows removed. Missing ids are skipped.
    pub async fn delete_deployments(&self, ids: &[i64]) -> Result<usize> {
        let ids: HashSet<i64> = ids.iter().copied().collect();
        self.transaction(|t| {
            let before = t.deployment_events.len() + t.deployments.len();
            t.deployment_events
                .retain(|e| !ids.contains(&e.deployment_id));
            t.deployments.retain(|d| !ids.contains(&d.id));
            Ok(before - t.deployment_events.len() - t.deployments.len())
        })
        .await
    }

    /// Count of rows `delete_deployments(ids)` would remove right now.
    pub async fn rows_for_deployments(&self, ids: &[i64]) -> usize {
        let tables = self.current().await;
        let deployments = tables
            .deployments
            .iter()
            .filter(|d| ids.contains(&d.id))
            .count();
        let events = tables
            .deployment_events
            .iter()
            .filter(|e| ids.contains(&e.deployment_id))
            .count();
        deployments + events
    }

    /// Empty every table, children before parents, and restart all
    /// sequences at 1. Returns the number of rows removed.
    pub async fn reset_all(&self) -> Result<usize> {
        self.transaction(|t| {
            let removed = t.row_count();
            t.deployment_events.clear();
            t.deployments.clear();
            t.projects.clear();
            t.sequences = Sequences::default();
            Ok(removed)
        })
        .await
    }

    pub async fn row_count(&self) -> usize {
        self.current().await.row_count()
    }
}

async fn load_tables(path: &Path) -> Result<StateTables> {
    if !path.exists() {
        return Ok(StateTables::default());
    }
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| OrchestratorError::State(format!("failed to read state file: {e}")))?;
    let tables: StateTables = serde_json::from_str(&json)?;
    Ok(tables)
}

async fn save_tables(path: &Path, tables: &StateTables) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| OrchestratorError::State(format!("failed to create state dir: {e}")))?;
    }
    let json = serde_json::to_string_pretty(tables)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json)
        .await
        .map_err(|e| OrchestratorError::State(format!("failed to write state file: {e}")))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| OrchestratorError::State(format!("failed to replace state file: {e}")))?;
    Ok(())
}
