use async_trait::async_trait;

use crate::error::{OrchestratorError, Result};
use crate::models::Project;

use super::state::StateStore;

/// Read-only access to generated projects.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn get_project(&self, id: i64) -> Result<Project>;
}

#[async_trait]
impl ProjectSource for StateStore {
    async fn get_project(&self, id: i64) -> Result<Project> {
        StateStore::get_project(self, id)
            .await
            .ok_or_else(|| OrchestratorError::not_found(format!("project {id}")))
    }
}
