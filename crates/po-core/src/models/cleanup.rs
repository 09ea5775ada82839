use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// What a cleanup run reclaims.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "scope")]
pub enum CleanupScope {
    /// One deployment and, if it was the project's last, the project's image
    /// and materialized directory.
    Deployment { deployment_id: i64 },
    /// Every deployment of a project.
    Project { project_id: i64 },
    /// Every orchestrator-owned container and image host-wide, the whole
    /// materialized root and all tables. Needs `confirm`.
    FullReset { confirm: bool },
}

/// Counts of what a cleanup removed (or, on a dry run, would remove).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub dry_run: bool,
    pub removed_containers: usize,
    pub removed_images: usize,
    pub removed_files: usize,
    pub removed_records: usize,
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Same counts, ignoring the dry-run flag and errors.
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.removed_containers,
            self.removed_images,
            self.removed_files,
            self.removed_records,
        )
    }

    pub fn into_result(self) -> Result<Self, OrchestratorError> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(OrchestratorError::PartialFailure(self.errors))
        }
    }
}
