use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Flat classification of [`OrchestratorError`] handed to callers of the
/// deployment API alongside the human-readable message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    EngineUnavailable,
    MaterializationFailed,
    BuildFailed,
    StartFailed,
    ResourceExhausted,
    NotFound,
    Timeout,
    PartialFailure,
    Cancelled,
    InvalidRequest,
    Config,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("materialization failed: {0}")]
    MaterializationFailed(String),

    #[error("image build failed for '{tag}'")]
    BuildFailed { tag: String, output: String },

    #[error("container start failed: {0}")]
    StartFailed(String),

    #[error("no free host port in range {start}-{end}")]
    ResourceExhausted { start: u16, end: u16 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("operation completed with {} failed step(s)", .0.len())]
    PartialFailure(Vec<String>),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("container engine command failed: {0}")]
    Engine(String),

    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("state persistence failed: {0}")]
    State(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            Self::MaterializationFailed(_) => ErrorKind::MaterializationFailed,
            Self::BuildFailed { .. } => ErrorKind::BuildFailed,
            Self::StartFailed(_) => ErrorKind::StartFailed,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::PartialFailure(_) => ErrorKind::PartialFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::ConfigNotFound(_) | Self::InvalidConfig(_) => ErrorKind::Config,
            Self::Engine(_) | Self::State(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status code. `EngineUnavailable` is the only kind that
    /// maps to 503 so callers can tell missing infrastructure apart from a
    /// failed deployment.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::EngineUnavailable => 503,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Timeout => 504,
            ErrorKind::ResourceExhausted => 507,
            ErrorKind::PartialFailure => 207,
            ErrorKind::Cancelled => 499,
            _ => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// The engine refused a container because its host port is bound
    /// elsewhere.
    pub fn is_port_conflict(&self) -> bool {
        match self {
            Self::StartFailed(message) | Self::Engine(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("port is already allocated")
                    || message.contains("address already in use")
            }
            _ => false,
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_unavailable_is_503_and_distinct() {
        let err = OrchestratorError::EngineUnavailable("docker not found".into());
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.kind(), ErrorKind::EngineUnavailable);

        let others = [
            OrchestratorError::StartFailed("boom".into()),
            OrchestratorError::Engine("boom".into()),
            OrchestratorError::Timeout {
                operation: "docker stop".into(),
                seconds: 40,
            },
        ];
        for other in others {
            assert_ne!(other.status_code(), 503);
        }
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = OrchestratorError::not_found("deployment 7");
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "deployment 7 not found");
    }

    #[test]
    fn port_conflicts_are_recognised_from_engine_messages() {
        let taken = OrchestratorError::StartFailed(
            "Bind for 0.0.0.0:45000 failed: port is already allocated".into(),
        );
        assert!(taken.is_port_conflict());
        let in_use = OrchestratorError::Engine(
            "listen tcp4 0.0.0.0:45000: bind: Address already in use".into(),
        );
        assert!(in_use.is_port_conflict());
        assert!(!OrchestratorError::StartFailed("no such image".into()).is_port_conflict());
    }

    #[test]
    fn partial_failure_counts_steps() {
        let err = OrchestratorError::PartialFailure(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "operation completed with 2 failed step(s)");
        assert_eq!(err.kind(), ErrorKind::PartialFailure);
    }
}
