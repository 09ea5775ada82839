use serde::Serialize;

use crate::error::{ErrorKind, OrchestratorError};

use super::deployment::DeploymentStatus;

/// Structured outcome of every externally triggered action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult<T> {
    pub success: bool,
    pub message: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ActionResult<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            status_code: 200,
            error_kind: None,
            data: Some(data),
        }
    }

    pub fn failed(error: &OrchestratorError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            status_code: error.status_code(),
            error_kind: Some(error.kind()),
            data: None,
        }
    }

    /// Failure that still carries a payload, e.g. a cleanup report with
    /// partial counts.
    pub fn failed_with(error: &OrchestratorError, data: T) -> Self {
        Self {
            data: Some(data),
            ..Self::failed(error)
        }
    }

    pub fn from_result(result: Result<T, OrchestratorError>, message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::ok(data, message),
            Err(e) => Self::failed(&e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    pub deployment_id: i64,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsOutcome {
    pub deployment_id: i64,
    pub logs: String,
}
