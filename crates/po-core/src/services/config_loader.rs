use std::path::Path;

use crate::error::{OrchestratorError, Result};
use crate::models::OrchestratorConfig;

pub const CONFIG_FILENAME: &str = "preview-orchestrator.yaml";

/// Load `preview-orchestrator.yaml` from the workspace directory, falling
/// back to defaults when the file does not exist.
pub fn load(workspace_dir: &Path) -> Result<OrchestratorConfig> {
    let config_path = workspace_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let config = OrchestratorConfig {
            workspace_dir: workspace_dir.to_path_buf(),
            ..OrchestratorConfig::default()
        };
        return Ok(config);
    }
    load_file(&config_path, workspace_dir)
}

/// Load an explicitly named config file. Unlike [`load`], a missing file is
/// an error.
pub fn load_file(config_path: &Path, workspace_dir: &Path) -> Result<OrchestratorConfig> {
    if !config_path.exists() {
        return Err(OrchestratorError::ConfigNotFound(config_path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(config_path)?;
    let mut config: OrchestratorConfig = if contents.trim().is_empty() {
        OrchestratorConfig::default()
    } else {
        serde_yaml::from_str(&contents)
            .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))?
    };
    config.workspace_dir = workspace_dir.to_path_buf();
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &OrchestratorConfig) -> Result<()> {
    let range = config.port_range;
    if range.start == 0 || range.start > range.end {
        return Err(OrchestratorError::InvalidConfig(format!(
            "port_range {}-{} is empty or starts at 0",
            range.start, range.end
        )));
    }
    if config.image_prefix.is_empty()
        || !config
            .image_prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(OrchestratorError::InvalidConfig(format!(
            "image_prefix '{}' must be non-empty lowercase alphanumerics, '-' or '_'",
            config.image_prefix
        )));
    }
    if config.owner_label.is_empty() {
        return Err(OrchestratorError::InvalidConfig(
            "owner_label is required".into(),
        ));
    }
    if config.domain.is_empty() {
        return Err(OrchestratorError::InvalidConfig("domain is required".into()));
    }
    Ok(())
}
