use std::path::Path;

use crate::error::{DeployError, Result};
use crate::models::DeployConfig;
use crate::services::validation;

pub const SPEC_FILENAME: &str = ".ecs-deploy.yaml";

/// Load a spec file that must exist.
pub fn load(path: &Path) -> Result<DeployConfig> {
    if !path.exists() {
        return Err(DeployError::ConfigNotFound(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    let config: DeployConfig = serde_yaml::from_str(&contents)
        .map_err(|e| DeployError::InvalidConfig(e.to_string()))?;

    if let Some(wait) = &config.wait {
        if wait.interval == Some(0) {
            return Err(DeployError::InvalidConfig(
                "wait.interval must be positive".into(),
            ));
        }
    }
    if let Some(task) = &config.spec.task_definition {
        if !task.family.is_empty() {
            validation::validate_task(task)
                .map_err(|e| DeployError::InvalidConfig(e.to_string()))?;
        }
    }
    tracing::debug!(path = %path.display(), "loaded spec file");
    Ok(config)
}

/// Load `explicit` if given, otherwise `.ecs-deploy.yaml` in `dir` when it
/// exists, otherwise an empty config.
pub fn load_or_default(explicit: Option<&Path>, dir: &Path) -> Result<DeployConfig> {
    if let Some(path) = explicit {
        return load(path);
    }
    let default_path = dir.join(SPEC_FILENAME);
    if default_path.exists() {
        load(&default_path)
    } else {
        Ok(DeployConfig::default())
    }
}
