use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("cannot change task family during an update: requested '{requested}', service runs '{current}'")]
    ConflictingFamily { requested: String, current: String },

    #[error("spec file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid spec file: {0}")]
    InvalidConfig(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("expected exactly one match for {0}")]
    MultipleMatch(String),

    #[error("platform call failed: {0}")]
    Platform(String),

    #[error("timed out after {}s while waiting for [{target}]", elapsed.as_secs())]
    Timeout { target: String, elapsed: Duration },

    #[error("rollout of [{target}] failed: {source}")]
    Rollout {
        target: String,
        #[source]
        source: Box<DeployError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl DeployError {
    /// True for errors raised before anything was submitted to the platform.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DeployError::InvalidSpec(_)
                | DeployError::InvalidIdentifier(_)
                | DeployError::ConflictingFamily { .. }
                | DeployError::ConfigNotFound(_)
                | DeployError::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
