use thiserror::Error;

#[derive(Debug, Error)]
pub enum DevxError {
    #[error("no installation found: run 'cgdevx setup' first")]
    NotInstalled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("preflight check failed: {0}")]
    Preflight(String),

    #[error("'{0}' is not installed or not on PATH")]
    ToolNotInstalled(String),

    #[error("failed to spawn '{tool}': {reason}")]
    ToolSpawnFailed { tool: String, reason: String },

    #[error("'{tool} {args}' exited with {code}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}")]
    ToolFailed {
        tool: String,
        args: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("{resource} not ready: {reason}")]
    NotReady { resource: String, reason: String },

    #[error("{0} was deleted before reaching the expected condition")]
    ResourceDeleted(String),

    #[error("max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },

    #[error("stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<DevxError>,
    },

    #[error("aborted by operator: {0}")]
    Aborted(String),

    #[error("missing state value '{0}'")]
    MissingValue(String),

    #[error("unexpected response from {service}: {message}")]
    Api { service: String, message: String },

    #[error("home directory not found: set HOME or CGDEVX_HOME")]
    HomeNotFound,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DevxError {
    /// Name of the stage that failed, if this error came out of the pipeline.
    pub fn failed_stage(&self) -> Option<&str> {
        match self {
            DevxError::StageFailed { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DevxError>;
