use std::path::PathBuf;
use std::time::Duration;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("step '{step}' requires unregistered step '{missing}'")]
    Dependency { step: String, missing: String },

    #[error("step '{0}' is already registered")]
    DuplicateStep(String),

    #[error("command failed: {command} (exit code {exit_code})")]
    ToolInvocation {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command timed out after {timeout:?}: {command}")]
    ToolTimeout { command: String, timeout: Duration },

    #[error(
        "{target} did not become ready within {waited:?} \
         (last error: {last_error}); inspect the workload logs"
    )]
    ReadinessTimeout {
        target: String,
        waited: Duration,
        last_error: String,
    },

    #[error("failed to write {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no TLS certificate has been issued for {0}")]
    TlsNotIssued(String),

    #[error("another provisioning run holds the lock at {0}")]
    Locked(PathBuf),

    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("aborted by operator")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ProvisionError {
    /// Captured stderr of the failing tool, if this error came from one.
    #[must_use]
    pub fn tool_stderr(&self) -> Option<&str> {
        match self {
            Self::ToolInvocation { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArtifactWrite {
            path: path.into(),
            source,
        }
    }
}
