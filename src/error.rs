use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors from the container runtime and registry capabilities.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("inspect output for {1} has no {0}")]
    MissingField(&'static str, String),
    #[error("registry returned no digest for {0}")]
    NoRemoteDigest(String),
    #[error("runtime rejected the request: {0}")]
    Rejected(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            })
        )
    }
}

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("local digest lookup for {image} failed: {source}")]
    Local {
        image: String,
        #[source]
        source: RuntimeError,
    },
    #[error("image {0} has no repo digest (built locally or never pulled)")]
    NoLocalDigest(String),
    #[error("remote digest lookup for {image} failed: {source}")]
    Remote {
        image: String,
        #[source]
        source: RuntimeError,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("LABEL_ENABLE must be empty or 'key=value', got '{0}'")]
    InvalidLabelFilter(String),
    #[error("unknown LOG_LEVEL '{0}' (expected DEBUG, INFO, WARNING or ERROR)")]
    InvalidLogLevel(String),
    #[error("CHECK_INTERVAL_MINUTES={0} is too large")]
    IntervalTooLarge(u64),
}

/// Step of the recreation sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pull,
    Verify,
    Stop,
    Remove,
    Create,
    Start,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pull => "pull",
            Stage::Verify => "verify pulled image",
            Stage::Stop => "stop",
            Stage::Remove => "remove",
            Stage::Create => "create",
            Stage::Start => "start",
        };
        f.write_str(name)
    }
}

/// What happened when restoring the old container after a failed recreate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    NotAttempted,
    Restored { id: String },
    Failed(String),
}

impl fmt::Display for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rollback::NotAttempted => Ok(()),
            Rollback::Restored { id } => write!(f, " (rolled back to previous image as {id})"),
            Rollback::Failed(e) => write!(f, " (rollback failed: {e})"),
        }
    }
}

#[derive(Error, Debug)]
#[error("{stage} failed for container {container}: {source}{rollback}")]
pub struct RecreateError {
    pub container: String,
    pub stage: Stage,
    #[source]
    pub source: RuntimeError,
    pub rollback: Rollback,
}

impl RecreateError {
    pub fn new(container: &str, stage: Stage, source: RuntimeError) -> Self {
        Self {
            container: container.to_string(),
            stage,
            source,
            rollback: Rollback::NotAttempted,
        }
    }

    /// Whether the old container was destroyed without a running replacement.
    pub fn container_absent(&self) -> bool {
        matches!(self.stage, Stage::Create | Stage::Start)
            && !matches!(self.rollback, Rollback::Restored { .. })
    }
}
