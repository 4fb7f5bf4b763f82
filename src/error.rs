use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Malformed job {}: {reason}", path.display())]
    MalformedJob { path: PathBuf, reason: String },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Unsafe artifact path: {}", .0.display())]
    UnsafePath(PathBuf),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl OutboxError {
    /// Wraps an `io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OutboxError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Classifies why a job (or a published file) did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The job file is not a valid JSON object.
    MalformedJob,
    /// No handler is registered for the resolved type.
    UnknownType,
    /// The handler needs input the job did not provide.
    MissingInput,
    /// The handler returned an error, panicked or timed out.
    HandlerError,
    /// A store or artifact write failed.
    IoFailure,
    /// A sink write failed.
    PublishFailure,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::MalformedJob => write!(f, "MalformedJob"),
            FailureKind::UnknownType => write!(f, "UnknownType"),
            FailureKind::MissingInput => write!(f, "MissingInput"),
            FailureKind::HandlerError => write!(f, "HandlerError"),
            FailureKind::IoFailure => write!(f, "IOFailure"),
            FailureKind::PublishFailure => write!(f, "PublishFailure"),
        }
    }
}
