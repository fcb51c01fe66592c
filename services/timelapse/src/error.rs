//! Error types for the timelapse job.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by an [`ObjectStore`](crate::object_store::ObjectStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Timeouts, throttling and dropped connections that outlived the
    /// transport retry budget.
    #[error("Transient storage error during {operation}: {message}")]
    Transient { operation: String, message: String },

    /// Credential, permission and missing-bucket failures.
    #[error("Storage error during {operation}: {message}")]
    Permanent { operation: String, message: String },

    #[error("Invalid storage response during {operation}: {message}")]
    InvalidResponse { operation: String, message: String },
}

impl StoreError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_response(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether the failure was of a kind a later run may not hit again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors from the local staging directory.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Failed to prepare staging directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write staged frame {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{remaining} leftover file(s) could not be removed from {path}")]
    Dirty { path: PathBuf, remaining: usize },
}

/// Errors from the video encoder.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("No frames to encode")]
    NoFrames,

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Encoder reported success but {0} is missing")]
    MissingOutput(PathBuf),
}

/// Pipeline stage a camera failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FolderCheck,
    Selection,
    Staging,
    Encoding,
    Publishing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::FolderCheck => "folder check",
            Stage::Selection => "selection",
            Stage::Staging => "staging",
            Stage::Encoding => "encoding",
            Stage::Publishing => "publishing",
        };
        f.write_str(name)
    }
}

/// A failure that aborted one camera's pipeline.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("{stage} failed: {source}")]
    Store {
        stage: Stage,
        #[source]
        source: StoreError,
    },

    #[error("staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
}

impl CameraError {
    pub fn store(stage: Stage, source: StoreError) -> Self {
        Self::Store { stage, source }
    }

    /// Stage the pipeline was in when it failed
    pub fn stage(&self) -> Stage {
        match self {
            Self::Store { stage, .. } => *stage,
            Self::Staging(_) => Stage::Staging,
            Self::Encode(_) => Stage::Encoding,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store { source, .. } if source.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::transient("list_objects", "timeout").is_transient());
        assert!(!StoreError::permanent("list_objects", "AccessDenied").is_transient());
    }

    #[test]
    fn test_camera_error_stage() {
        let err = CameraError::store(
            Stage::Publishing,
            StoreError::transient("put_object", "SlowDown"),
        );
        assert_eq!(err.stage(), Stage::Publishing);
        assert!(err.is_transient());
        assert_eq!(
            err.to_string(),
            "publishing failed: Transient storage error during put_object: SlowDown"
        );

        let err = CameraError::from(EncodeError::NoFrames);
        assert_eq!(err.stage(), Stage::Encoding);
        assert!(!err.is_transient());
    }
}
