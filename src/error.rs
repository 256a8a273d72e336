use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Object store error: {0}")]
    Remote(String),

    #[error("Malformed input {}: {reason}", .path.display())]
    MalformedInput { path: PathBuf, reason: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Staging directory {} is held by another load", .0.display())]
    StagingBusy(PathBuf),

    #[error("Commit aborted and rolled back: {0}")]
    CommitAborted(String),

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Failure classes the orchestration layer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientRemote,
    MalformedInput,
    Resource,
    CommitAtomicity,
    Configuration,
}

impl PipelineError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Remote(_) => ErrorKind::TransientRemote,
            PipelineError::MalformedInput { .. }
            | PipelineError::Csv(_)
            | PipelineError::Decode(_) => ErrorKind::MalformedInput,
            PipelineError::StagingBusy(_) | PipelineError::CommitAborted(_) => {
                ErrorKind::CommitAtomicity
            }
            PipelineError::Config(_) | PipelineError::Validation(_) => ErrorKind::Configuration,
            PipelineError::Io(_)
            | PipelineError::Database(_)
            | PipelineError::Json(_)
            | PipelineError::Parquet(_)
            | PipelineError::Arrow(_)
            | PipelineError::TaskJoin(_) => ErrorKind::Resource,
        }
    }

    /// Whether re-running the failed stage as a unit can succeed. A busy
    /// staging directory belongs to another live load and is not waited on.
    pub fn is_retryable(&self) -> bool {
        if matches!(self, PipelineError::StagingBusy(_)) {
            return false;
        }
        !matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::MalformedInput
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PipelineError::Remote("timeout".to_string()).kind(),
            ErrorKind::TransientRemote
        );
        assert_eq!(
            PipelineError::malformed("a.nc", "missing").kind(),
            ErrorKind::MalformedInput
        );
        assert_eq!(
            PipelineError::CommitAborted("rename".to_string()).kind(),
            ErrorKind::CommitAtomicity
        );
        assert_eq!(
            PipelineError::Config("bucket".to_string()).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_retryable() {
        assert!(PipelineError::Remote("reset".to_string()).is_retryable());
        assert!(PipelineError::CommitAborted("rename".to_string()).is_retryable());
        assert!(!PipelineError::StagingBusy(PathBuf::from("stage")).is_retryable());
        assert!(!PipelineError::Config("missing bucket".to_string()).is_retryable());
        assert!(!PipelineError::malformed("x.csv", "no timestamp").is_retryable());
    }

    #[test]
    fn test_malformed_display() {
        let err = PipelineError::malformed("OR_GLM.nc", "missing required variables");
        assert_eq!(
            err.to_string(),
            "Malformed input OR_GLM.nc: missing required variables"
        );
    }
}
