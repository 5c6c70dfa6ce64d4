//! Error types for the sync engine.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// The mirror tool could not be launched at all.
    #[error("Could not launch {}: {source}", .program.display())]
    ToolUnavailable {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The mirror tool ran but exited unsuccessfully.
    #[error("exit code {}: {stderr}", describe_exit_code(.code))]
    SubprocessFailure { code: Option<i32>, stderr: String },

    #[error("Sync cancelled by user")]
    Cancelled,

    #[error("Source path does not exist: {0}")]
    SourceNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Cancellation is a terminal outcome of its own, never a fallback trigger.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl serde::Serialize for SyncError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

fn describe_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subprocess_failure_message() {
        let err = SyncError::SubprocessFailure {
            code: Some(23),
            stderr: "rsync: some files could not be transferred".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "exit code 23: rsync: some files could not be transferred"
        );

        let killed = SyncError::SubprocessFailure {
            code: None,
            stderr: String::new(),
        };
        assert!(killed.to_string().starts_with("exit code none"));
    }

    #[test]
    fn test_only_cancelled_is_cancelled() {
        assert!(SyncError::Cancelled.is_cancelled());
        assert!(!SyncError::Internal("x".into()).is_cancelled());
        let missing = SyncError::ToolUnavailable {
            program: PathBuf::from("rsync"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(!missing.is_cancelled());
    }

    #[test]
    fn test_serializes_as_display_string() {
        let err = SyncError::SourceNotFound("/nope".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Source path does not exist: /nope\"");
    }
}
