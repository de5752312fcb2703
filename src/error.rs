//! Error types for the msa-reconcile library.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for reconciliation and task operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors that can occur while aligning, reconciling or applying results.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The aligner returned a different number of rows than it was given
    #[error("Unexpected number of rows in the result multiple alignment!")]
    UnexpectedRowCount { expected: usize, actual: usize },

    /// Profile merge produced a row count other than input + profile
    #[error("Failed to apply the result of Muscle")]
    ProfileMergeFailed { expected: usize, actual: usize },

    /// Another operation holds the state lock of the alignment object
    #[error("object_is_state_locked")]
    ObjectIsStateLocked,

    /// The live alignment object was dropped while the task was running
    #[error("object_removed")]
    ObjectRemoved,

    /// The task lost its own state lock before reporting
    #[error("MultipleSequenceAlignment object has been changed")]
    ObjectChanged,

    /// The aligner produced no rows
    #[error("The result multiple alignment is empty!")]
    EmptyResult,

    /// The region to align is empty or outside the alignment
    #[error("Incorrect region to align: {0}")]
    InvalidRegion(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A row id passed to the alignment object is not part of it
    #[error("Row not found: {0}")]
    RowNotFound(i64),

    /// A row order that is not a permutation of the current rows
    #[error("Invalid row order: {0}")]
    InvalidRowOrder(String),

    /// Operation was cancelled
    #[error("Alignment operation was cancelled")]
    Cancelled,

    /// Operation exceeded its time budget
    #[error("Alignment operation timed out")]
    TimedOut,

    /// The external aligner process failed
    #[error("Aligner execution failed: {0}")]
    AlignerFailed(String),

    /// The external aligner binary could not be located
    #[error("Aligner binary not found: {0}")]
    AlignerNotFound(String),

    /// Input file not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Failed to parse FASTA exchanged with the aligner
    #[error("Failed to parse FASTA: {0}")]
    FastaParse(String),

    /// I/O error during file operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error raised by a user-supplied aligner implementation
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl ReconcileError {
    /// Stable error-kind identifier reported through task results.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::UnexpectedRowCount { .. } => "unexpected_row_count",
            ReconcileError::ProfileMergeFailed { .. } => "profile_merge_failed",
            ReconcileError::ObjectIsStateLocked => "object_is_state_locked",
            ReconcileError::ObjectRemoved => "object_removed",
            ReconcileError::ObjectChanged => "object_changed",
            ReconcileError::EmptyResult => "empty_result",
            ReconcileError::InvalidRegion(_) => "invalid_region",
            ReconcileError::InvalidConfig(_) => "invalid_config",
            ReconcileError::RowNotFound(_) => "row_not_found",
            ReconcileError::InvalidRowOrder(_) => "invalid_row_order",
            ReconcileError::Cancelled => "cancelled",
            ReconcileError::TimedOut => "timed_out",
            ReconcileError::AlignerFailed(_) => "aligner_failed",
            ReconcileError::AlignerNotFound(_) => "aligner_not_found",
            ReconcileError::FileNotFound(_) => "file_not_found",
            ReconcileError::FastaParse(_) => "fasta_parse",
            ReconcileError::IoError(_) => "io",
            ReconcileError::External(_) => "external",
        }
    }

    /// Whether the user can recover by simply retrying the operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReconcileError::ObjectIsStateLocked
                | ReconcileError::ObjectRemoved
                | ReconcileError::ObjectChanged
                | ReconcileError::Cancelled
                | ReconcileError::TimedOut
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_match_task_protocol() {
        assert_eq!(ReconcileError::ObjectIsStateLocked.kind(), "object_is_state_locked");
        assert_eq!(ReconcileError::ObjectRemoved.kind(), "object_removed");
        assert_eq!(ReconcileError::ObjectIsStateLocked.to_string(), "object_is_state_locked");
        let e = ReconcileError::UnexpectedRowCount { expected: 2, actual: 1 };
        assert_eq!(
            e.to_string(),
            "Unexpected number of rows in the result multiple alignment!"
        );
        assert!(!e.is_recoverable());
        assert!(ReconcileError::ObjectIsStateLocked.is_recoverable());
    }
}
