//! Error types for diplomagen.
//!
//! Library crates use [`DiplomaGenError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::BlobKind;

/// Top-level error type for all diplomagen operations.
#[derive(Debug, thiserror::Error)]
pub enum DiplomaGenError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error (includes missing template assets).
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Source workbook is unreadable or lacks a required sheet.
    #[error("spreadsheet error: {message}")]
    Spreadsheet { message: String },

    /// Database or blob storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A blob expected by the pipeline was never stored (or was swept).
    #[error("no {kind} blob stored for task {task_id}")]
    BlobNotFound { task_id: String, kind: BlobKind },

    /// A renderer failed on one batch.
    #[error("render error: {message}")]
    Render { message: String },

    /// The merge found a failure outcome in a batch slot.
    #[error("batch {index} failed to render: {reason}")]
    BatchFailed { index: usize, reason: String },

    /// The merge was asked to finish with empty slots.
    #[error("merge incomplete: no outcome for batches {missing:?}")]
    IncompleteMerge { missing: Vec<usize> },

    /// No task registered under the given id.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A second reader tried to drain a task's progress stream.
    #[error("progress stream for task {0} already has a reader")]
    AlreadyAttached(String),

    /// The task was cancelled (consumer withdrew or shutdown requested).
    #[error("task cancelled")]
    Cancelled,

    /// Data validation error (invalid parameters, out-of-range indices, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Serialization of an intermediate payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DiplomaGenError>;

impl DiplomaGenError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a spreadsheet error from any displayable message.
    pub fn spreadsheet(msg: impl Into<String>) -> Self {
        Self::Spreadsheet {
            message: msg.into(),
        }
    }

    /// Create a render error from any displayable message.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error came from cancellation rather than a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
