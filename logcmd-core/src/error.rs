//! Error types for logcmd-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the logcmd-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Regex compile error
    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad user-supplied input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The registered path is not an existing directory
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Project not found by id or path
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(i64),

    /// A conditional task transition matched no active row
    #[error("task state changed")]
    TaskStateChanged,

    /// The child process could not be started
    #[error("failed to start command: {0}")]
    Spawn(String),

    /// Signal handler installation failed
    #[error("signal handler error: {0}")]
    Signal(String),

    /// The operation was cancelled
    #[error("cancelled")]
    Cancelled,
}

/// Result type alias for logcmd-core
pub type Result<T> = std::result::Result<T, Error>;
