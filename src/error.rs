//! Error types for ftask
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown task, validation)
//! - 3: Blocked (edit on an externally-owned task)
//! - 4: Operation failed (io, transport, parse)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the ftask CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for ftask operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    // Blocked (exit code 3)
    #[error("Task {id} is read-only: {reason}")]
    ReadOnly { id: String, reason: String },

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed snapshot: {0}")]
    Parse(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::TaskNotFound(_)
            | Error::TemplateNotFound(_) => exit_codes::USER_ERROR,

            Error::ReadOnly { .. } => exit_codes::BLOCKED,

            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::LockFailed(_)
            | Error::Transport(_)
            | Error::Parse(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Whether this error belongs to a feed cycle that should simply be skipped.
    pub fn is_feed_failure(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Parse(_))
    }

    /// Structured details for JSON error output
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::ReadOnly { id, reason } => Some(serde_json::json!({
                "id": id,
                "reason": reason,
            })),
            Error::LockFailed(path) => Some(serde_json::json!({
                "path": path.to_string_lossy(),
            })),
            _ => None,
        }
    }
}

/// Result type alias for ftask operations
pub type Result<T> = std::result::Result<T, Error>;
