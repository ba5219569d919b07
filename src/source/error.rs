//! External tool errors.

use thiserror::Error;

/// Result type for calls into the history source.
pub type ToolResult<T> = Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    /// the tool could not be started
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// the tool ran and reported failure
    #[error("{command} exited with status {status}: {stderr}")]
    Exit {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// a hash printed by the tool could not be parsed
    #[error("invalid identifier {0:?}")]
    InvalidId(String),
}

impl ToolError {
    pub fn exit(command: impl Into<String>, status: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::Exit {
            command: command.into(),
            status: status.unwrap_or(-1),
            stderr: stderr.into(),
        }
    }

    /// the same call may succeed later, e.g. a locked index
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::Exit { stderr, .. } => stderr.contains(".lock"),
            ToolError::Git(e) => e.code() == git2::ErrorCode::Locked,
            _ => false,
        }
    }
}
