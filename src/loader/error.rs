//! Loader and cache errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::source::ToolError;

/// Result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("history source error: {0}")]
    Tool(#[from] ToolError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// the stream itself broke, as opposed to one bad record
    #[error("stream error: {0}")]
    Stream(String),

    /// the worker thread went away without reporting
    #[error("load {0} aborted")]
    Aborted(String),
}

impl LoadError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LoadError::Tool(e) => e.is_retryable(),
            LoadError::Cache(e) => e.is_cache_miss(),
            LoadError::Stream(_) | LoadError::Aborted(_) => false,
        }
    }
}

/// Reasons a cache file could not be used. None of them is fatal: the
/// caller falls back to a full load.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cache at {0}")]
    Missing(PathBuf),

    #[error("not a history cache: {0}")]
    Format(String),

    #[error("cache format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// written for another repository or another HEAD
    #[error("stale cache: {0}")]
    Stale(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

impl CacheError {
    /// the cache is merely unusable, a full load will do
    pub fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            CacheError::Missing(_)
                | CacheError::Format(_)
                | CacheError::VersionMismatch { .. }
                | CacheError::Stale(_)
        )
    }
}
