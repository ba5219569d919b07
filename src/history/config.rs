//! History configuration.

use std::path::PathBuf;

use crate::history::api::{HistoryError, HistoryResult};
use crate::loader::{LoadOptions, DEFAULT_BATCH_SIZE, DEFAULT_CAPACITY};
use crate::source::LogRequest;

/// History configuration options.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Path inside the repository.
    pub repo_path: PathBuf,
    /// Where cache files go; the source decides when unset.
    pub cache_dir: Option<PathBuf>,
    /// Try the on-disk cache before running git.
    pub use_cache: bool,
    /// Revisions to show, `HEAD` when empty.
    pub revisions: Vec<String>,
    /// Extra `git log` options.
    pub extra_args: Vec<String>,
    /// Limit history to these paths.
    pub paths: Vec<String>,
    pub max_count: Option<usize>,
    /// Records per channel message while loading.
    pub batch_size: usize,
    /// File lists kept in memory.
    pub file_cache_capacity: usize,
    pub rename_detection: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            cache_dir: None,
            use_cache: true,
            revisions: Vec::new(),
            extra_args: Vec::new(),
            paths: Vec::new(),
            max_count: None,
            batch_size: DEFAULT_BATCH_SIZE,
            file_cache_capacity: DEFAULT_CAPACITY,
            rename_detection: true,
        }
    }
}

impl HistoryConfig {
    /// Create a new configuration for the repository at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: path.into(),
            ..Default::default()
        }
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn use_cache(mut self, value: bool) -> Self {
        self.use_cache = value;
        self
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revisions.push(revision.into());
        self
    }

    pub fn extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn max_count(mut self, count: usize) -> Self {
        self.max_count = Some(count);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn file_cache_capacity(mut self, capacity: usize) -> Self {
        self.file_cache_capacity = capacity;
        self
    }

    pub fn rename_detection(mut self, value: bool) -> Self {
        self.rename_detection = value;
        self
    }

    pub fn validate(&self) -> HistoryResult<()> {
        if self.batch_size == 0 {
            return Err(HistoryError::InvalidConfig("batch size must be positive".into()));
        }
        if self.file_cache_capacity == 0 {
            return Err(HistoryError::InvalidConfig(
                "file cache capacity must be positive".into(),
            ));
        }
        if self.max_count == Some(0) {
            return Err(HistoryError::InvalidConfig("max count must be positive".into()));
        }
        Ok(())
    }

    pub fn log_request(&self) -> LogRequest {
        LogRequest {
            revisions: self.revisions.clone(),
            paths: self.paths.clone(),
            max_count: self.max_count,
            extra_args: self.extra_args.clone(),
        }
    }

    /// Options for one load. A refresh drops the graph and skips the cache.
    pub fn load_options(&self, refresh: bool) -> LoadOptions {
        LoadOptions {
            request: self.log_request(),
            batch_size: self.batch_size,
            // a limited view is not what the cache holds
            use_cache: self.use_cache && !refresh && self.caches_full_view(),
            cache_dir: self.cache_dir.clone(),
            reset: refresh,
        }
    }

    /// The cache only ever holds the default `HEAD` history.
    pub(crate) fn caches_full_view(&self) -> bool {
        self.revisions.is_empty()
            && self.paths.is_empty()
            && self.max_count.is_none()
            && self.extra_args.is_empty()
    }
}
