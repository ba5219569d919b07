//! incremental loading and caching
//!
//! - `loader`: streams `git log` into a shared graph on a worker thread
//! - `cache`: versioned on-disk snapshot of a finished load
//! - `files`: LRU of per-revision file lists

mod cache;
mod error;
mod files;
#[allow(clippy::module_inception)]
mod loader;

pub use cache::{CachedHistory, HistoryCache, FORMAT_VERSION};
pub use error::{CacheError, CacheResult, LoadError, LoadResult};
pub use files::{FileChangeCache, FileChangeKey, FileChanges, PathPattern, DEFAULT_CAPACITY};
pub use loader::{
    CancelToken, LoadHandle, LoadOptions, LoadOutcome, LoadState, Loader, StartOutcome,
    DEFAULT_BATCH_SIZE,
};
