//! History browsing API
//!
//! Ties a [`HistorySource`](crate::source::HistorySource), the shared
//! revision graph, the loader and the file-change cache together behind
//! one handle.
//!
//! ```text
//!   HistoryConfig ──► History ──► Loader ──► Graph
//!                        │
//!                        └──► FileChangeCache ◄── diff-tree
//! ```

mod api;
mod config;

pub use api::{History, HistoryError, HistoryResult};
pub use config::HistoryConfig;
