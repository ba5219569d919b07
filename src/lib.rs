//! revgraph - revision graph core for git history browsers
//!
//! This crate loads the history of a git repository, keeps the revisions
//! in load order, lays out the branch lanes of every row and answers the
//! reference queries a history view needs (nearest tags, descendant
//! branches, per-revision file lists).
//!
//! # Example
//!
//! ```no_run
//! use revgraph::history::{History, HistoryConfig};
//!
//! let history = History::open(HistoryConfig::new(".")).unwrap();
//! history.load_blocking().unwrap();
//! for rev in history.snapshot().take(10) {
//!     println!("{} {}", rev.id.short(), rev.short_log);
//! }
//! ```

pub mod graph;
pub mod history;
pub mod loader;
pub mod parser;
pub mod source;

pub use graph::{CommitId, Direction, Graph, LaneType, RefType, Revision};
pub use history::{History, HistoryConfig, HistoryError, HistoryResult};
