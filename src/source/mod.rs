//! the history source seam
//!
//! Everything the core needs from outside the process goes through
//! [`HistorySource`]: the `git log` stream, per-commit diffs, references
//! and name resolution. [`GitSource`] talks to a real repository; tests use
//! an in-memory double.

mod error;
mod git;
#[cfg(test)]
pub(crate) mod memory;

use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::graph::{CommitId, RefRecord};
use crate::parser::LogRecords;

pub use error::{ToolError, ToolResult};
pub use git::GitSource;

/// what to pass to `git log`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRequest {
    /// revision arguments, `HEAD` when empty
    pub revisions: Vec<String>,
    /// limit history to these paths
    pub paths: Vec<String>,
    pub max_count: Option<usize>,
    /// extra options inserted before the revisions
    pub extra_args: Vec<String>,
}

/// which diff to compute for one revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRequest {
    pub id: CommitId,
    /// compare against this revision instead of the parents
    pub diff_to: Option<CommitId>,
    /// diff a merge against every parent
    pub all_merge_files: bool,
    pub rename_detection: bool,
}

impl DiffRequest {
    pub fn new(id: CommitId) -> Self {
        Self {
            id,
            diff_to: None,
            all_merge_files: false,
            rename_detection: true,
        }
    }
}

/// The external collaborator providing repository data.
pub trait HistorySource: Send + Sync {
    /// stable name of the repository, keys the on-disk cache
    fn identity(&self) -> String;

    /// where the on-disk cache lives, if anywhere
    fn cache_dir(&self) -> Option<PathBuf> {
        None
    }

    /// the checked out revision, `None` for an unborn branch
    fn head(&self) -> ToolResult<Option<CommitId>>;

    fn references(&self) -> ToolResult<Vec<RefRecord>>;

    /// start streaming `git log -z` output
    fn log(&self, request: &LogRequest) -> ToolResult<LogStream>;

    /// raw `git diff-tree` output
    fn diff_tree(&self, request: &DiffRequest) -> ToolResult<String>;

    /// Resolve a possibly abbreviated name. Unknown names are `Ok(None)`.
    fn resolve(&self, name: &str) -> ToolResult<Option<CommitId>>;

    /// Those of `ids` whose diff changes the number of occurrences of
    /// `exp` (`git diff-tree -S`), as an extended regex when `regex` is set.
    fn pickaxe(&self, ids: &[CommitId], exp: &str, regex: bool) -> ToolResult<Vec<CommitId>>;
}

/// a child process producing a stream
struct Process {
    command: String,
    child: Arc<Mutex<Child>>,
    stderr: Option<JoinHandle<String>>,
}

/// Output of a log call: a byte stream plus, for real processes, the
/// handle needed to stop it and collect its exit status.
pub struct LogStream {
    reader: Option<Box<dyn Read + Send>>,
    process: Option<Process>,
    killed: Arc<AtomicBool>,
}

impl LogStream {
    /// a stream with no process behind it
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Some(Box::new(reader)),
            process: None,
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wrap a spawned child whose stdout is already taken as `reader`.
    pub(crate) fn from_child(
        command: String,
        child: Child,
        reader: impl Read + Send + 'static,
        stderr: Option<JoinHandle<String>>,
    ) -> Self {
        Self {
            reader: Some(Box::new(reader)),
            process: Some(Process {
                command,
                child: Arc::new(Mutex::new(child)),
                stderr,
            }),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take the record iterator. Later calls yield an empty stream.
    pub fn records(&mut self) -> LogRecords<BufReader<Box<dyn Read + Send>>> {
        let reader = self
            .reader
            .take()
            .unwrap_or_else(|| Box::new(std::io::empty()));
        LogRecords::new(BufReader::new(reader))
    }

    pub fn kill_switch(&self) -> KillSwitch {
        KillSwitch {
            child: self.process.as_ref().map(|p| Arc::clone(&p.child)),
            killed: Arc::clone(&self.killed),
        }
    }

    /// Reap the process. A killed process is not an error.
    pub fn finish(self) -> ToolResult<()> {
        let Some(process) = self.process else {
            return Ok(());
        };
        let status = process.child.lock().wait()?;
        let stderr = process
            .stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() || self.killed.load(Ordering::SeqCst) {
            return Ok(());
        }
        Err(ToolError::exit(process.command, status.code(), stderr.trim()))
    }
}

/// Stops a running stream from another thread.
#[derive(Clone)]
pub struct KillSwitch {
    child: Option<Arc<Mutex<Child>>>,
    killed: Arc<AtomicBool>,
}

impl KillSwitch {
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(child) = &self.child {
            if let Err(e) = child.lock().kill() {
                tracing::debug!(error = %e, "log process already gone");
            }
        }
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}
