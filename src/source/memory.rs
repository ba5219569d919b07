//! In-memory history source for tests.

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::DateTime;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::graph::{CommitId, CommitRecord, RefRecord, Signature};
use crate::parser::RECORD_SEPARATOR;
use crate::source::error::{ToolError, ToolResult};
use crate::source::{DiffRequest, HistorySource, KillSwitch, LogRequest, LogStream};

/// identifier whose hex form is `n` zero padded
pub(crate) fn test_id(n: u32) -> CommitId {
    CommitId::from_hex(&format!("{:040x}", n)).unwrap()
}

pub(crate) fn commit(n: u32, parents: &[u32]) -> CommitRecord {
    CommitRecord {
        id: test_id(n),
        parents: parents.iter().map(|p| test_id(*p)).collect(),
        boundary: false,
        author: Signature::new("Test", "test@example.com"),
        committer: Signature::new("Test", "test@example.com"),
        author_date: DateTime::from_timestamp(1_700_000_000 + i64::from(n), 0).unwrap(),
        short_log: format!("commit {}", n),
        long_log: String::new(),
    }
}

/// one record as `git log` prints it, without the separator
pub(crate) fn log_record(record: &CommitRecord) -> String {
    let mut header = format!("{}{}", if record.boundary { '-' } else { '>' }, record.id);
    for parent in &record.parents {
        header.push(' ');
        header.push_str(&parent.to_string());
    }
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        header,
        record.author,
        record.committer,
        record.author_date.timestamp(),
        record.short_log,
        record.long_log
    )
}

/// a whole `git log -z` stream
pub(crate) fn log_text(records: &[CommitRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.extend_from_slice(log_record(record).as_bytes());
    }
    out
}

/// Reader fed chunk by chunk from a channel; ends when the sender drops.
pub(crate) struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    chunk: Cursor<Vec<u8>>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.chunk.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            match self.rx.recv() {
                Ok(next) => self.chunk = Cursor::new(next),
                Err(_) => return Ok(0),
            }
        }
    }
}

enum LogData {
    Bytes(Vec<u8>),
    Gated(Option<Receiver<Vec<u8>>>),
    Failing,
}

pub(crate) struct MemorySource {
    identity: String,
    cache_dir: Option<PathBuf>,
    head: Mutex<Option<CommitId>>,
    refs: Mutex<Vec<RefRecord>>,
    log: Mutex<LogData>,
    resolves: HashMap<String, CommitId>,
    diffs: HashMap<(CommitId, Option<CommitId>, bool), String>,
    pickaxes: HashMap<(String, bool), Vec<CommitId>>,
    /// kill switch of the most recent log stream
    last_stream: Mutex<Option<KillSwitch>>,
    pub(crate) log_calls: AtomicUsize,
    pub(crate) diff_calls: AtomicUsize,
}

impl MemorySource {
    pub(crate) fn new() -> Self {
        Self {
            identity: "memory".to_string(),
            cache_dir: None,
            head: Mutex::new(None),
            refs: Mutex::new(Vec::new()),
            log: Mutex::new(LogData::Bytes(Vec::new())),
            resolves: HashMap::new(),
            diffs: HashMap::new(),
            pickaxes: HashMap::new(),
            last_stream: Mutex::new(None),
            log_calls: AtomicUsize::new(0),
            diff_calls: AtomicUsize::new(0),
        }
    }

    /// serve these records, newest first; the first one becomes HEAD
    pub(crate) fn with_commits(self, records: &[CommitRecord]) -> Self {
        self.set_commits(records);
        self
    }

    pub(crate) fn set_commits(&self, records: &[CommitRecord]) {
        *self.head.lock() = records.first().map(|r| r.id);
        *self.log.lock() = LogData::Bytes(log_text(records));
    }

    pub(crate) fn with_refs(self, refs: Vec<RefRecord>) -> Self {
        *self.refs.lock() = refs;
        self
    }

    pub(crate) fn with_resolve(mut self, name: &str, id: CommitId) -> Self {
        self.resolves.insert(name.to_string(), id);
        self
    }

    pub(crate) fn with_diff(mut self, id: CommitId, diff_to: Option<CommitId>, text: &str) -> Self {
        self.diffs.insert((id, diff_to, false), text.to_string());
        self
    }

    pub(crate) fn with_merge_diff(mut self, id: CommitId, text: &str) -> Self {
        self.diffs.insert((id, None, true), text.to_string());
        self
    }

    /// revisions whose diff matches `exp`
    pub(crate) fn with_pickaxe(mut self, exp: &str, regex: bool, ids: Vec<CommitId>) -> Self {
        self.pickaxes.insert((exp.to_string(), regex), ids);
        self
    }

    pub(crate) fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// The next log call streams whatever is sent on the returned channel.
    pub(crate) fn gated(self) -> (Self, Sender<Vec<u8>>) {
        let (tx, rx) = unbounded();
        *self.log.lock() = LogData::Gated(Some(rx));
        (self, tx)
    }

    pub(crate) fn failing_log(self) -> Self {
        *self.log.lock() = LogData::Failing;
        self
    }

    pub(crate) fn last_kill_switch(&self) -> Option<KillSwitch> {
        self.last_stream.lock().clone()
    }

    pub(crate) fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn diff_calls(&self) -> usize {
        self.diff_calls.load(Ordering::SeqCst)
    }
}

impl HistorySource for MemorySource {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.clone()
    }

    fn head(&self) -> ToolResult<Option<CommitId>> {
        Ok(*self.head.lock())
    }

    fn references(&self) -> ToolResult<Vec<RefRecord>> {
        Ok(self.refs.lock().clone())
    }

    fn log(&self, _request: &LogRequest) -> ToolResult<LogStream> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        let stream = match &mut *self.log.lock() {
            LogData::Bytes(bytes) => LogStream::from_reader(Cursor::new(bytes.clone())),
            LogData::Gated(rx) => {
                let rx = rx.take().unwrap_or_else(|| unbounded().1);
                LogStream::from_reader(ChannelReader {
                    rx,
                    chunk: Cursor::new(Vec::new()),
                })
            }
            LogData::Failing => {
                return Err(ToolError::exit("git log", Some(128), "fatal: bad object"))
            }
        };
        *self.last_stream.lock() = Some(stream.kill_switch());
        Ok(stream)
    }

    fn diff_tree(&self, request: &DiffRequest) -> ToolResult<String> {
        self.diff_calls.fetch_add(1, Ordering::SeqCst);
        let key = (request.id, request.diff_to, request.all_merge_files);
        self.diffs
            .get(&key)
            .cloned()
            .ok_or_else(|| ToolError::exit("git diff-tree", Some(128), "fatal: bad object"))
    }

    fn resolve(&self, name: &str) -> ToolResult<Option<CommitId>> {
        Ok(self.resolves.get(name).copied())
    }

    fn pickaxe(&self, ids: &[CommitId], exp: &str, regex: bool) -> ToolResult<Vec<CommitId>> {
        let matching = self
            .pickaxes
            .get(&(exp.to_string(), regex))
            .cloned()
            .unwrap_or_default();
        Ok(ids.iter().filter(|id| matching.contains(id)).copied().collect())
    }
}
