//! Incremental, cancellable history loading.
//!
//! ```text
//!   git log ──► producer thread ──(bounded channel)──► worker ──► Graph
//!               parse records        batches                 one write lock
//!                                                            per record
//! ```
//!
//! The worker is the only writer of the graph. Readers may look at the
//! graph at any time and see a prefix of the history, never a half-built
//! revision. A load moves through
//! `Idle → Loading → Completed | Cancelled | Failed`; a finished load
//! accepts a new start like `Idle` does.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use ulid::Ulid;

use crate::graph::{Appended, CommitId, CommitRecord, RefIndex, SharedGraph};
use crate::loader::cache::HistoryCache;
use crate::loader::error::{LoadError, LoadResult};
use crate::loader::files::FileChangeCache;
use crate::parser::ParseResult;
use crate::source::{HistorySource, LogRequest, LogStream};

/// batches in flight between producer and worker
const CHANNEL_DEPTH: usize = 4;

pub const DEFAULT_BATCH_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Completed,
    Cancelled,
    Failed,
}

impl LoadState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub request: LogRequest,
    /// records per channel message
    pub batch_size: usize,
    pub use_cache: bool,
    pub cache_dir: Option<PathBuf>,
    /// drop the current graph first
    pub reset: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            request: LogRequest::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            use_cache: false,
            cache_dir: None,
            reset: false,
        }
    }
}

/// summary of one finished load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub id: Ulid,
    pub state: LoadState,
    /// revisions in the graph afterwards
    pub revisions: usize,
    /// malformed records left out
    pub skipped: usize,
    pub from_cache: bool,
    /// HEAD when the load started
    pub head: Option<CommitId>,
    pub elapsed: Duration,
}

pub enum StartOutcome {
    Started(LoadHandle),
    /// a load is running; one refresh will follow it
    Queued,
}

impl StartOutcome {
    pub fn handle(self) -> Option<LoadHandle> {
        match self {
            Self::Started(handle) => Some(handle),
            Self::Queued => None,
        }
    }
}

/// Cooperative cancellation shared by the handle, the worker and the
/// producer.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl CancelToken {
    fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // a full channel means the worker was already woken
        self.wake_tx.try_send(()).ok();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct LoadHandle {
    id: Ulid,
    token: CancelToken,
    worker: JoinHandle<LoadResult<LoadOutcome>>,
}

impl LoadHandle {
    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the load, and any refresh queued behind it, is over.
    pub fn wait(self) -> LoadResult<LoadOutcome> {
        self.worker
            .join()
            .map_err(|_| LoadError::Aborted(self.id.to_string()))?
    }
}

enum LoadEvent {
    Batch(Vec<CommitRecord>),
    Finished { skipped: usize },
    Failed(LoadError),
}

struct Status {
    state: LoadState,
    current: Option<CancelToken>,
    /// at most one refresh waits behind the running load
    pending: Option<LoadOptions>,
    last: Option<LoadOutcome>,
}

/// Owns the loading of one graph. Cheap to clone.
#[derive(Clone)]
pub struct Loader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    graph: SharedGraph,
    files: Arc<FileChangeCache>,
    source: Arc<dyn HistorySource>,
    status: Mutex<Status>,
}

impl Loader {
    pub fn new(
        graph: SharedGraph,
        files: Arc<FileChangeCache>,
        source: Arc<dyn HistorySource>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                graph,
                files,
                source,
                status: Mutex::new(Status {
                    state: LoadState::Idle,
                    current: None,
                    pending: None,
                    last: None,
                }),
            }),
        }
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.inner.graph
    }

    /// Start a load, or queue it behind the running one.
    pub fn start(&self, options: LoadOptions) -> StartOutcome {
        let mut status = self.inner.status.lock();
        if status.state == LoadState::Loading {
            if status.pending.is_some() {
                tracing::debug!("refresh already queued");
            }
            status.pending = Some(options);
            return StartOutcome::Queued;
        }

        let id = Ulid::new();
        let token = CancelToken::new();
        status.state = LoadState::Loading;
        status.current = Some(token.clone());
        drop(status);

        let inner = Arc::clone(&self.inner);
        let worker_token = token.clone();
        let worker = thread::spawn(move || inner.run(id, options, worker_token));

        StartOutcome::Started(LoadHandle { id, token, worker })
    }

    /// Cancel the running load and drop a queued refresh.
    pub fn cancel(&self) -> bool {
        let mut status = self.inner.status.lock();
        status.pending = None;
        match &status.current {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> LoadState {
        self.inner.status.lock().state
    }

    pub fn is_loading(&self) -> bool {
        self.state() == LoadState::Loading
    }

    pub fn pending_refresh(&self) -> bool {
        self.inner.status.lock().pending.is_some()
    }

    pub fn last_outcome(&self) -> Option<LoadOutcome> {
        self.inner.status.lock().last.clone()
    }
}

impl LoaderInner {
    fn run(&self, mut id: Ulid, mut options: LoadOptions, token: CancelToken) -> LoadResult<LoadOutcome> {
        loop {
            let started = Instant::now();
            let result = self.load_once(id, &options, &token, started);

            let state = match &result {
                Ok(outcome) => outcome.state,
                Err(e) => {
                    tracing::error!(load_id = %id, error = %e, "load failed");
                    self.graph.write().close_lanes();
                    LoadState::Failed
                }
            };

            let mut status = self.status.lock();
            if state != LoadState::Cancelled {
                if let Some(next) = status.pending.take() {
                    drop(status);
                    id = Ulid::new();
                    options = next;
                    tracing::info!(load_id = %id, "starting queued refresh");
                    continue;
                }
            }
            status.pending = None;
            status.state = state;
            status.current = None;
            status.last = result.as_ref().ok().cloned();
            return result;
        }
    }

    fn load_once(
        &self,
        id: Ulid,
        options: &LoadOptions,
        token: &CancelToken,
        started: Instant,
    ) -> LoadResult<LoadOutcome> {
        tracing::info!(load_id = %id, reset = options.reset, "loading history");

        let refs = RefIndex::from_records(self.source.references()?);
        let head = self.source.head()?;
        {
            let mut graph = self.graph.write();
            if options.reset {
                graph.reset();
            }
            graph.set_refs(refs);
        }

        let cached = if options.use_cache {
            self.load_cache(id, options, token, head, started)
        } else {
            None
        };
        let outcome = match cached {
            Some(outcome) => outcome,
            None => {
                // every stream is a full history; known rows would keep stale lanes
                let mut graph = self.graph.write();
                if !graph.is_empty() {
                    graph.reset();
                }
                drop(graph);
                self.load_stream(id, options, token, started)?
            }
        };
        Ok(LoadOutcome { head, ..outcome })
    }

    /// Fill the graph from the cache file. `None` means fall back to git.
    fn load_cache(
        &self,
        id: Ulid,
        options: &LoadOptions,
        token: &CancelToken,
        head: Option<CommitId>,
        started: Instant,
    ) -> Option<LoadOutcome> {
        let dir = options
            .cache_dir
            .clone()
            .or_else(|| self.source.cache_dir())?;
        let cached = match HistoryCache::new(&dir, &self.source.identity()).and_then(|c| c.load(head)) {
            Ok(cached) => cached,
            Err(e) if e.is_cache_miss() => {
                tracing::debug!(load_id = %id, reason = %e, "cache not usable");
                return None;
            }
            Err(e) => {
                tracing::warn!(load_id = %id, error = %e, "could not read cache");
                return None;
            }
        };

        self.graph.write().reset();
        for record in cached.revisions {
            if token.is_cancelled() {
                return Some(self.cancelled(id, started, true));
            }
            self.graph.write().append(record);
        }
        for (key, changes) in cached.files {
            self.files.insert(key, changes);
        }
        self.files.mark_clean();

        let revisions = self.graph.read().len();
        tracing::info!(
            load_id = %id,
            revisions,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded history from cache"
        );
        Some(LoadOutcome {
            id,
            state: LoadState::Completed,
            revisions,
            skipped: 0,
            from_cache: true,
            head: None,
            elapsed: started.elapsed(),
        })
    }

    fn load_stream(
        &self,
        id: Ulid,
        options: &LoadOptions,
        token: &CancelToken,
        started: Instant,
    ) -> LoadResult<LoadOutcome> {
        let mut stream = self.source.log(&options.request)?;
        let kill = stream.kill_switch();
        let records = stream.records();
        let (tx, rx) = bounded(CHANNEL_DEPTH);
        let batch_size = options.batch_size.max(1);
        let producer_token = token.clone();
        let producer = thread::spawn(move || produce(records, stream, tx, batch_size, producer_token));

        let mut skipped = 0;
        loop {
            select! {
                recv(rx) -> event => match event {
                    Ok(LoadEvent::Batch(batch)) => {
                        for record in batch {
                            if token.is_cancelled() {
                                kill.kill();
                                return Ok(self.cancelled(id, started, false));
                            }
                            if let Appended::Replaced(idx) = self.graph.write().append(record) {
                                tracing::debug!(load_id = %id, idx, "revision loaded twice");
                            }
                        }
                    }
                    Ok(LoadEvent::Finished { skipped: count }) => {
                        skipped = count;
                        break;
                    }
                    Ok(LoadEvent::Failed(e)) => return Err(e),
                    // producer died without a final event
                    Err(_) => return Err(LoadError::Aborted(id.to_string())),
                },
                recv(token.wake_rx) -> _ => {
                    // the producer may be blocked on a read until git prints again
                    kill.kill();
                    return Ok(self.cancelled(id, started, false));
                }
            }
        }
        if producer.join().is_err() {
            tracing::warn!(load_id = %id, "log producer panicked after finishing");
        }

        let revisions = self.graph.read().len();
        tracing::info!(
            load_id = %id,
            revisions,
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "history loaded"
        );
        Ok(LoadOutcome {
            id,
            state: LoadState::Completed,
            revisions,
            skipped,
            from_cache: false,
            head: None,
            elapsed: started.elapsed(),
        })
    }

    fn cancelled(&self, id: Ulid, started: Instant, from_cache: bool) -> LoadOutcome {
        let (revisions, released) = {
            let mut graph = self.graph.write();
            let released = graph.close_lanes();
            (graph.len(), released)
        };
        tracing::info!(load_id = %id, revisions, released, "load cancelled");
        LoadOutcome {
            id,
            state: LoadState::Cancelled,
            revisions,
            skipped: 0,
            from_cache,
            head: None,
            elapsed: started.elapsed(),
        }
    }
}

/// Producer side: parse the stream and ship batches until it ends, the
/// load is cancelled or nobody listens anymore.
fn produce(
    records: impl Iterator<Item = ParseResult<CommitRecord>>,
    stream: LogStream,
    tx: Sender<LoadEvent>,
    batch_size: usize,
    token: CancelToken,
) {
    let kill = stream.kill_switch();
    let mut batch = Vec::with_capacity(batch_size);
    let mut skipped = 0;

    for result in records {
        if token.is_cancelled() {
            break;
        }
        match result {
            Ok(record) => {
                batch.push(record);
                if batch.len() >= batch_size
                    && tx.send(LoadEvent::Batch(std::mem::take(&mut batch))).is_err()
                {
                    tracing::debug!("load abandoned, stopping log");
                    token.cancel();
                    break;
                }
            }
            Err(e) if e.is_fatal() => {
                kill.kill();
                if let Err(e) = stream.finish() {
                    tracing::debug!(error = %e, "log process failed after read error");
                }
                tx.send(LoadEvent::Failed(LoadError::Stream(e.to_string()))).ok();
                return;
            }
            Err(e) => {
                skipped += 1;
                tracing::warn!(error = %e, "skipping malformed record");
            }
        }
    }

    if token.is_cancelled() {
        kill.kill();
        if let Err(e) = stream.finish() {
            tracing::debug!(error = %e, "cancelled log process");
        }
        return;
    }
    if !batch.is_empty() && tx.send(LoadEvent::Batch(batch)).is_err() {
        kill.kill();
        stream.finish().ok();
        return;
    }
    let event = match stream.finish() {
        Ok(()) => LoadEvent::Finished { skipped },
        Err(e) => LoadEvent::Failed(e.into()),
    };
    tx.send(event).ok();
}
