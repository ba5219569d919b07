//! History API - the query surface used by front-ends.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::{
    CommitId, Direction, Graph, LaneType, NamedRef, RefName, RefType, Revision, SharedGraph,
    Snapshot,
};
use crate::history::config::HistoryConfig;
use crate::loader::{
    CacheError, FileChangeCache, FileChangeKey, FileChanges, HistoryCache, LoadError,
    LoadOutcome, LoadState, Loader, PathPattern, StartOutcome,
};
use crate::parser::parse_diff;
use crate::source::{DiffRequest, GitSource, HistorySource, ToolError};

/// Result type for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history source error: {0}")]
    Tool(#[from] ToolError),

    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid file pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// another load is running
    #[error("a load is already running")]
    Busy,

    #[error("history not loaded")]
    NotLoaded,
}

impl HistoryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            HistoryError::Tool(e) => e.is_retryable(),
            HistoryError::Load(e) => e.is_retryable(),
            HistoryError::Busy => true,
            _ => false,
        }
    }
}

/// The revision graph of one repository together with its loader and
/// file-change cache.
///
/// All queries are synchronous and only look at what is loaded so far,
/// except `identifier_for` and the file-change queries which may call
/// out to the source.
pub struct History {
    config: HistoryConfig,
    source: Arc<dyn HistorySource>,
    graph: SharedGraph,
    files: Arc<FileChangeCache>,
    loader: Loader,
}

impl History {
    /// Open the repository at `config.repo_path`.
    pub fn open(config: HistoryConfig) -> HistoryResult<Self> {
        config.validate()?;
        let source = GitSource::open(&config.repo_path)?;
        Ok(Self::with_source(config, Arc::new(source)))
    }

    /// Use any history source, e.g. a test double.
    pub fn with_source(config: HistoryConfig, source: Arc<dyn HistorySource>) -> Self {
        let graph = Graph::new().shared();
        let files = Arc::new(FileChangeCache::new(config.file_cache_capacity));
        let loader = Loader::new(graph.clone(), files.clone(), source.clone());
        Self {
            config,
            source,
            graph,
            files,
            loader,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn graph(&self) -> SharedGraph {
        self.graph.clone()
    }

    pub fn source(&self) -> &dyn HistorySource {
        self.source.as_ref()
    }

    /// Start loading, from the cache when it is usable.
    pub fn load(&self) -> StartOutcome {
        self.loader.start(self.config.load_options(false))
    }

    /// Reload everything from git, dropping what is loaded.
    pub fn refresh(&self) -> StartOutcome {
        self.loader.start(self.config.load_options(true))
    }

    /// Load and wait for the result. Nothing is queued when a load is
    /// already running.
    pub fn load_blocking(&self) -> HistoryResult<LoadOutcome> {
        if self.loader.is_loading() {
            return Err(HistoryError::Busy);
        }
        match self.load() {
            StartOutcome::Started(handle) => Ok(handle.wait()?),
            StartOutcome::Queued => Err(HistoryError::Busy),
        }
    }

    pub fn cancel(&self) -> bool {
        self.loader.cancel()
    }

    pub fn state(&self) -> LoadState {
        self.loader.state()
    }

    pub fn len(&self) -> usize {
        self.graph.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision_at(&self, idx: usize) -> Option<Revision> {
        self.graph.read().revision_at(idx).cloned()
    }

    pub fn revision_by_id(&self, id: &CommitId) -> Option<Revision> {
        self.graph.read().revision(id).cloned()
    }

    pub fn lanes_at(&self, idx: usize) -> Option<Vec<LaneType>> {
        self.graph
            .read()
            .revision_at(idx)
            .map(|rev| rev.lanes().to_vec())
    }

    pub fn refs_for(&self, id: &CommitId) -> Vec<RefName> {
        self.graph.read().refs_for(id)
    }

    pub fn nearest_tags(&self, direction: Direction, id: &CommitId) -> Vec<String> {
        self.graph.write().nearest_tags(direction, id)
    }

    pub fn descendant_branches(&self, id: &CommitId) -> Vec<NamedRef> {
        self.graph.write().descendant_branches(id)
    }

    pub fn children(&self, id: &CommitId) -> Vec<CommitId> {
        self.graph.read().children(id)
    }

    pub fn lane_parent(&self, from: &CommitId, lane: usize) -> Option<CommitId> {
        self.graph.read().lane_parent(from, lane)
    }

    /// Find the revision a name points at. With `allow_abbrev`, names that
    /// are not references are resolved by the source, so abbreviated
    /// hashes work too.
    pub fn identifier_for(
        &self,
        name: &str,
        kind: Option<RefType>,
        allow_abbrev: bool,
    ) -> Option<CommitId> {
        let source = allow_abbrev.then_some(self.source.as_ref());
        self.graph.read().refs().identifier_for(name, kind, source)
    }

    /// Files changed by a revision, against its first parent or against
    /// `diff_to`.
    pub fn file_changes_for(
        &self,
        id: &CommitId,
        diff_to: Option<CommitId>,
    ) -> HistoryResult<Arc<FileChanges>> {
        self.fetch_files(id, diff_to, false)
    }

    /// Files changed by a merge against each of its parents.
    pub fn all_merge_files(&self, id: &CommitId) -> HistoryResult<Arc<FileChanges>> {
        self.fetch_files(id, None, true)
    }

    fn fetch_files(
        &self,
        id: &CommitId,
        diff_to: Option<CommitId>,
        all_merge_files: bool,
    ) -> HistoryResult<Arc<FileChanges>> {
        let key = FileChangeKey::new(*id, diff_to, all_merge_files);
        if let Some(hit) = self.files.get(&key) {
            return Ok(hit);
        }

        let mut request = DiffRequest::new(*id);
        request.all_merge_files = all_merge_files;
        request.rename_detection = self.config.rename_detection;
        request.diff_to = match diff_to {
            Some(other) => Some(other),
            // a plain merge diff is against the first parent
            None if !all_merge_files => self
                .graph
                .read()
                .revision(id)
                .filter(|rev| rev.is_merge())
                .and_then(|rev| rev.parent(0)),
            None => None,
        };

        let text = self.source.diff_tree(&request)?;
        let changes = FileChanges::new(parse_diff(&text));
        tracing::debug!(id = %id, files = changes.len(), "fetched file changes");
        Ok(self.files.insert(key, changes))
    }

    /// Loaded revisions whose cached file lists touch a path matching the
    /// wildcard `pattern`, in load order.
    pub fn file_filter(&self, pattern: &str) -> HistoryResult<Vec<CommitId>> {
        let ids = self.files.file_filter(&PathPattern::new(pattern)?);
        Ok(self.graph.read().store().sort_by_load_order(&ids))
    }

    /// Loaded revisions whose diff adds or removes `exp`, in load order.
    /// With `regex`, `exp` is an extended regular expression.
    pub fn patch_filter(&self, exp: &str, regex: bool) -> HistoryResult<Vec<CommitId>> {
        let ids: Vec<CommitId> = self.graph.read().store().iter().map(|rev| rev.id).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let found = self.source.pickaxe(&ids, exp, regex)?;
        tracing::debug!(exp, regex, matches = found.len(), "patch filter");
        Ok(self.graph.read().store().sort_by_load_order(&found))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.graph.clone())
    }

    /// Persist the loaded history and file lists.
    pub fn save_cache(&self) -> HistoryResult<PathBuf> {
        if !self.config.caches_full_view() {
            return Err(HistoryError::InvalidConfig(
                "limited history views are not cached".into(),
            ));
        }
        if self.loader.is_loading() {
            return Err(HistoryError::Busy);
        }
        let outcome = self
            .loader
            .last_outcome()
            .filter(|o| o.state == LoadState::Completed)
            .ok_or(HistoryError::NotLoaded)?;

        let dir = self
            .config
            .cache_dir
            .clone()
            .or_else(|| self.source.cache_dir())
            .ok_or_else(|| HistoryError::InvalidConfig("no cache directory".into()))?;
        let cache = HistoryCache::new(&dir, &self.source.identity())?;

        let records: Vec<_> = self
            .graph
            .read()
            .store()
            .iter()
            .map(Revision::to_record)
            .collect();
        cache.save(outcome.head, &records, &self.files.entries())?;
        self.files.mark_clean();

        tracing::info!(path = %cache.path().display(), revisions = records.len(), "cache saved");
        Ok(cache.path().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CommitRecord, RefRecord};
    use crate::parser::ChangeStatus;
    use crate::source::memory::{commit, test_id, MemorySource};
    use tempfile::TempDir;

    const A: u32 = 1;
    const B: u32 = 2;
    const C: u32 = 3;
    const D: u32 = 4;

    /// D merges B and C, both children of A
    fn abcd() -> Vec<CommitRecord> {
        vec![commit(D, &[B, C]), commit(B, &[A]), commit(C, &[A]), commit(A, &[])]
    }

    fn source(cache: &TempDir) -> MemorySource {
        MemorySource::new()
            .with_commits(&abcd())
            .with_cache_dir(cache.path())
            .with_refs(vec![
                RefRecord::new(test_id(D), RefType::Branch, "main").current(),
                RefRecord::new(test_id(B), RefType::RemoteBranch, "origin/main"),
                RefRecord::new(test_id(B), RefType::Tag, "v1"),
                RefRecord::new(test_id(C), RefType::Tag, "v2"),
            ])
            .with_resolve("0000002", test_id(B))
            .with_diff(test_id(B), None, "M\tsrc/lib.rs\n")
            .with_diff(test_id(D), Some(test_id(B)), "M\tsrc/Merge.rs\n")
            .with_diff(test_id(C), Some(test_id(A)), "A\tdocs/guide.md\n")
            .with_merge_diff(test_id(D), "M\tsrc/Merge.rs\nA\tdocs/guide.md\n")
    }

    fn loaded(source: Arc<MemorySource>) -> History {
        let history = History::with_source(HistoryConfig::default(), source);
        let outcome = history.load_blocking().unwrap();
        assert_eq!(outcome.state, LoadState::Completed);
        history
    }

    #[test]
    fn test_queries() {
        let dir = TempDir::new().unwrap();
        let history = loaded(Arc::new(source(&dir)));

        assert_eq!(history.len(), 4);
        assert_eq!(history.revision_at(0).unwrap().id, test_id(D));
        assert_eq!(history.revision_by_id(&test_id(C)).unwrap().order_idx(), 2);
        assert_eq!(
            history.lanes_at(0).unwrap(),
            vec![LaneType::MergeForkL, LaneType::HeadR]
        );
        assert!(history.lanes_at(9).is_none());
        assert_eq!(history.children(&test_id(A)), vec![test_id(B), test_id(C)]);
        assert_eq!(
            history.refs_for(&test_id(B)),
            vec![
                RefName::new(RefType::RemoteBranch, "origin/main"),
                RefName::new(RefType::Tag, "v1"),
            ]
        );
    }

    #[test]
    fn test_near_refs() {
        let dir = TempDir::new().unwrap();
        let history = loaded(Arc::new(source(&dir)));

        assert_eq!(
            history.nearest_tags(Direction::Ascending, &test_id(D)),
            vec!["v1", "v2"]
        );
        assert_eq!(
            history.nearest_tags(Direction::Descending, &test_id(A)),
            vec!["v1", "v2"]
        );
        let names: Vec<String> = history
            .descendant_branches(&test_id(A))
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["main", "origin/main"]);
    }

    #[test]
    fn test_lane_parent() {
        let dir = TempDir::new().unwrap();
        let history = loaded(Arc::new(source(&dir)));

        // C's line was opened by D's second parent
        assert_eq!(history.lane_parent(&test_id(C), 1), Some(test_id(C)));
        assert_eq!(history.lane_parent(&test_id(B), 0), Some(test_id(B)));
        assert_eq!(history.lane_parent(&test_id(D), 0), None);
    }

    #[test]
    fn test_identifier_for() {
        let dir = TempDir::new().unwrap();
        let history = loaded(Arc::new(source(&dir)));

        assert_eq!(history.identifier_for("main", None, false), Some(test_id(D)));
        assert_eq!(
            history.identifier_for("v2", Some(RefType::Tag), false),
            Some(test_id(C))
        );
        assert_eq!(history.identifier_for("v2", Some(RefType::Branch), false), None);
        assert_eq!(history.identifier_for("0000002", None, false), None);
        assert_eq!(history.identifier_for("0000002", None, true), Some(test_id(B)));
    }

    #[test]
    fn test_file_changes_cached() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(source(&dir));
        let history = loaded(source.clone());

        let files = history.file_changes_for(&test_id(B), None).unwrap();
        assert_eq!(files.paths(), vec!["src/lib.rs"]);
        history.file_changes_for(&test_id(B), None).unwrap();
        assert_eq!(source.diff_calls(), 1);

        // a merge is diffed against its first parent
        let merge = history.file_changes_for(&test_id(D), None).unwrap();
        assert_eq!(merge.paths(), vec!["src/Merge.rs"]);
        let all = history.all_merge_files(&test_id(D)).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.count(ChangeStatus::Added), 1);

        let pair = history.file_changes_for(&test_id(C), Some(test_id(A))).unwrap();
        assert_eq!(pair.paths(), vec!["docs/guide.md"]);

        let missing = history.file_changes_for(&test_id(A), None);
        assert!(matches!(missing, Err(HistoryError::Tool(_))));
    }

    #[test]
    fn test_file_filter() {
        let dir = TempDir::new().unwrap();
        let history = loaded(Arc::new(source(&dir)));
        history.all_merge_files(&test_id(D)).unwrap();
        history.file_changes_for(&test_id(B), None).unwrap();

        assert_eq!(history.file_filter("SRC/").unwrap(), vec![test_id(D), test_id(B)]);
        assert_eq!(history.file_filter("guide").unwrap(), vec![test_id(D)]);
        assert_eq!(history.file_filter("src/*.rs").unwrap(), vec![test_id(D), test_id(B)]);
        assert_eq!(history.file_filter("src/m*.RS").unwrap(), vec![test_id(D)]);
        assert!(matches!(
            history.file_filter("[src"),
            Err(HistoryError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_snapshot() {
        let dir = TempDir::new().unwrap();
        let history = loaded(Arc::new(source(&dir)));
        let ids: Vec<CommitId> = history.snapshot().map(|r| r.id).collect();
        assert_eq!(ids, vec![test_id(D), test_id(B), test_id(C), test_id(A)]);
    }

    #[test]
    fn test_save_and_reload_cache() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(source(&dir));
        let history = loaded(source.clone());
        history.file_changes_for(&test_id(B), None).unwrap();
        let path = history.save_cache().unwrap();
        assert!(path.starts_with(dir.path()));

        let reopened = History::with_source(HistoryConfig::default(), source.clone());
        let outcome = reopened.load_blocking().unwrap();
        assert!(outcome.from_cache);
        assert_eq!(source.log_calls(), 1);
        assert_eq!(reopened.lanes_at(3), history.lanes_at(3));

        reopened.file_changes_for(&test_id(B), None).unwrap();
        assert_eq!(source.diff_calls(), 1);
    }

    #[test]
    fn test_save_cache_requires_load() {
        let dir = TempDir::new().unwrap();
        let history = History::with_source(HistoryConfig::default(), Arc::new(source(&dir)));
        assert!(matches!(history.save_cache(), Err(HistoryError::NotLoaded)));

        let limited = History::with_source(
            HistoryConfig::default().path("src"),
            Arc::new(source(&dir)),
        );
        assert!(matches!(
            limited.save_cache(),
            Err(HistoryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_refresh_picks_up_new_commits() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(source(&dir));
        let history = loaded(source.clone());

        let mut newer = vec![commit(5, &[D])];
        newer.extend(abcd());
        source.set_commits(&newer);

        let outcome = history.refresh().handle().unwrap().wait().unwrap();
        assert_eq!(outcome.revisions, 5);
        assert_eq!(history.revision_at(0).unwrap().id, test_id(5));
        assert_eq!(history.revision_by_id(&test_id(D)).unwrap().order_idx(), 1);
    }

    #[test]
    fn test_reload_after_head_moved() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(source(&dir));
        let history = loaded(source.clone());
        history.save_cache().unwrap();

        let mut newer = vec![commit(5, &[D])];
        newer.extend(abcd());
        source.set_commits(&newer);

        // the saved head is stale, so this streams the whole history again
        let outcome = history.load_blocking().unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(outcome.revisions, 5);
        let ids: Vec<CommitId> = history.snapshot().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec![test_id(5), test_id(D), test_id(B), test_id(C), test_id(A)]
        );
        assert_eq!(history.lanes_at(0), Some(vec![LaneType::Branch]));
        assert!(history.graph().read().lanes().pending().is_empty());
    }

    #[test]
    fn test_named_revisions_skip_cache() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(source(&dir));
        loaded(source.clone()).save_cache().unwrap();

        let topic = History::with_source(HistoryConfig::default().revision("topic"), source.clone());
        let outcome = topic.load_blocking().unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(source.log_calls(), 2);
        assert!(matches!(topic.save_cache(), Err(HistoryError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_blocking_while_loading() {
        let (source, tx) = MemorySource::new().gated();
        let history = History::with_source(HistoryConfig::default(), Arc::new(source));

        let handle = history.load().handle().unwrap();
        assert!(matches!(history.load_blocking(), Err(HistoryError::Busy)));
        assert!(!history.loader.pending_refresh());

        assert!(history.cancel());
        assert_eq!(handle.wait().unwrap().state, LoadState::Cancelled);
        drop(tx);
    }

    #[test]
    fn test_patch_filter() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir)
            .with_pickaxe("fn main", false, vec![test_id(A), test_id(C), test_id(9)])
            .with_pickaxe("fn ma.n", true, vec![test_id(D)]);

        // nothing loaded, nothing to search
        let empty = History::with_source(
            HistoryConfig::default(),
            Arc::new(MemorySource::new().with_pickaxe("fn main", false, vec![test_id(A)])),
        );
        assert!(empty.patch_filter("fn main", false).unwrap().is_empty());

        let history = loaded(Arc::new(source));
        assert_eq!(
            history.patch_filter("fn main", false).unwrap(),
            vec![test_id(C), test_id(A)]
        );
        assert_eq!(history.patch_filter("fn ma.n", true).unwrap(), vec![test_id(D)]);
        assert!(history.patch_filter("fn ma.n", false).unwrap().is_empty());
    }
}
