//! Per-revision file-change cache.
//!
//! Diffs are expensive to produce, so every list fetched from the source
//! is kept in an LRU bounded by entry count. Diffs between two arbitrary
//! revisions are rarely asked for twice; they live in a single temporary
//! slot instead and are never persisted.

use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::graph::CommitId;
use crate::parser::{ChangeStatus, FileChange};

/// ordered file list of one diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChanges {
    pub changes: Vec<FileChange>,
}

impl FileChanges {
    pub fn new(changes: Vec<FileChange>) -> Self {
        Self { changes }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileChange> + '_ {
        self.changes.iter()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.path.as_str()).collect()
    }

    /// changes relative to one parent of a merge
    pub fn for_parent(&self, parent: usize) -> Vec<&FileChange> {
        self.changes.iter().filter(|c| c.parent == parent).collect()
    }

    pub fn count(&self, status: ChangeStatus) -> usize {
        self.changes.iter().filter(|c| c.status == status).count()
    }

    /// any path, including rename sources, matches `pattern`
    pub fn touches(&self, pattern: &PathPattern) -> bool {
        self.changes.iter().any(|c| {
            pattern.is_match(&c.path) || c.source.as_deref().is_some_and(|s| pattern.is_match(s))
        })
    }
}

/// Case-insensitive wildcard pattern found anywhere in a path.
///
/// `*` and `?` also match `/`, so `src/*.rs` matches `src/a/b.rs`, and a
/// pattern without wildcards is a plain substring search.
#[derive(Debug, Clone)]
pub struct PathPattern {
    matcher: GlobMatcher,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, globset::Error> {
        // `**` is only valid next to a separator
        let inner = pattern.trim_matches('*');
        let matcher = GlobBuilder::new(&format!("*{}*", inner))
            .case_insensitive(true)
            .literal_separator(false)
            .build()?
            .compile_matcher();
        Ok(Self { matcher })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileChangeKey {
    /// a revision against its first parent
    Single(CommitId),
    /// a merge against every parent
    AllMerge(CommitId),
    /// a revision against an arbitrary other one
    Pair(CommitId, CommitId),
}

impl FileChangeKey {
    pub fn new(id: CommitId, diff_to: Option<CommitId>, all_merge_files: bool) -> Self {
        match (diff_to, all_merge_files) {
            (Some(other), _) => Self::Pair(id, other),
            (None, true) => Self::AllMerge(id),
            (None, false) => Self::Single(id),
        }
    }

    pub fn id(&self) -> CommitId {
        match self {
            Self::Single(id) | Self::AllMerge(id) | Self::Pair(id, _) => *id,
        }
    }

    fn is_pair(&self) -> bool {
        matches!(self, Self::Pair(..))
    }
}

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug)]
struct Inner {
    /// least recently used first
    entries: IndexMap<FileChangeKey, Arc<FileChanges>>,
    pair: Option<(FileChangeKey, Arc<FileChanges>)>,
    capacity: usize,
    /// changed since the last persist
    dirty: bool,
}

/// Internally synchronized; share it behind an `Arc`.
#[derive(Debug)]
pub struct FileChangeCache {
    inner: Mutex<Inner>,
}

impl Default for FileChangeCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FileChangeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: IndexMap::new(),
                pair: None,
                capacity: capacity.max(1),
                dirty: false,
            }),
        }
    }

    /// Look a list up and mark it most recently used.
    pub fn get(&self, key: &FileChangeKey) -> Option<Arc<FileChanges>> {
        let mut inner = self.inner.lock();
        if key.is_pair() {
            return inner
                .pair
                .as_ref()
                .filter(|(k, _)| k == key)
                .map(|(_, v)| Arc::clone(v));
        }
        let value = inner.entries.shift_remove(key)?;
        inner.entries.insert(key.clone(), Arc::clone(&value));
        Some(value)
    }

    pub fn insert(&self, key: FileChangeKey, changes: FileChanges) -> Arc<FileChanges> {
        let value = Arc::new(changes);
        let mut inner = self.inner.lock();
        if key.is_pair() {
            inner.pair = Some((key, Arc::clone(&value)));
            return value;
        }

        inner.entries.shift_remove(&key);
        inner.entries.insert(key, Arc::clone(&value));
        while inner.entries.len() > inner.capacity {
            let Some(oldest) = inner.entries.keys().next().cloned() else {
                break;
            };
            inner.entries.shift_remove(&oldest);
        }
        inner.dirty = true;
        value
    }

    pub fn contains(&self, key: &FileChangeKey) -> bool {
        let inner = self.inner.lock();
        match key {
            FileChangeKey::Pair(..) => inner.pair.as_ref().is_some_and(|(k, _)| k == key),
            _ => inner.entries.contains_key(key),
        }
    }

    /// number of persistent entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// persistent entries, least recently used first
    pub fn entries(&self) -> Vec<(FileChangeKey, Arc<FileChanges>)> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Revisions whose cached changes touch a path matching `pattern`.
    pub fn file_filter(&self, pattern: &PathPattern) -> Vec<CommitId> {
        let inner = self.inner.lock();
        let mut ids: Vec<CommitId> = inner
            .entries
            .iter()
            .filter(|(_, changes)| changes.touches(pattern))
            .map(|(key, _)| key.id())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub fn mark_clean(&self) {
        self.inner.lock().dirty = false;
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.pair = None;
        inner.dirty = false;
    }
}
