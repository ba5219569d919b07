//! Revision records.
//!
//! A `CommitRecord` is what the line parser produces from one block of
//! `git log` output. Once appended to the store it becomes a `Revision`,
//! which adds the load position, the children discovered so far, the lane
//! snapshot for its row and the memoized near-ref lookups.

use chrono::{DateTime, Utc};

use crate::graph::lanes::LaneType;
use crate::graph::types::{CommitId, Signature};

/// one commit as parsed from the history stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    /// marked as a boundary commit by `git log --boundary`
    pub boundary: bool,
    pub author: Signature,
    pub committer: Signature,
    pub author_date: DateTime<Utc>,
    pub short_log: String,
    pub long_log: String,
}

impl CommitRecord {
    /// check if this is a merge commit (has multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// check if this is a root commit
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// get the first (or only) parent
    pub fn first_parent(&self) -> Option<CommitId> {
        self.parents.first().copied()
    }
}

/// A revision stored in the graph.
#[derive(Debug, Clone)]
pub struct Revision {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub boundary: bool,
    pub author: Signature,
    pub committer: Signature,
    pub author_date: DateTime<Utc>,
    pub short_log: String,
    pub long_log: String,
    pub(crate) order_idx: usize,
    /// load positions of known children, ascending
    pub(crate) children: Vec<usize>,
    pub(crate) applied: bool,
    pub(crate) lanes: Vec<LaneType>,
    pub(crate) near: NearCache,
}

impl Revision {
    pub(crate) fn new(record: CommitRecord, order_idx: usize) -> Self {
        Self {
            id: record.id,
            parents: record.parents,
            boundary: record.boundary,
            author: record.author,
            committer: record.committer,
            author_date: record.author_date,
            short_log: record.short_log,
            long_log: record.long_log,
            order_idx,
            children: Vec::new(),
            applied: false,
            lanes: Vec::new(),
            near: NearCache::default(),
        }
    }

    /// Replace the parsed contents, keeping position, children and lanes.
    pub(crate) fn refresh(&mut self, record: CommitRecord) {
        debug_assert_eq!(self.id, record.id);
        self.parents = record.parents;
        self.boundary = record.boundary;
        self.author = record.author;
        self.committer = record.committer;
        self.author_date = record.author_date;
        self.short_log = record.short_log;
        self.long_log = record.long_log;
    }

    /// position in load order
    pub fn order_idx(&self) -> usize {
        self.order_idx
    }

    /// load positions of the children loaded so far
    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// lane codes for this revision's row
    pub fn lanes(&self) -> &[LaneType] {
        &self.lanes
    }

    /// carries an applied patch
    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn parent(&self, n: usize) -> Option<CommitId> {
        self.parents.get(n).copied()
    }

    /// rebuild the parsed record, e.g. for persisting
    pub fn to_record(&self) -> CommitRecord {
        CommitRecord {
            id: self.id,
            parents: self.parents.clone(),
            boundary: self.boundary,
            author: self.author.clone(),
            committer: self.committer.clone(),
            author_date: self.author_date,
            short_log: self.short_log.clone(),
            long_log: self.long_log.clone(),
        }
    }

    pub(crate) fn add_child(&mut self, child: usize) {
        if let Err(pos) = self.children.binary_search(&child) {
            self.children.insert(pos, child);
        }
    }
}

/// reference from a revision to the revision owning its near-ref list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MasterRef {
    pub(crate) master: usize,
    /// distance between this revision and the master
    pub(crate) offset: u32,
}

/// one memoized near-ref lookup
#[derive(Debug, Clone, Default)]
pub(crate) struct NearMemo {
    /// store generation the memo was computed at
    pub(crate) generation: Option<u64>,
    pub(crate) master: Option<MasterRef>,
    /// (load position, distance) pairs, only filled on master revisions
    pub(crate) list: Vec<(usize, u32)>,
}

impl NearMemo {
    pub(crate) fn is_fresh(&self, generation: u64) -> bool {
        self.generation == Some(generation)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NearCache {
    pub(crate) anc_tags: NearMemo,
    pub(crate) desc_tags: NearMemo,
    pub(crate) desc_branches: NearMemo,
}
