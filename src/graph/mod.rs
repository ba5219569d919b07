//! revision graph for the history browser
//!
//! this module owns everything the loader builds and the front-end reads:
//! the revisions in load order, the lane rows computed while they arrive,
//! and the names pointing into the history.
//!
//! ```text
//!   CommitRecord ──► RevisionStore ──► Lanes (one row per new revision)
//!                          │
//!                          ▼
//!                      RefIndex ──► near (nearest tags / branches)
//! ```
//!
//! The graph is shared as `Arc<RwLock<Graph>>`. The loader worker is the
//! only writer and appends one record per write lock, so readers never
//! observe a half-built revision.

mod lanes;
mod near;
mod refs;
mod revision;
mod store;
mod types;

use std::sync::Arc;

use parking_lot::RwLock;

pub use lanes::{lane_parent, LaneType, Lanes};
pub use near::Direction;
pub use refs::{RefEntry, RefIndex, RefRecord};
pub use revision::{CommitRecord, Revision};
pub use store::{Appended, RevisionStore};
pub use types::{CommitId, InvalidIdError, NamedRef, RefKinds, RefName, RefType, Signature};

pub type SharedGraph = Arc<RwLock<Graph>>;

#[derive(Debug, Default)]
pub struct Graph {
    store: RevisionStore,
    lanes: Lanes,
    refs: RefIndex,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedGraph {
        Arc::new(RwLock::new(self))
    }

    pub fn store(&self) -> &RevisionStore {
        &self.store
    }

    pub fn refs(&self) -> &RefIndex {
        &self.refs
    }

    pub fn lanes(&self) -> &Lanes {
        &self.lanes
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Append one record and lay out its row.
    ///
    /// Rows are only computed for new revisions; a refreshed revision keeps
    /// the row it got when it was first loaded.
    pub fn append(&mut self, record: CommitRecord) -> Appended {
        let applied = self
            .refs
            .check(&record.id, RefKinds::APPLIED)
            .contains(RefKinds::APPLIED);

        let appended = self.store.append(record);
        if let Appended::New(idx) = appended {
            if let Some(rev) = self.store.at_mut(idx) {
                rev.applied = applied;
                rev.lanes = self
                    .lanes
                    .update(&rev.id, &rev.parents, rev.boundary, applied);
            }
        }
        appended
    }

    /// Replace the reference index. Memoized near-ref lookups go stale.
    pub fn set_refs(&mut self, refs: RefIndex) {
        self.refs = refs;
        self.store.touch();
    }

    /// Drop every revision and lane. The reference index is kept.
    pub fn reset(&mut self) {
        self.store.reset();
        self.lanes.clear();
    }

    /// Forget the lines still waiting for parents that will not arrive.
    pub fn close_lanes(&mut self) -> usize {
        let pending = self.lanes.pending().len();
        self.lanes.clear();
        pending
    }

    pub fn revision(&self, id: &CommitId) -> Option<&Revision> {
        self.store.get(id)
    }

    pub fn revision_at(&self, idx: usize) -> Option<&Revision> {
        self.store.at(idx)
    }

    pub fn children(&self, id: &CommitId) -> Vec<CommitId> {
        self.store.children_of(id)
    }

    pub fn lane_parent(&self, from: &CommitId, lane: usize) -> Option<CommitId> {
        lanes::lane_parent(&self.store, from, lane)
    }

    /// nearest tagged ancestors or descendants, memoized on the revisions
    pub fn nearest_tags(&mut self, direction: Direction, id: &CommitId) -> Vec<String> {
        near::nearest_tags(&mut self.store, &self.refs, direction, id)
    }

    pub fn descendant_branches(&mut self, id: &CommitId) -> Vec<NamedRef> {
        near::descendant_branches(&mut self.store, &self.refs, id)
    }

    pub fn refs_for(&self, id: &CommitId) -> Vec<RefName> {
        self.refs.refs_for(id)
    }
}

/// Iterator over the revisions present when it was created.
///
/// Each step takes the read lock for one clone only, so a running load is
/// never blocked for the whole iteration. The iteration ends early once
/// the store is reset.
pub struct Snapshot {
    graph: SharedGraph,
    next: usize,
    end: usize,
    epoch: u64,
}

impl Snapshot {
    pub fn new(graph: SharedGraph) -> Self {
        let (end, epoch) = {
            let graph = graph.read();
            (graph.len(), graph.store().epoch())
        };
        Self {
            graph,
            next: 0,
            end,
            epoch,
        }
    }
}

impl Iterator for Snapshot {
    type Item = Revision;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let rev = {
            let graph = self.graph.read();
            if graph.store().epoch() == self.epoch {
                graph.revision_at(self.next).cloned()
            } else {
                None
            }
        };
        match rev {
            Some(rev) => {
                self.next += 1;
                Some(rev)
            }
            // store was reset under us
            None => {
                self.next = self.end;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.end - self.next))
    }
}
