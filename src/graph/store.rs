//! Append-only revision store.
//!
//! Revisions are kept in load order; the position of a revision in that
//! order (`order_idx`) is assigned once and never reused until a full
//! reset. Children are back-references by position and may be discovered
//! in either direction: a child loaded before its parent is parked in a
//! pending map until the parent shows up.

use std::collections::HashMap;

use crate::graph::revision::{CommitRecord, Revision};
use crate::graph::types::CommitId;

/// result of appending a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// a new revision was created at this position
    New(usize),
    /// an already known revision was refreshed in place
    Replaced(usize),
}

impl Appended {
    pub fn index(self) -> usize {
        match self {
            Self::New(idx) | Self::Replaced(idx) => idx,
        }
    }
}

#[derive(Debug, Default)]
pub struct RevisionStore {
    revisions: Vec<Revision>,
    index: HashMap<CommitId, usize>,
    /// children loaded before their parent, keyed by the parent
    pending_children: HashMap<CommitId, Vec<usize>>,
    generation: u64,
    /// number of full resets; positions are only comparable within one epoch
    epoch: u64,
}

impl RevisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parsed record.
    ///
    /// A record whose identifier is already present replaces the stored
    /// contents and keeps its position.
    pub fn append(&mut self, record: CommitRecord) -> Appended {
        self.generation += 1;

        if let Some(&idx) = self.index.get(&record.id) {
            self.revisions[idx].refresh(record);
            return Appended::Replaced(idx);
        }

        let idx = self.revisions.len();
        for parent in &record.parents {
            match self.index.get(parent) {
                Some(&pidx) => self.revisions[pidx].add_child(idx),
                None => self.pending_children.entry(*parent).or_default().push(idx),
            }
        }

        let mut revision = Revision::new(record, idx);
        if let Some(waiting) = self.pending_children.remove(&revision.id) {
            for child in waiting {
                revision.add_child(child);
            }
        }

        self.index.insert(revision.id, idx);
        self.revisions.push(revision);
        Appended::New(idx)
    }

    pub fn get(&self, id: &CommitId) -> Option<&Revision> {
        self.index.get(id).map(|&idx| &self.revisions[idx])
    }

    pub fn at(&self, idx: usize) -> Option<&Revision> {
        self.revisions.get(idx)
    }

    pub(crate) fn at_mut(&mut self, idx: usize) -> Option<&mut Revision> {
        self.revisions.get_mut(idx)
    }

    pub fn index_of(&self, id: &CommitId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &CommitId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// revisions in load order
    pub fn iter(&self) -> impl Iterator<Item = &Revision> + '_ {
        self.revisions.iter()
    }

    /// children of a revision, in load order
    pub fn children_of(&self, id: &CommitId) -> Vec<CommitId> {
        self.get(id)
            .map(|rev| {
                rev.children
                    .iter()
                    .filter_map(|&idx| self.revisions.get(idx).map(|c| c.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sort identifiers by load position, dropping unknown ones.
    pub fn sort_by_load_order(&self, ids: &[CommitId]) -> Vec<CommitId> {
        let mut known: Vec<(usize, CommitId)> = ids
            .iter()
            .filter_map(|id| self.index_of(id).map(|idx| (idx, *id)))
            .collect();
        known.sort_by_key(|(idx, _)| *idx);
        known.dedup_by_key(|(idx, _)| *idx);
        known.into_iter().map(|(_, id)| id).collect()
    }

    /// counter bumped on every change that can invalidate memoized lookups
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn touch(&mut self) {
        self.generation += 1;
    }

    /// Drop everything. Positions start over from zero.
    pub fn reset(&mut self) {
        self.revisions.clear();
        self.index.clear();
        self.pending_children.clear();
        self.generation += 1;
        self.epoch += 1;
    }
}
