//! Nearest reference lookups.
//!
//! Every revision memoizes one list per lookup kind. A revision with no
//! mark of its own and a single neighbor in the walk direction does not
//! keep a list; it points at the revision owning the list it would copy
//! (its "master") together with the distance to it:
//!
//! ```text
//!   v2 ── a ── b ── c        b.master = (v2, 2)
//!                            c.master = (v2, 3)
//! ```
//!
//! Memos carry the store generation they were built at and are rebuilt
//! lazily once the store or the reference index changed.

use std::collections::HashMap;

use crate::graph::refs::RefIndex;
use crate::graph::revision::{MasterRef, NearMemo};
use crate::graph::store::RevisionStore;
use crate::graph::types::{CommitId, NamedRef, RefKinds, RefType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// towards parents
    Ascending,
    /// towards children
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    AncestorTags,
    DescendantTags,
    DescendantBranches,
}

impl Lookup {
    fn marks(self) -> RefKinds {
        match self {
            Self::AncestorTags | Self::DescendantTags => RefKinds::TAG,
            Self::DescendantBranches => RefKinds::BRANCH | RefKinds::REMOTE_BRANCH,
        }
    }

    /// stop walking past a marked revision
    fn is_frontier(self) -> bool {
        !matches!(self, Self::DescendantBranches)
    }

    fn memo(self, store: &RevisionStore, idx: usize) -> Option<&NearMemo> {
        let near = &store.at(idx)?.near;
        Some(match self {
            Self::AncestorTags => &near.anc_tags,
            Self::DescendantTags => &near.desc_tags,
            Self::DescendantBranches => &near.desc_branches,
        })
    }

    fn memo_mut(self, store: &mut RevisionStore, idx: usize) -> Option<&mut NearMemo> {
        let near = &mut store.at_mut(idx)?.near;
        Some(match self {
            Self::AncestorTags => &mut near.anc_tags,
            Self::DescendantTags => &mut near.desc_tags,
            Self::DescendantBranches => &mut near.desc_branches,
        })
    }

    /// loaded neighbors in walk direction
    fn neighbors(self, store: &RevisionStore, idx: usize) -> Vec<usize> {
        let Some(rev) = store.at(idx) else {
            return Vec::new();
        };
        match self {
            Self::AncestorTags => rev
                .parents
                .iter()
                .filter_map(|p| store.index_of(p))
                .collect(),
            Self::DescendantTags | Self::DescendantBranches => rev.children.clone(),
        }
    }
}

/// Tag names on the nearest tagged ancestors or descendants of `id`.
///
/// The revision itself counts when it is tagged. Results are ordered by
/// distance, then by load position.
pub fn nearest_tags(
    store: &mut RevisionStore,
    refs: &RefIndex,
    direction: Direction,
    id: &CommitId,
) -> Vec<String> {
    let lookup = match direction {
        Direction::Ascending => Lookup::AncestorTags,
        Direction::Descending => Lookup::DescendantTags,
    };
    let Some(start) = store.index_of(id) else {
        return Vec::new();
    };
    let mut found = resolve(store, refs, lookup, start);
    found.sort_by_key(|&(idx, dist)| (dist, idx));

    found
        .into_iter()
        .filter_map(|(idx, _)| store.at(idx))
        .flat_map(|rev| refs.names(&rev.id, RefType::Tag))
        .collect()
}

/// Branches and remote branches on `id` and all its loaded descendants,
/// in load order.
pub fn descendant_branches(
    store: &mut RevisionStore,
    refs: &RefIndex,
    id: &CommitId,
) -> Vec<NamedRef> {
    let Some(start) = store.index_of(id) else {
        return Vec::new();
    };
    let mut found = resolve(store, refs, Lookup::DescendantBranches, start);
    found.sort_by_key(|&(idx, _)| idx);

    let mut named = Vec::new();
    for (idx, _) in found {
        let Some(rev) = store.at(idx) else { continue };
        for kind in [RefType::Branch, RefType::RemoteBranch] {
            for name in refs.names(&rev.id, kind) {
                named.push(NamedRef {
                    id: rev.id,
                    kind,
                    name,
                });
            }
        }
    }
    named
}

/// memoized (position, distance) list for one revision
fn resolve(
    store: &mut RevisionStore,
    refs: &RefIndex,
    lookup: Lookup,
    start: usize,
) -> Vec<(usize, u32)> {
    fill(store, refs, lookup, start);
    expand(store, lookup, start)
}

/// Follow the master reference of a fresh memo and apply its offset.
fn expand(store: &RevisionStore, lookup: Lookup, idx: usize) -> Vec<(usize, u32)> {
    let Some(memo) = lookup.memo(store, idx) else {
        return Vec::new();
    };
    match memo.master {
        Some(MasterRef { master, offset }) => lookup
            .memo(store, master)
            .map(|m| m.list.iter().map(|&(i, d)| (i, d + offset)).collect())
            .unwrap_or_default(),
        None => memo.list.clone(),
    }
}

fn is_marked(store: &RevisionStore, refs: &RefIndex, lookup: Lookup, idx: usize) -> bool {
    store
        .at(idx)
        .map(|rev| refs.check(&rev.id, lookup.marks()) != RefKinds::empty())
        .unwrap_or(false)
}

/// Build every stale memo reachable from `start`, neighbors first.
fn fill(store: &mut RevisionStore, refs: &RefIndex, lookup: Lookup, start: usize) {
    let generation = store.generation();
    let fresh = |store: &RevisionStore, idx: usize| {
        lookup
            .memo(store, idx)
            .map(|m| m.is_fresh(generation))
            .unwrap_or(true)
    };

    // (position, neighbors already pushed)
    let mut stack = vec![(start, false)];
    while let Some((idx, expanded)) = stack.pop() {
        if fresh(&*store, idx) {
            continue;
        }
        let marked = is_marked(store, refs, lookup, idx);
        let neighbors = if marked && lookup.is_frontier() {
            Vec::new()
        } else {
            lookup.neighbors(store, idx)
        };

        if !expanded {
            stack.push((idx, true));
            stack.extend(
                neighbors
                    .iter()
                    .filter(|&&n| !fresh(&*store, n))
                    .map(|&n| (n, false)),
            );
            continue;
        }

        let memo = if !marked && neighbors.len() == 1 {
            let next = neighbors[0];
            let master = match lookup.memo(store, next).and_then(|m| m.master) {
                Some(m) => MasterRef {
                    master: m.master,
                    offset: m.offset + 1,
                },
                None => MasterRef {
                    master: next,
                    offset: 1,
                },
            };
            NearMemo {
                generation: Some(generation),
                master: Some(master),
                list: Vec::new(),
            }
        } else {
            let mut best: HashMap<usize, u32> = HashMap::new();
            if marked {
                best.insert(idx, 0);
            }
            for &n in &neighbors {
                for (i, d) in expand(store, lookup, n) {
                    let d = d + 1;
                    best.entry(i).and_modify(|cur| *cur = (*cur).min(d)).or_insert(d);
                }
            }
            let mut list: Vec<(usize, u32)> = best.into_iter().collect();
            list.sort_by_key(|&(i, d)| (d, i));
            NearMemo {
                generation: Some(generation),
                master: None,
                list,
            }
        };

        if let Some(slot) = lookup.memo_mut(store, idx) {
            *slot = memo;
        }
    }
}
