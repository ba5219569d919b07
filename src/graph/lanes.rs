//! Lane assignment.
//!
//! The engine walks revisions in load order (children before parents) and
//! keeps one slot per ancestry line that is still waiting for its next
//! commit. For each row it emits a vector of `LaneType` codes a renderer
//! can draw directly: the node of the row, lines passing through, lines
//! forking off or joining in, and the connectors crossing other lines.
//!
//! Slots are a reusable pool. A freed slot may be claimed by any later
//! line; claims always take the lowest empty slot so that identical input
//! produces an identical layout.

use serde::{Deserialize, Serialize};

use crate::graph::store::RevisionStore;
use crate::graph::types::CommitId;

/// Code of one lane in one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LaneType {
    Empty,
    Active,
    NotActive,
    MergeFork,
    MergeForkR,
    MergeForkL,
    Join,
    JoinR,
    JoinL,
    Head,
    HeadR,
    HeadL,
    Tail,
    TailR,
    TailL,
    Cross,
    CrossEmpty,
    Initial,
    Branch,
    Applied,
    Boundary,
    BoundaryC,
    BoundaryR,
    BoundaryL,
}

impl LaneType {
    /// the lane holds the node of its row
    pub fn is_node(self) -> bool {
        matches!(
            self,
            Self::MergeFork
                | Self::MergeForkR
                | Self::MergeForkL
                | Self::BoundaryC
                | Self::BoundaryR
                | Self::BoundaryL
        )
    }

    pub fn is_merge(self) -> bool {
        self.is_node()
    }

    pub fn is_head(self) -> bool {
        matches!(self, Self::Head | Self::HeadR | Self::HeadL)
    }

    pub fn is_tail(self) -> bool {
        matches!(self, Self::Tail | Self::TailR | Self::TailL)
    }

    pub fn is_join(self) -> bool {
        matches!(self, Self::Join | Self::JoinR | Self::JoinL)
    }

    pub fn is_boundary(self) -> bool {
        matches!(
            self,
            Self::Boundary | Self::BoundaryC | Self::BoundaryR | Self::BoundaryL
        )
    }

    /// a line passing through the row without touching its node
    pub fn is_free(self) -> bool {
        matches!(self, Self::NotActive | Self::Cross) || self.is_join()
    }

    pub fn is_empty(self) -> bool {
        matches!(self, Self::Empty | Self::CrossEmpty)
    }

    /// single character used by text renderers
    pub fn glyph(self) -> char {
        match self {
            Self::Empty => ' ',
            Self::Active | Self::NotActive => '|',
            Self::MergeFork | Self::MergeForkR | Self::MergeForkL => '*',
            Self::Initial | Self::Branch => '*',
            Self::Applied => '@',
            Self::Boundary | Self::BoundaryC | Self::BoundaryR | Self::BoundaryL => 'o',
            Self::Join | Self::JoinR | Self::JoinL => '+',
            Self::Head | Self::HeadR | Self::HeadL => '\\',
            Self::Tail | Self::TailR | Self::TailL => '/',
            Self::Cross | Self::CrossEmpty => '-',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    kind: LaneType,
    /// the commit this line is waiting for
    awaits: Option<CommitId>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            kind: LaneType::Empty,
            awaits: None,
        }
    }
}

/// Lane state carried from one row to the next.
#[derive(Debug, Clone)]
pub struct Lanes {
    slots: Vec<Slot>,
    active: usize,
    boundary: bool,
    node: LaneType,
    node_l: LaneType,
    node_r: LaneType,
}

impl Default for Lanes {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            active: 0,
            boundary: false,
            node: LaneType::MergeFork,
            node_l: LaneType::MergeForkL,
            node_r: LaneType::MergeForkR,
        }
    }
}

impl Lanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the row of one revision and advance the state.
    pub fn update(
        &mut self,
        id: &CommitId,
        parents: &[CommitId],
        boundary: bool,
        applied: bool,
    ) -> Vec<LaneType> {
        if self.slots.is_empty() {
            self.init(id);
        }

        let (is_fork, discontinuity) = self.is_fork(id);
        let is_merge = parents.len() > 1;
        let is_initial = parents.is_empty();

        if discontinuity {
            self.change_active_lane(id);
        }
        self.set_boundary(boundary);

        if is_fork {
            self.set_fork(id);
        }
        if is_merge {
            self.set_merge(parents);
        }
        if applied {
            self.slots[self.active].kind = LaneType::Applied;
        }
        if is_initial {
            self.set_initial();
        }

        let row = self.slots.iter().map(|s| s.kind).collect();

        self.slots[self.active].awaits = if self.boundary {
            None
        } else {
            parents.first().copied()
        };

        if applied {
            self.slots[self.active].kind = LaneType::Active;
        }
        if is_merge {
            self.after_merge();
        }
        if is_fork {
            self.after_fork();
        }
        if self.slots[self.active].kind == LaneType::Branch {
            self.slots[self.active].kind = LaneType::Active;
        }
        self.trim();
        row
    }

    /// number of slots currently allocated
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// commits the in-flight lines are waiting for, by slot
    pub fn pending(&self) -> Vec<CommitId> {
        self.slots.iter().filter_map(|s| s.awaits).collect()
    }

    /// Free the slots waiting for `id`, e.g. when its load was cancelled.
    pub fn release(&mut self, id: &CommitId) -> usize {
        let mut released = 0;
        for slot in self.slots.iter_mut().filter(|s| s.awaits.as_ref() == Some(id)) {
            *slot = Slot::empty();
            released += 1;
        }
        self.trim();
        released
    }

    /// forget every in-flight line
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn init(&mut self, id: &CommitId) {
        self.clear();
        self.add(LaneType::Branch, *id);
    }

    fn find(&self, id: &CommitId, from: usize) -> Option<usize> {
        self.slots
            .iter()
            .skip(from)
            .position(|s| s.awaits.as_ref() == Some(id))
            .map(|pos| pos + from)
    }

    /// Claim the lowest empty slot, or append one.
    fn add(&mut self, kind: LaneType, awaits: CommitId) -> usize {
        let free = self.slots.iter().position(|s| s.kind == LaneType::Empty);

        match free {
            Some(idx) => {
                if self.slots[idx].awaits.is_some() {
                    debug_assert!(false, "lane {} claimed twice", idx);
                    tracing::error!(lane = idx, "lane slot claimed while still awaiting a commit");
                }
                self.slots[idx] = Slot {
                    kind,
                    awaits: Some(awaits),
                };
                idx
            }
            None => {
                self.slots.push(Slot {
                    kind,
                    awaits: Some(awaits),
                });
                self.slots.len() - 1
            }
        }
    }

    fn is_fork(&self, id: &CommitId) -> (bool, bool) {
        match self.find(id, 0) {
            Some(pos) => (self.find(id, pos + 1).is_some(), pos != self.active),
            None => (false, true),
        }
    }

    fn change_active_lane(&mut self, id: &CommitId) {
        if let Some(slot) = self.slots.get_mut(self.active) {
            slot.kind = if slot.kind == LaneType::Initial
                || slot.kind.is_boundary()
                || slot.awaits.is_none()
            {
                LaneType::Empty
            } else {
                LaneType::NotActive
            };
            if slot.kind == LaneType::Empty {
                slot.awaits = None;
            }
        }

        self.active = match self.find(id, 0) {
            Some(idx) => {
                self.slots[idx].kind = LaneType::Active;
                idx
            }
            None => self.add(LaneType::Branch, *id),
        };
        self.trim();
    }

    fn set_boundary(&mut self, boundary: bool) {
        self.boundary = boundary;
        if boundary {
            self.node = LaneType::BoundaryC;
            self.node_l = LaneType::BoundaryL;
            self.node_r = LaneType::BoundaryR;
            self.slots[self.active].kind = LaneType::Boundary;
        } else {
            self.node = LaneType::MergeFork;
            self.node_l = LaneType::MergeForkL;
            self.node_r = LaneType::MergeForkR;
        }
    }

    /// several lines wait for `id`: they all end here
    fn set_fork(&mut self, id: &CommitId) {
        let Some(first) = self.find(id, 0) else {
            return;
        };
        let (start, mut end) = (first, first);
        let mut next = Some(first);
        while let Some(idx) = next {
            end = idx;
            self.slots[idx].kind = LaneType::Tail;
            next = self.find(id, idx + 1);
        }
        self.slots[self.active].kind = self.node;

        if self.slots[start].kind == self.node {
            self.slots[start].kind = self.node_l;
        }
        if self.slots[end].kind == self.node {
            self.slots[end].kind = self.node_r;
        }
        if self.slots[start].kind == LaneType::Tail {
            self.slots[start].kind = LaneType::TailL;
        }
        if self.slots[end].kind == LaneType::Tail {
            self.slots[end].kind = LaneType::TailR;
        }
        self.mark_crossings(start, end, false);
    }

    /// extra parents join an existing line or open a new one
    fn set_merge(&mut self, parents: &[CommitId]) {
        if self.boundary {
            return;
        }
        let current = self.slots[self.active].kind;
        let was_fork = current == self.node;
        let was_fork_l = current == self.node_l;
        let was_fork_r = current == self.node_r;
        let mut join_was_cross = false;

        self.slots[self.active].kind = self.node;
        let (mut start, mut end) = (self.active, self.active);

        for parent in parents.iter().skip(1) {
            let idx = match self.find(parent, 0) {
                Some(idx) => {
                    if self.slots[idx].kind == LaneType::Cross {
                        join_was_cross = true;
                    }
                    self.slots[idx].kind = LaneType::Join;
                    idx
                }
                None => self.add(LaneType::Head, *parent),
            };
            start = start.min(idx);
            end = end.max(idx);
        }

        let start_kind = self.slots[start].kind;
        if start_kind == self.node && !was_fork && !was_fork_r {
            self.slots[start].kind = self.node_l;
        }
        let end_kind = self.slots[end].kind;
        if end_kind == self.node && !was_fork && !was_fork_l {
            self.slots[end].kind = self.node_r;
        }
        if self.slots[start].kind == LaneType::Join && !join_was_cross {
            self.slots[start].kind = LaneType::JoinL;
        }
        if self.slots[end].kind == LaneType::Join && !join_was_cross {
            self.slots[end].kind = LaneType::JoinR;
        }
        if self.slots[start].kind == LaneType::Head {
            self.slots[start].kind = LaneType::HeadL;
        }
        if self.slots[end].kind == LaneType::Head {
            self.slots[end].kind = LaneType::HeadR;
        }
        self.mark_crossings(start, end, true);
    }

    fn mark_crossings(&mut self, start: usize, end: usize, merge: bool) {
        for slot in self.slots.iter_mut().take(end).skip(start + 1) {
            slot.kind = match slot.kind {
                LaneType::NotActive => LaneType::Cross,
                LaneType::Empty => LaneType::CrossEmpty,
                LaneType::TailL | LaneType::TailR if merge => LaneType::Tail,
                other => other,
            };
        }
    }

    fn set_initial(&mut self) {
        let kind = self.slots[self.active].kind;
        if !kind.is_node() && kind != LaneType::Applied {
            self.slots[self.active].kind = if self.boundary {
                LaneType::Boundary
            } else {
                LaneType::Initial
            };
        }
    }

    fn after_merge(&mut self) {
        if self.boundary {
            return;
        }
        for slot in &mut self.slots {
            if slot.kind.is_head() || slot.kind.is_join() || slot.kind == LaneType::Cross {
                slot.kind = LaneType::NotActive;
            } else if slot.kind == LaneType::CrossEmpty {
                slot.kind = LaneType::Empty;
            } else if slot.kind.is_node() {
                slot.kind = LaneType::Active;
            }
        }
    }

    fn after_fork(&mut self) {
        let boundary = self.boundary;
        for slot in &mut self.slots {
            if slot.kind == LaneType::Cross {
                slot.kind = LaneType::NotActive;
            } else if slot.kind.is_tail() || slot.kind == LaneType::CrossEmpty {
                *slot = Slot::empty();
            }
            if !boundary && slot.kind.is_node() {
                slot.kind = LaneType::Active;
            }
        }
    }

    /// drop trailing empty slots, never the active one
    fn trim(&mut self) {
        while self.slots.len() > self.active + 1
            && self.slots.last().map(|s| s.kind) == Some(LaneType::Empty)
        {
            self.slots.pop();
        }
        if self.slots.len() == 1 && self.slots[0] == Slot::empty() {
            self.slots.clear();
            self.active = 0;
        }
    }
}

/// Find the parent a lane of `from`'s row leads to.
///
/// Walks up the rows above `from` until one where the lane is not just
/// passing through, then follows that row's connectors back to its node.
pub fn lane_parent(store: &RevisionStore, from: &CommitId, lane: usize) -> Option<CommitId> {
    let start = store.index_of(from)?;

    for idx in (0..start).rev() {
        let rev = store.at(idx)?;
        let row = rev.lanes();
        if lane >= row.len() {
            return None;
        }
        if row[lane].is_free() {
            continue;
        }

        let mut pos = lane;
        let mut kind = row[pos];
        let mut parent = 0;
        while !kind.is_merge() && kind != LaneType::Active {
            if kind.is_head() {
                parent += 1;
            }
            if pos == 0 {
                return None;
            }
            pos -= 1;
            kind = row[pos];
        }
        return rev.parent(parent);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::test_id;
    use LaneType::*;

    fn feed(lanes: &mut Lanes, rows: &[(u32, &[u32])]) -> Vec<Vec<LaneType>> {
        rows.iter()
            .map(|(id, parents)| {
                let parents: Vec<CommitId> = parents.iter().map(|p| test_id(*p)).collect();
                lanes.update(&test_id(*id), &parents, false, false)
            })
            .collect()
    }

    #[test]
    fn test_linear_history() {
        let mut lanes = Lanes::new();
        let rows = feed(&mut lanes, &[(3, &[2]), (2, &[1]), (1, &[])]);

        assert_eq!(rows[0], vec![Branch]);
        assert_eq!(rows[1], vec![Active]);
        assert_eq!(rows[2], vec![Initial]);
        assert!(lanes.pending().is_empty());
    }

    #[test]
    fn test_fork_and_merge() {
        // A <- B, A <- C, D merges B and C; the stream lists children first
        let (a, b, c, d) = (1, 2, 3, 4);
        let mut lanes = Lanes::new();
        let rows = feed(&mut lanes, &[(d, &[b, c]), (b, &[a]), (c, &[a]), (a, &[])]);

        // D's row opens a second line for C next to its own node
        assert_eq!(rows[0], vec![MergeForkL, HeadR]);
        assert!(rows[0][0].is_merge());
        assert!(rows[0][1].is_head());
        assert_eq!(rows[1], vec![Active, NotActive]);
        assert_eq!(rows[2], vec![NotActive, Active]);
        // both lines end at A
        assert_eq!(rows[3], vec![MergeForkL, TailR]);
        assert!(lanes.pending().is_empty());
    }

    #[test]
    fn test_merge_joins_existing_line() {
        // 5 merges 4 and 3, 4's parent is 3
        let mut lanes = Lanes::new();
        let rows = feed(&mut lanes, &[(6, &[3]), (5, &[4, 3]), (4, &[3]), (3, &[])]);

        assert_eq!(rows[0], vec![Branch]);
        // 5 is a new tip, its second parent joins the line waiting for 3
        assert_eq!(rows[1], vec![JoinL, MergeForkR]);
        assert_eq!(rows[2], vec![NotActive, Active]);
        assert_eq!(rows[3], vec![MergeForkL, TailR]);
    }

    #[test]
    fn test_lowest_empty_slot_reused() {
        let mut lanes = Lanes::new();
        // two independent lines, the left one ends first
        let rows = feed(
            &mut lanes,
            &[(10, &[11]), (20, &[21]), (11, &[]), (30, &[31]), (21, &[]), (31, &[])],
        );

        assert_eq!(rows[1], vec![NotActive, Branch]);
        assert_eq!(rows[2], vec![Initial, NotActive]);
        // line 30 reuses the slot freed by the root 11
        assert_eq!(rows[3], vec![Branch, NotActive]);
        assert_eq!(rows[4], vec![NotActive, Initial]);
        assert_eq!(rows[5], vec![Initial]);
    }

    #[test]
    fn test_width_covers_in_flight_lines() {
        let mut lanes = Lanes::new();
        let input: &[(u32, &[u32])] = &[(9, &[8, 7, 6]), (8, &[5]), (7, &[5]), (6, &[5]), (5, &[])];
        for (id, parents) in input {
            let parents: Vec<CommitId> = parents.iter().map(|p| test_id(*p)).collect();
            lanes.update(&test_id(*id), &parents, false, false);
            assert!(lanes.width() >= lanes.pending().len());
        }
    }

    #[test]
    fn test_replay_is_deterministic() {
        let input: &[(u32, &[u32])] = &[
            (9, &[7, 8]),
            (8, &[6]),
            (7, &[5, 6]),
            (6, &[4]),
            (5, &[4]),
            (4, &[3]),
            (3, &[]),
        ];
        let first = feed(&mut Lanes::new(), input);
        let second = feed(&mut Lanes::new(), input);
        assert_eq!(first, second);
    }

    #[test]
    fn test_boundary_does_not_reserve_parent() {
        let mut lanes = Lanes::new();
        let row = lanes.update(&test_id(2), &[test_id(1)], true, false);

        assert_eq!(row, vec![Boundary]);
        assert!(lanes.pending().is_empty());
    }

    #[test]
    fn test_applied_patch_lane() {
        let mut lanes = Lanes::new();
        lanes.update(&test_id(3), &[test_id(2)], false, false);
        let row = lanes.update(&test_id(2), &[test_id(1)], false, true);
        assert_eq!(row, vec![Applied]);
        assert_eq!(lanes.pending(), vec![test_id(1)]);
    }

    #[test]
    fn test_release_pending_line() {
        let mut lanes = Lanes::new();
        lanes.update(&test_id(9), &[test_id(8), test_id(7)], false, false);
        assert_eq!(lanes.pending(), vec![test_id(8), test_id(7)]);

        assert_eq!(lanes.release(&test_id(7)), 1);
        assert_eq!(lanes.pending(), vec![test_id(8)]);
        assert_eq!(lanes.width(), 1);
    }
}
