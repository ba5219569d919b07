//! Reference index.
//!
//! Maps commit identifiers to the names pointing at them: tags, local and
//! remote branches, other refs and patches. A name is unique within its
//! namespace, so attaching an existing name to another commit moves it.

use std::collections::HashMap;

use crate::graph::store::RevisionStore;
use crate::graph::types::{CommitId, NamedRef, RefKinds, RefName, RefType};
use crate::source::HistorySource;

/// all names attached to one commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefEntry {
    pub kinds: RefKinds,
    pub tags: Vec<String>,
    pub branches: Vec<String>,
    pub remote_branches: Vec<String>,
    pub refs: Vec<String>,
    pub patch: Option<String>,
    /// set when one of `branches` is checked out
    pub current_branch: Option<String>,
    /// object ids of annotated tags, by tag name
    pub tag_objects: Vec<(String, String)>,
}

impl RefEntry {
    fn names(&self, kind: RefType) -> &[String] {
        match kind {
            RefType::Tag => &self.tags,
            RefType::Branch => &self.branches,
            RefType::RemoteBranch => &self.remote_branches,
            RefType::Ref => &self.refs,
            RefType::Applied | RefType::Unapplied => match &self.patch {
                Some(patch) if self.kinds.contains(kind.kinds()) => std::slice::from_ref(patch),
                _ => &[],
            },
        }
    }

    fn names_mut(&mut self, kind: RefType) -> Option<&mut Vec<String>> {
        match kind {
            RefType::Tag => Some(&mut self.tags),
            RefType::Branch => Some(&mut self.branches),
            RefType::RemoteBranch => Some(&mut self.remote_branches),
            RefType::Ref => Some(&mut self.refs),
            RefType::Applied | RefType::Unapplied => None,
        }
    }

    fn refresh_kinds(&mut self) {
        let current = self.kinds & RefKinds::CURRENT_BRANCH;
        let patch = self.kinds & (RefKinds::APPLIED | RefKinds::UNAPPLIED);
        let mut kinds = RefKinds::empty();
        kinds.set(RefKinds::TAG, !self.tags.is_empty());
        kinds.set(RefKinds::BRANCH, !self.branches.is_empty());
        kinds.set(RefKinds::REMOTE_BRANCH, !self.remote_branches.is_empty());
        kinds.set(RefKinds::REF, !self.refs.is_empty());
        if self.patch.is_some() {
            kinds |= patch;
        }
        if self.current_branch.is_some() {
            kinds |= current;
        }
        self.kinds = kinds;
    }

    fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// one reference as enumerated by the history source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRecord {
    pub id: CommitId,
    pub kind: RefType,
    pub name: String,
    /// the checked out branch
    pub current: bool,
    /// object id of an annotated tag
    pub tag_object: Option<String>,
}

impl RefRecord {
    pub fn new(id: CommitId, kind: RefType, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            current: false,
            tag_object: None,
        }
    }

    pub fn current(mut self) -> Self {
        self.current = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefIndex {
    entries: HashMap<CommitId, RefEntry>,
    /// reverse lookup, keyed by namespace and name
    owners: HashMap<(RefType, String), CommitId>,
}

impl RefIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = RefRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    /// Attach a name to a commit, detaching it from its previous owner.
    pub fn insert(&mut self, record: RefRecord) {
        self.remove(record.kind, &record.name);

        let entry = self.entries.entry(record.id).or_default();
        match record.kind {
            RefType::Applied | RefType::Unapplied => {
                if let Some(old) = entry.patch.replace(record.name.clone()) {
                    self.owners.remove(&(RefType::Applied, old));
                }
                entry.kinds.remove(RefKinds::APPLIED | RefKinds::UNAPPLIED);
                entry.kinds |= record.kind.kinds();
            }
            kind => {
                if let Some(names) = entry.names_mut(kind) {
                    names.push(record.name.clone());
                }
            }
        }
        if record.current && record.kind == RefType::Branch {
            entry.current_branch = Some(record.name.clone());
            entry.kinds |= RefKinds::CURRENT_BRANCH;
        }
        if let Some(object) = record.tag_object {
            entry.tag_objects.push((record.name.clone(), object));
        }
        entry.refresh_kinds();

        self.owners
            .insert((record.kind.namespace(), record.name), record.id);
    }

    /// Detach a name. Returns the commit it pointed at.
    pub fn remove(&mut self, kind: RefType, name: &str) -> Option<CommitId> {
        let id = self.owners.remove(&(kind.namespace(), name.to_string()))?;
        if let Some(entry) = self.entries.get_mut(&id) {
            match kind {
                RefType::Applied | RefType::Unapplied => entry.patch = None,
                kind => {
                    if let Some(names) = entry.names_mut(kind) {
                        names.retain(|n| n != name);
                    }
                }
            }
            if kind == RefType::Branch && entry.current_branch.as_deref() == Some(name) {
                entry.current_branch = None;
            }
            if kind == RefType::Tag {
                entry.tag_objects.retain(|(tag, _)| tag != name);
            }
            entry.refresh_kinds();
            if entry.is_empty() {
                self.entries.remove(&id);
            }
        }
        Some(id)
    }

    pub fn entry(&self, id: &CommitId) -> Option<&RefEntry> {
        self.entries.get(id)
    }

    /// kinds of names attached to `id`, restricted to `mask`
    pub fn check(&self, id: &CommitId, mask: RefKinds) -> RefKinds {
        self.entries
            .get(id)
            .map(|entry| entry.kinds & mask)
            .unwrap_or_default()
    }

    /// names of one kind attached to `id`
    pub fn names(&self, id: &CommitId, kind: RefType) -> Vec<String> {
        self.entries
            .get(id)
            .map(|entry| entry.names(kind).to_vec())
            .unwrap_or_default()
    }

    /// every name attached to `id`
    pub fn refs_for(&self, id: &CommitId) -> Vec<RefName> {
        let Some(entry) = self.entries.get(id) else {
            return Vec::new();
        };
        const ORDER: [RefType; 6] = [
            RefType::Branch,
            RefType::RemoteBranch,
            RefType::Tag,
            RefType::Ref,
            RefType::Applied,
            RefType::Unapplied,
        ];
        ORDER
            .iter()
            .flat_map(|&kind| entry.names(kind).iter().map(move |n| RefName::new(kind, n.clone())))
            .collect()
    }

    /// the checked out branch and the commit it points at
    pub fn current_branch(&self) -> Option<(CommitId, &str)> {
        self.entries
            .iter()
            .find_map(|(id, entry)| entry.current_branch.as_deref().map(|name| (*id, name)))
    }

    /// Look a name up in one namespace, or in all of them.
    ///
    /// When nothing matches exactly and a source is given, the name is
    /// handed to the source as a possibly abbreviated revision. Lookup
    /// failures on that path are not errors, the name is just unknown.
    pub fn identifier_for(
        &self,
        name: &str,
        kind: Option<RefType>,
        source: Option<&dyn HistorySource>,
    ) -> Option<CommitId> {
        let exact = match kind {
            Some(kind) => self.owners.get(&(kind.namespace(), name.to_string())).copied(),
            None => [
                RefType::Tag,
                RefType::Branch,
                RefType::RemoteBranch,
                RefType::Ref,
                RefType::Applied,
            ]
            .iter()
            .find_map(|kind| self.owners.get(&(*kind, name.to_string())).copied()),
        };
        if exact.is_some() {
            return exact;
        }

        let source = source?;
        match source.resolve(name) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(name, error = %e, "could not resolve abbreviated name");
                None
            }
        }
    }

    /// commits carrying any name in `mask`
    pub fn all_ids(&self, mask: RefKinds) -> Vec<CommitId> {
        let mut ids: Vec<CommitId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.kinds.intersects(mask))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Every name in `mask`.
    ///
    /// With a store, only names on loaded commits are returned, sorted by
    /// load order; otherwise the result is sorted alphabetically.
    pub fn all_names(&self, mask: RefKinds, loaded: Option<&RevisionStore>) -> Vec<NamedRef> {
        let mut named: Vec<(usize, NamedRef)> = Vec::new();
        for (id, entry) in &self.entries {
            let position = match loaded {
                Some(store) => match store.index_of(id) {
                    Some(idx) => idx,
                    None => continue,
                },
                None => 0,
            };
            for kind in [
                RefType::Tag,
                RefType::Branch,
                RefType::RemoteBranch,
                RefType::Ref,
                RefType::Applied,
                RefType::Unapplied,
            ] {
                if !mask.intersects(kind.kinds()) {
                    continue;
                }
                for name in entry.names(kind) {
                    named.push((
                        position,
                        NamedRef {
                            id: *id,
                            kind,
                            name: name.clone(),
                        },
                    ));
                }
            }
        }
        named.sort_by(|(pa, a), (pb, b)| pa.cmp(pb).then_with(|| a.name.cmp(&b.name)));
        named.into_iter().map(|(_, named)| named).collect()
    }

    pub fn is_patch_name(&self, name: &str) -> bool {
        self.owners.contains_key(&(RefType::Applied, name.to_string()))
    }

    /// one-line summary of the names on `id`, empty when there are none
    pub fn describe(&self, id: &CommitId) -> String {
        let Some(entry) = self.entries.get(id) else {
            return String::new();
        };
        let mut parts = Vec::new();
        if !entry.branches.is_empty() {
            let label = if entry.kinds.contains(RefKinds::CURRENT_BRANCH) {
                "HEAD"
            } else {
                "Branch"
            };
            parts.push(format!("{}: {}", label, entry.branches.join(" ")));
        }
        if !entry.remote_branches.is_empty() {
            parts.push(format!("Remote branch: {}", entry.remote_branches.join(" ")));
        }
        if !entry.tags.is_empty() {
            parts.push(format!("Tag: {}", entry.tags.join(" ")));
        }
        if !entry.refs.is_empty() {
            parts.push(format!("Ref: {}", entry.refs.join(" ")));
        }
        if let Some(patch) = &entry.patch {
            parts.push(format!("Patch: {}", patch));
        }
        parts.join("   ")
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
