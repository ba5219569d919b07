//! On-disk history cache.
//!
//! A cache file is two bincode values back to back:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header: magic, format version, identity, head│  validated first
//! ├──────────────────────────────────────────────┤
//! │ Body:   identifier table ([u8; 20] each)     │
//! │         revision records (ids as indices)    │
//! │         file-change lists                    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Files are replaced atomically, so a reader never sees a half-written
//! cache. A cache that is missing, foreign, stale or corrupt is reported
//! as a [`CacheError`] and the caller does a full load instead.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bincode::Options;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::graph::{CommitId, CommitRecord, Signature};
use crate::loader::error::{CacheError, CacheResult};
use crate::loader::files::{FileChangeKey, FileChanges};

const MAGIC: [u8; 4] = *b"RVGC";

/// bumped whenever the layout below changes
pub const FORMAT_VERSION: u32 = 1;

/// refuse to allocate more than this while decoding
const MAX_CACHE_BYTES: u64 = 1 << 30;

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_CACHE_BYTES)
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    version: u32,
    identity: String,
    head: Option<[u8; 20]>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Body {
    ids: Vec<[u8; 20]>,
    revisions: Vec<CachedRevision>,
    files: Vec<CachedFiles>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedRevision {
    id: u32,
    parents: Vec<u32>,
    boundary: bool,
    author: (String, String),
    committer: (String, String),
    author_time: i64,
    short_log: String,
    long_log: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedFiles {
    id: u32,
    all_merge: bool,
    changes: FileChanges,
}

/// interns identifiers into the body's table
#[derive(Default)]
struct IdTable {
    ids: Vec<[u8; 20]>,
    positions: HashMap<CommitId, u32>,
}

impl IdTable {
    fn intern(&mut self, id: &CommitId) -> u32 {
        if let Some(&pos) = self.positions.get(id) {
            return pos;
        }
        let pos = self.ids.len() as u32;
        self.ids.push(id.to_bytes());
        self.positions.insert(*id, pos);
        pos
    }
}

/// what a cache file holds, decoded
#[derive(Debug, Default)]
pub struct CachedHistory {
    pub head: Option<CommitId>,
    /// in load order
    pub revisions: Vec<CommitRecord>,
    pub files: Vec<(FileChangeKey, FileChanges)>,
}

/// One repository's cache file.
#[derive(Debug, Clone)]
pub struct HistoryCache {
    path: PathBuf,
    identity: String,
}

impl HistoryCache {
    /// Cache for `identity` inside `dir`. The file name is derived from the
    /// identity so several repositories can share a directory.
    pub fn new(dir: impl AsRef<Path>, identity: &str) -> CacheResult<Self> {
        let name = git2::Oid::hash_object(git2::ObjectType::Blob, identity.as_bytes())?;
        Ok(Self {
            path: dir.as_ref().join(format!("{}.bin", name)),
            identity: identity.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write revisions (in load order) and file lists, replacing any
    /// previous cache.
    pub fn save(
        &self,
        head: Option<CommitId>,
        revisions: &[CommitRecord],
        files: &[(FileChangeKey, Arc<FileChanges>)],
    ) -> CacheResult<()> {
        let mut table = IdTable::default();
        let mut body = Body::default();

        for rev in revisions {
            body.revisions.push(CachedRevision {
                id: table.intern(&rev.id),
                parents: rev.parents.iter().map(|p| table.intern(p)).collect(),
                boundary: rev.boundary,
                author: (rev.author.name.clone(), rev.author.email.clone()),
                committer: (rev.committer.name.clone(), rev.committer.email.clone()),
                author_time: rev.author_date.timestamp(),
                short_log: rev.short_log.clone(),
                long_log: rev.long_log.clone(),
            });
        }
        for (key, changes) in files {
            let all_merge = match key {
                FileChangeKey::Single(_) => false,
                FileChangeKey::AllMerge(_) => true,
                FileChangeKey::Pair(..) => continue,
            };
            body.files.push(CachedFiles {
                id: table.intern(&key.id()),
                all_merge,
                changes: FileChanges::clone(changes),
            });
        }
        body.ids = table.ids;

        let header = Header {
            magic: MAGIC,
            version: FORMAT_VERSION,
            identity: self.identity.clone(),
            head: head.map(|h| h.to_bytes()),
        };

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        codec().serialize_into(&mut tmp, &header)?;
        codec().serialize_into(&mut tmp, &body)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| CacheError::Io(e.error))?;

        tracing::debug!(
            path = %self.path.display(),
            revisions = revisions.len(),
            files = body.files.len(),
            "saved history cache"
        );
        Ok(())
    }

    /// Read the cache, checking it was written for `head`.
    pub fn load(&self, head: Option<CommitId>) -> CacheResult<CachedHistory> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::Missing(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);

        let header: Header = codec()
            .deserialize_from(&mut reader)
            .map_err(|e| CacheError::Format(format!("unreadable header: {}", e)))?;
        if header.magic != MAGIC {
            return Err(CacheError::Format("bad magic".to_string()));
        }
        if header.version != FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                expected: FORMAT_VERSION,
                found: header.version,
            });
        }
        if header.identity != self.identity {
            return Err(CacheError::Stale(format!(
                "written for {}",
                header.identity
            )));
        }
        let cached_head = header.head.map(|h| to_id(&h)).transpose()?;
        if cached_head != head {
            return Err(CacheError::Stale("head moved".to_string()));
        }

        let body: Body = codec()
            .deserialize_from(&mut reader)
            .map_err(|e| CacheError::Format(format!("unreadable body: {}", e)))?;
        decode(body, cached_head)
    }

    pub fn remove(&self) -> CacheResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn to_id(bytes: &[u8; 20]) -> CacheResult<CommitId> {
    CommitId::from_bytes(bytes).map_err(|e| CacheError::Format(e.to_string()))
}

fn decode(body: Body, head: Option<CommitId>) -> CacheResult<CachedHistory> {
    let ids = body
        .ids
        .iter()
        .map(to_id)
        .collect::<CacheResult<Vec<_>>>()?;
    let lookup = |pos: u32| {
        ids.get(pos as usize)
            .copied()
            .ok_or_else(|| CacheError::Format(format!("identifier {} out of range", pos)))
    };

    let mut revisions = Vec::with_capacity(body.revisions.len());
    for rev in body.revisions {
        let author_date = DateTime::from_timestamp(rev.author_time, 0)
            .ok_or_else(|| CacheError::Format(format!("bad timestamp {}", rev.author_time)))?;
        revisions.push(CommitRecord {
            id: lookup(rev.id)?,
            parents: rev
                .parents
                .iter()
                .map(|&p| lookup(p))
                .collect::<CacheResult<Vec<_>>>()?,
            boundary: rev.boundary,
            author: Signature::new(rev.author.0, rev.author.1),
            committer: Signature::new(rev.committer.0, rev.committer.1),
            author_date,
            short_log: rev.short_log,
            long_log: rev.long_log,
        });
    }

    let mut files = Vec::with_capacity(body.files.len());
    for entry in body.files {
        let id = lookup(entry.id)?;
        let key = if entry.all_merge {
            FileChangeKey::AllMerge(id)
        } else {
            FileChangeKey::Single(id)
        };
        files.push((key, entry.changes));
    }

    Ok(CachedHistory {
        head,
        revisions,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ChangeStatus, FileChange};
    use crate::source::memory::{commit, test_id};
    use tempfile::TempDir;

    fn sample() -> (Vec<CommitRecord>, Vec<(FileChangeKey, Arc<FileChanges>)>) {
        let mut merge = commit(4, &[3, 2]);
        merge.long_log = "body\n\nmore".to_string();
        merge.author = Signature::new("J\u{e4}ne", "");
        let mut boundary = commit(1, &[]);
        boundary.boundary = true;
        let revisions = vec![merge, commit(3, &[1]), commit(2, &[1]), boundary];

        let mut rename = FileChange::new(ChangeStatus::Renamed, "new.rs");
        rename.source = Some("old.rs".to_string());
        rename.similarity = Some(90);
        let files = vec![
            (
                FileChangeKey::Single(test_id(3)),
                Arc::new(FileChanges::new(vec![rename])),
            ),
            (
                FileChangeKey::AllMerge(test_id(4)),
                Arc::new(FileChanges::new(vec![FileChange::new(
                    ChangeStatus::Added,
                    "a.rs",
                )])),
            ),
            (
                FileChangeKey::Pair(test_id(4), test_id(1)),
                Arc::new(FileChanges::default()),
            ),
        ];
        (revisions, files)
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = HistoryCache::new(dir.path(), "repo").unwrap();
        let (revisions, files) = sample();

        cache.save(Some(test_id(4)), &revisions, &files).unwrap();
        assert!(cache.exists());

        let loaded = cache.load(Some(test_id(4))).unwrap();
        assert_eq!(loaded.head, Some(test_id(4)));
        assert_eq!(loaded.revisions, revisions);
        // pair diffs are never persisted
        assert_eq!(loaded.files.len(), 2);
        assert_eq!(loaded.files[0].0, FileChangeKey::Single(test_id(3)));
        assert_eq!(loaded.files[0].1, *files[0].1);
        assert_eq!(loaded.files[1].0, FileChangeKey::AllMerge(test_id(4)));
    }

    #[test]
    fn test_file_name_per_identity() {
        let dir = TempDir::new().unwrap();
        let a = HistoryCache::new(dir.path(), "/repos/a/.git").unwrap();
        let b = HistoryCache::new(dir.path(), "/repos/b/.git").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(a.path().extension().unwrap(), "bin");
    }

    #[test]
    fn test_missing() {
        let dir = TempDir::new().unwrap();
        let cache = HistoryCache::new(dir.path(), "repo").unwrap();
        let err = cache.load(None).unwrap_err();
        assert!(matches!(err, CacheError::Missing(_)));
        assert!(err.is_cache_miss());
        cache.remove().unwrap();
    }

    #[test]
    fn test_stale_head_and_identity() {
        let dir = TempDir::new().unwrap();
        let cache = HistoryCache::new(dir.path(), "repo").unwrap();
        let (revisions, files) = sample();
        cache.save(Some(test_id(4)), &revisions, &files).unwrap();

        assert!(matches!(
            cache.load(Some(test_id(9))),
            Err(CacheError::Stale(_))
        ));
        assert!(matches!(cache.load(None), Err(CacheError::Stale(_))));

        // same file, read as another repository
        let other = HistoryCache {
            path: cache.path().to_path_buf(),
            identity: "elsewhere".to_string(),
        };
        assert!(matches!(
            other.load(Some(test_id(4))),
            Err(CacheError::Stale(_))
        ));
    }

    #[test]
    fn test_bad_magic_and_version() {
        let dir = TempDir::new().unwrap();
        let cache = HistoryCache::new(dir.path(), "repo").unwrap();

        fs::write(cache.path(), b"definitely not a cache file").unwrap();
        assert!(matches!(cache.load(None), Err(CacheError::Format(_))));

        let header = Header {
            magic: MAGIC,
            version: FORMAT_VERSION + 1,
            identity: "repo".to_string(),
            head: None,
        };
        fs::write(cache.path(), codec().serialize(&header).unwrap()).unwrap();
        assert!(matches!(
            cache.load(None),
            Err(CacheError::VersionMismatch { found, .. }) if found == FORMAT_VERSION + 1
        ));
    }

    #[test]
    fn test_truncated_body() {
        let dir = TempDir::new().unwrap();
        let cache = HistoryCache::new(dir.path(), "repo").unwrap();
        let (revisions, files) = sample();
        cache.save(None, &revisions, &files).unwrap();

        let bytes = fs::read(cache.path()).unwrap();
        fs::write(cache.path(), &bytes[..bytes.len() - 10]).unwrap();
        let err = cache.load(None).unwrap_err();
        assert!(matches!(err, CacheError::Format(_)));
    }
}
