//! `git diff-tree` output parser.
//!
//! Two line shapes are understood:
//!
//! ```text
//! :100644 100644 1f2e.. 3a4b.. M\tsrc/lib.rs          raw
//! :100644 100644 1f2e.. 3a4b.. R086\told.rs\tnew.rs   raw rename
//! ::100644 100644 100644 1f.. 2e.. 3a.. MM\tfile      combined (merge)
//! M\tsrc/lib.rs                                       compact
//! R\told.rs --> new.rs                                compact rename
//! ```
//!
//! Lines holding only a commit hash separate the sections of a merge diffed
//! against each parent (`diff-tree -m`); they advance the parent index.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    TypeChanged,
    Unmerged,
    Unknown,
}

impl ChangeStatus {
    pub fn from_char(c: char) -> Self {
        match c {
            'A' => Self::Added,
            'M' => Self::Modified,
            'D' => Self::Deleted,
            'R' => Self::Renamed,
            'C' => Self::Copied,
            'T' => Self::TypeChanged,
            'U' => Self::Unmerged,
            _ => Self::Unknown,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
            Self::Renamed => 'R',
            Self::Copied => 'C',
            Self::TypeChanged => 'T',
            Self::Unmerged => 'U',
            Self::Unknown => 'X',
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// one changed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub status: ChangeStatus,
    pub path: String,
    /// original path of a rename or copy
    pub source: Option<String>,
    /// rename/copy similarity, 0..=100
    pub similarity: Option<u8>,
    /// parent the change is relative to, 0 unless diffed against all parents
    pub parent: usize,
}

impl FileChange {
    pub fn new(status: ChangeStatus, path: impl Into<String>) -> Self {
        Self {
            status,
            path: path.into(),
            source: None,
            similarity: None,
            parent: 0,
        }
    }
}

/// Parse diff-tree output, skipping lines that are not file changes.
pub fn parse_diff(text: &str) -> Vec<FileChange> {
    let mut changes = Vec::new();
    let mut sections = 0usize;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if is_hash_header(line) {
            sections += 1;
            continue;
        }
        let parent = sections.saturating_sub(1);

        let parsed = if line.starts_with(':') {
            parse_raw(line)
        } else {
            parse_compact(line)
        };
        match parsed {
            Some(mut change) => {
                change.parent = parent;
                changes.push(change);
            }
            None => tracing::trace!(line, "skipping unrecognized diff line"),
        }
    }
    changes
}

/// `<sha>` or `<sha> (from <sha>)`
fn is_hash_header(line: &str) -> bool {
    let first = line.split_ascii_whitespace().next().unwrap_or_default();
    first.len() == 40 && first.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_raw(line: &str) -> Option<FileChange> {
    let (meta, paths) = line.split_once('\t')?;
    let status_field = meta.split_ascii_whitespace().last()?;

    let mut chars = status_field.chars();
    let status = ChangeStatus::from_char(chars.next()?);
    let similarity = chars.as_str().parse::<u8>().ok().filter(|_| {
        matches!(status, ChangeStatus::Renamed | ChangeStatus::Copied)
    });

    let mut paths = paths.split('\t');
    let first = unquote(paths.next()?);
    match paths.next() {
        Some(second) => Some(FileChange {
            status,
            path: unquote(second),
            source: Some(first),
            similarity,
            parent: 0,
        }),
        None => Some(FileChange {
            similarity,
            ..FileChange::new(status, first)
        }),
    }
}

fn parse_compact(line: &str) -> Option<FileChange> {
    let (status_field, rest) = line.split_once('\t')?;
    let mut chars = status_field.chars();
    let status = ChangeStatus::from_char(chars.next()?);
    let similarity = chars.as_str().parse::<u8>().ok();

    match rest.split_once(" --> ") {
        Some((src, dst)) => Some(FileChange {
            status,
            path: unquote(dst),
            source: Some(unquote(src)),
            similarity,
            parent: 0,
        }),
        None => Some(FileChange {
            similarity,
            ..FileChange::new(status, unquote(rest))
        }),
    }
}

/// Undo git's C-style path quoting (`"a\303\244b"`).
fn unquote(path: &str) -> String {
    let inner = match path.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
        Some(inner) => inner,
        None => return path.to_string(),
    };

    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let next = bytes[i + 1];
        let octal = bytes
            .get(i + 1..i + 4)
            .filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)));
        match (next, octal) {
            (_, Some(digits)) => {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(value as u8);
                i += 4;
                continue;
            }
            (b'n', _) => out.push(b'\n'),
            (b't', _) => out.push(b'\t'),
            (b'r', _) => out.push(b'\r'),
            (b'a', _) => out.push(0x07),
            (b'b', _) => out.push(0x08),
            (b'f', _) => out.push(0x0c),
            (b'v', _) => out.push(0x0b),
            (other, _) => out.push(other),
        }
        i += 2;
    }
    String::from_utf8_lossy(&out).into_owned()
}
