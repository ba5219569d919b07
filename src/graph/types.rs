//! core type-safe wrappers for the revision graph.

use std::fmt;

use bitflags::bitflags;
use git2::Oid;

/// A full commit identifier.
///
/// Wraps a 20 byte object id so a commit hash can't be confused with an
/// arbitrary string. Only full-length hex hashes are accepted; abbreviated
/// forms have to be resolved through the reference index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    /// length of the hex form
    pub const HEX_LEN: usize = 40;

    /// length of the raw form
    pub const RAW_LEN: usize = 20;

    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    /// parse a CommitId from a full 40 character hex string
    pub fn from_hex(hex: &str) -> Result<Self, InvalidIdError> {
        if hex.len() != Self::HEX_LEN {
            return Err(InvalidIdError::Length(hex.len()));
        }
        if let Some(c) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(InvalidIdError::NotHex(c));
        }
        Oid::from_str(hex)
            .map(CommitId)
            .map_err(|_| InvalidIdError::NotHex('?'))
    }

    /// build a CommitId from its 20 raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidIdError> {
        if bytes.len() != Self::RAW_LEN {
            return Err(InvalidIdError::Length(bytes.len()));
        }
        Oid::from_bytes(bytes)
            .map(CommitId)
            .map_err(|_| InvalidIdError::Length(bytes.len()))
    }

    /// the fixed-width raw form, used by the on-disk cache
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out.copy_from_slice(self.0.as_bytes());
        out
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// error type for malformed commit identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidIdError {
    Length(usize),
    NotHex(char),
}

impl fmt::Display for InvalidIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length(len) => write!(f, "invalid identifier length: {}", len),
            Self::NotHex(c) => write!(f, "invalid hex character '{}'", c),
        }
    }
}

impl std::error::Error for InvalidIdError {}

/// author or committer of a revision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// parse the `Name <email>` form printed by git
    pub fn parse(line: &str) -> Self {
        match line.rfind('<') {
            Some(open) => {
                let email = line[open + 1..].trim_end().trim_end_matches('>');
                Self::new(line[..open].trim(), email)
            }
            None => Self::new(line.trim(), ""),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.email.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} <{}>", self.name, self.email)
        }
    }
}

/// the namespace a reference name lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefType {
    Tag,
    Branch,
    RemoteBranch,
    Ref,
    Applied,
    Unapplied,
}

impl RefType {
    pub fn kinds(self) -> RefKinds {
        match self {
            Self::Tag => RefKinds::TAG,
            Self::Branch => RefKinds::BRANCH,
            Self::RemoteBranch => RefKinds::REMOTE_BRANCH,
            Self::Ref => RefKinds::REF,
            Self::Applied => RefKinds::APPLIED,
            Self::Unapplied => RefKinds::UNAPPLIED,
        }
    }

    /// patches share one namespace whether applied or not
    pub(crate) fn namespace(self) -> RefType {
        match self {
            Self::Unapplied => Self::Applied,
            other => other,
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Tag => "tag",
            Self::Branch => "branch",
            Self::RemoteBranch => "remote branch",
            Self::Ref => "ref",
            Self::Applied => "applied patch",
            Self::Unapplied => "unapplied patch",
        };
        f.write_str(label)
    }
}

bitflags! {
    /// set of reference kinds attached to a revision
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RefKinds: u8 {
        const TAG = 1;
        const BRANCH = 1 << 1;
        const REMOTE_BRANCH = 1 << 2;
        const CURRENT_BRANCH = 1 << 3;
        const REF = 1 << 4;
        const APPLIED = 1 << 5;
        const UNAPPLIED = 1 << 6;
        const ANY = Self::TAG.bits()
            | Self::BRANCH.bits()
            | Self::REMOTE_BRANCH.bits()
            | Self::REF.bits()
            | Self::APPLIED.bits()
            | Self::UNAPPLIED.bits();
    }
}

/// one name pointing at a revision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefName {
    pub kind: RefType,
    pub name: String,
}

impl RefName {
    pub fn new(kind: RefType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// a reference name together with the revision it points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRef {
    pub id: CommitId,
    pub kind: RefType,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_commit_id_from_hex() {
        let id = CommitId::from_hex(HASH).unwrap();
        assert_eq!(id.to_string(), HASH);
        assert_eq!(id.short(), "0123456");
    }

    #[test]
    fn test_commit_id_rejects_abbreviations() {
        assert_eq!(CommitId::from_hex("0123456"), Err(InvalidIdError::Length(7)));
        let bad = "z123456789abcdef0123456789abcdef01234567";
        assert_eq!(CommitId::from_hex(bad), Err(InvalidIdError::NotHex('z')));
    }

    #[test]
    fn test_commit_id_bytes() {
        let id = CommitId::from_hex(HASH).unwrap();
        let bytes = id.to_bytes();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(CommitId::from_bytes(&bytes).unwrap(), id);
        assert!(CommitId::from_bytes(&bytes[..4]).is_err());
    }

    #[test]
    fn test_signature_parse() {
        let sig = Signature::parse("Jane Doe <jane@example.com>");
        assert_eq!(sig.name, "Jane Doe");
        assert_eq!(sig.email, "jane@example.com");
        assert_eq!(sig.to_string(), "Jane Doe <jane@example.com>");

        let bare = Signature::parse("nobody");
        assert_eq!(bare.name, "nobody");
        assert!(bare.email.is_empty());
    }

    #[test]
    fn test_ref_kinds() {
        assert!(RefKinds::ANY.contains(RefType::Tag.kinds()));
        assert!(!RefKinds::ANY.contains(RefKinds::CURRENT_BRANCH));
        assert_eq!(RefType::Unapplied.namespace(), RefType::Applied);
    }
}
