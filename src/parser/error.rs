//! Line parser errors.

use thiserror::Error;

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while parsing one record of tool output.
///
/// None of these abort a load: the offending record is skipped and the
/// stream goes on.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("empty record")]
    Empty,

    #[error("missing header line")]
    MissingHeader,

    #[error("bad commit hash: {0:?}")]
    BadHash(String),

    #[error("bad timestamp: {0:?}")]
    BadTimestamp(String),

    /// the record ended before this field
    #[error("truncated record, missing {0}")]
    Truncated(&'static str),
}

impl ParseError {
    /// the stream itself failed, not just one record
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParseError::Io(_))
    }
}
