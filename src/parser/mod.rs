//! Parsers for the text streams produced by git.
//!
//! `log` turns `git log -z` output into commit records, `diff` turns
//! `git diff-tree` output into file changes. Both are lenient: anything
//! that cannot be understood is skipped, never fatal.

mod diff;
mod error;
mod log;

pub use diff::{parse_diff, ChangeStatus, FileChange};
pub use error::{ParseError, ParseResult};
pub use log::{parse_log_record, LogRecords, LOG_FORMAT, RECORD_SEPARATOR};
