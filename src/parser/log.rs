//! `git log -z` record parser.
//!
//! Each record is produced by [`LOG_FORMAT`] and ends with a NUL byte:
//!
//! ```text
//! -<sha> <parent> <parent>...      mark + hash + parents
//! Author Name <author@mail>
//! Committer Name <committer@mail>
//! 1700000000                       author time, unix seconds
//! subject
//! body...
//! ```

use std::io::BufRead;

use chrono::{DateTime, Utc};

use crate::graph::{CommitId, CommitRecord, Signature};
use crate::parser::error::{ParseError, ParseResult};

/// byte terminating every record in the stream
pub const RECORD_SEPARATOR: u8 = b'\0';

/// pretty format passed to `git log`
pub const LOG_FORMAT: &str = "%m%H %P%n%an <%ae>%n%cn <%ce>%n%at%n%s%n%b";

/// Parse one record, without its separator.
///
/// Invalid UTF-8 is replaced rather than rejected.
pub fn parse_log_record(raw: &[u8]) -> ParseResult<CommitRecord> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_start_matches(['\n', '\r']);
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let mut lines = text.splitn(6, '\n');
    let header = lines.next().ok_or(ParseError::MissingHeader)?;
    let (id, parents, boundary) = parse_header(header)?;

    let author = lines.next().ok_or(ParseError::Truncated("author"))?;
    let committer = lines.next().ok_or(ParseError::Truncated("committer"))?;
    let time = lines.next().ok_or(ParseError::Truncated("author time"))?;
    let author_date = parse_time(time)?;
    let short_log = lines.next().unwrap_or_default();
    let long_log = lines.next().unwrap_or_default();

    Ok(CommitRecord {
        id,
        parents,
        boundary,
        author: Signature::parse(author),
        committer: Signature::parse(committer),
        author_date,
        short_log: short_log.trim_end_matches('\r').to_string(),
        long_log: long_log.trim_end().to_string(),
    })
}

fn parse_header(line: &str) -> ParseResult<(CommitId, Vec<CommitId>, bool)> {
    let line = line.trim_end();
    if line.is_empty() {
        return Err(ParseError::MissingHeader);
    }

    let (boundary, rest) = match line.as_bytes()[0] {
        b'-' => (true, &line[1..]),
        b'<' | b'>' => (false, &line[1..]),
        _ => (false, line),
    };

    let mut hashes = rest.split_ascii_whitespace();
    let id = hashes.next().ok_or(ParseError::MissingHeader)?;
    let id = parse_hash(id)?;
    let parents = hashes.map(parse_hash).collect::<ParseResult<Vec<_>>>()?;
    Ok((id, parents, boundary))
}

fn parse_hash(hex: &str) -> ParseResult<CommitId> {
    CommitId::from_hex(hex).map_err(|_| ParseError::BadHash(hex.to_string()))
}

fn parse_time(line: &str) -> ParseResult<DateTime<Utc>> {
    let line = line.trim();
    line.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| ParseError::BadTimestamp(line.to_string()))
}

/// Splits a byte stream on [`RECORD_SEPARATOR`] and parses each record.
///
/// Blank chunks (e.g. a trailing newline after the last separator) are
/// skipped silently.
pub struct LogRecords<R> {
    reader: R,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> LogRecords<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for LogRecords<R> {
    type Item = ParseResult<CommitRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(RECORD_SEPARATOR, &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    if self.buf.last() == Some(&RECORD_SEPARATOR) {
                        self.buf.pop();
                    }
                    if self.buf.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Some(parse_log_record(&self.buf));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}
