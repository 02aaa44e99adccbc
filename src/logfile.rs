use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use chrono::{DateTime, Utc};

use crate::error::{ConfigError, ParseError};

/// A record type that can be read from one line of a Molly Brown log.
pub trait LogRecord: Sized {
    /// Human-readable name used in diagnostics.
    const KIND: &'static str;

    fn parse_line(line: &str) -> Result<Self, ParseError>;

    fn time(&self) -> DateTime<Utc>;
}

/// Reporting window. Both bounds are exclusive when applied to log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Period {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Period {
    pub fn new(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self { since, until }
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        self.since.is_none_or(|since| *time > since)
            && self.until.is_none_or(|until| *time < until)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLog<T> {
    pub records: Vec<T>,
    /// Non-blank lines that failed to parse. They are absent from `records`.
    pub skipped: usize,
}

pub fn parse_file<T: LogRecord>(
    path: &Path,
    period: &Period,
) -> Result<ParsedLog<T>, ConfigError> {
    let unreadable = |source| ConfigError::Unreadable {
        kind: T::KIND,
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(unreadable)?;
    parse_reader(BufReader::new(file), period).map_err(unreadable)
}

/// Parses every line of `reader`, decoding invalid UTF-8 lossily and skipping
/// lines that do not parse.
pub fn parse_reader<T: LogRecord, R: BufRead>(
    mut reader: R,
    period: &Period,
) -> std::io::Result<ParsedLog<T>> {
    let mut records = Vec::new();
    let mut skipped = 0;
    let mut buf = Vec::new();
    let mut line_number = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_number += 1;

        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }

        match T::parse_line(&line) {
            Ok(record) if period.contains(&record.time()) => records.push(record),
            Ok(_) => {}
            Err(err) => {
                skipped += 1;
                tracing::warn!(
                    kind = T::KIND,
                    line = line_number,
                    "skipping malformed log line: {err}"
                );
            }
        }
    }

    Ok(ParsedLog { records, skipped })
}
