//! Molly Brown error log records: `<date> <time> <message...>`.

use chrono::{DateTime, Utc};

use crate::{error::ParseError, logfile::LogRecord, timestamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub time: DateTime<Utc>,
    pub message: String,
}

impl LogRecord for ErrorRecord {
    const KIND: &'static str = "error log";

    fn parse_line(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some((date, rest)) = next_token(line) else {
            return Err(ParseError::MissingFields {
                expected: 2,
                found: 0,
            });
        };
        let Some((clock, rest)) = next_token(rest) else {
            return Err(ParseError::MissingFields {
                expected: 2,
                found: 1,
            });
        };

        let raw_time = format!("{date} {clock}");
        let time = timestamp::parse_flexible(&raw_time)
            .ok_or(ParseError::InvalidTimestamp(raw_time))?;

        Ok(Self {
            time,
            message: rest.trim_start().to_owned(),
        })
    }

    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Splits off the first whitespace-delimited token, leaving the remainder untouched.
fn next_token(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    Some(text.split_at(end))
}
