//! Molly Brown access log records.
//!
//! Each line reads `<timestamp> <ip> <code> <request-uri>`, where the request
//! URI may be missing for requests the server could not read.

use chrono::{DateTime, Utc};
use url::Url;

use crate::{error::ParseError, logfile::LogRecord, timestamp};

const RELATIVE_BASE: &str = "gemini://relative.invalid/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub time: DateTime<Utc>,
    pub ip_addr: String,
    pub status: u16,
    pub netloc: String,
    pub path: String,
    pub params: String,
    pub query: String,
    pub fragment: String,
    /// The request URI exactly as logged.
    pub request: String,
}

/// The five generic components of a request URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTarget {
    pub netloc: String,
    pub path: String,
    pub params: String,
    pub query: String,
    pub fragment: String,
}

impl LogRecord for AccessRecord {
    const KIND: &'static str = "access log";

    fn parse_line(line: &str) -> Result<Self, ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(ParseError::MissingFields {
                expected: 3,
                found: tokens.len(),
            });
        }

        let time = timestamp::parse_flexible(tokens[0])
            .ok_or_else(|| ParseError::InvalidTimestamp(tokens[0].to_owned()))?;
        let status = tokens[2]
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidResponseCode(tokens[2].to_owned()))?;
        let request = tokens.get(3).copied().unwrap_or_default().to_owned();
        let RequestTarget {
            netloc,
            path,
            params,
            query,
            fragment,
        } = split_request(&request);

        Ok(Self {
            time,
            ip_addr: tokens[1].to_owned(),
            status,
            netloc,
            path,
            params,
            query,
            fragment,
            request,
        })
    }

    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Splits a request URI into network location, path, parameters, query and
/// fragment. Parameters are whatever follows a `;` in the last path segment.
///
/// A URI that cannot be parsed at all keeps its raw text as the path.
pub fn split_request(raw: &str) -> RequestTarget {
    if raw.is_empty() {
        return RequestTarget::default();
    }

    let relative = matches!(Url::parse(raw), Err(url::ParseError::RelativeUrlWithoutBase));
    let parsed = if relative {
        Url::parse(RELATIVE_BASE).and_then(|base| base.join(raw))
    } else {
        Url::parse(raw)
    };
    let url = match parsed {
        Ok(url) => url,
        Err(err) => {
            tracing::debug!(request = raw, "unparseable request URI: {err}");
            return RequestTarget {
                path: raw.to_owned(),
                ..RequestTarget::default()
            };
        }
    };

    let netloc = if relative && !raw.starts_with("//") {
        String::new()
    } else {
        url.authority().to_owned()
    };
    let (path, params) = split_params(url.path());

    RequestTarget {
        netloc,
        path: path.to_owned(),
        params: params.to_owned(),
        query: url.query().unwrap_or_default().to_owned(),
        fragment: url.fragment().unwrap_or_default().to_owned(),
    }
}

fn split_params(path: &str) -> (&str, &str) {
    let last_segment = path.rfind('/').unwrap_or(0);
    match path[last_segment..].find(';') {
        Some(offset) => {
            let split = last_segment + offset;
            (&path[..split], &path[split + 1..])
        }
        None => (path, ""),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};

    use super::{AccessRecord, RequestTarget, split_request};
    use crate::{error::ParseError, logfile::LogRecord};

    #[test]
    fn parses_gemini_request_line() {
        let record = AccessRecord::parse_line(
            "2022-04-20T12:06:00Z 127.0.0.1 20 gemini://example.org/gemlog/posts/2022-test.gmi",
        )
        .unwrap();

        assert_eq!(record.time, Utc.with_ymd_and_hms(2022, 4, 20, 12, 6, 0).unwrap());
        assert_eq!(record.ip_addr, "127.0.0.1");
        assert_eq!(record.status, 20);
        assert_eq!(record.netloc, "example.org");
        assert_eq!(record.path, "/gemlog/posts/2022-test.gmi");
        assert_eq!(record.query, "");
        assert_eq!(
            record.request,
            "gemini://example.org/gemlog/posts/2022-test.gmi"
        );
    }

    #[test]
    fn offset_timestamps_are_normalized_to_utc() {
        let record =
            AccessRecord::parse_line("2022-04-20T14:06:00+02:00 10.0.0.1 51 gemini://host/missing")
                .unwrap();
        assert_eq!(record.time, Utc.with_ymd_and_hms(2022, 4, 20, 12, 6, 0).unwrap());
    }

    #[test]
    fn missing_request_uri_yields_empty_components() {
        let record = AccessRecord::parse_line("2022-04-20T12:06:00Z 10.0.0.1 59").unwrap();
        assert_eq!(record.status, 59);
        assert_eq!(record.request, "");
        assert_eq!(record.path, "");
        assert_eq!(record.netloc, "");
    }

    #[test]
    fn rejects_short_lines_and_bad_codes() {
        assert_eq!(
            AccessRecord::parse_line("2022-04-20T12:06:00Z 10.0.0.1"),
            Err(ParseError::MissingFields {
                expected: 3,
                found: 2
            })
        );
        assert_eq!(
            AccessRecord::parse_line("2022-04-20T12:06:00Z 10.0.0.1 OK gemini://host/"),
            Err(ParseError::InvalidResponseCode("OK".to_owned()))
        );
        assert_eq!(
            AccessRecord::parse_line("whenever 10.0.0.1 20 gemini://host/"),
            Err(ParseError::InvalidTimestamp("whenever".to_owned()))
        );
    }

    #[test]
    fn splits_all_uri_components() {
        assert_eq!(
            split_request("gemini://example.org:1965/contact/leave;v=1?hello%20there#top"),
            RequestTarget {
                netloc: "example.org:1965".to_owned(),
                path: "/contact/leave".to_owned(),
                params: "v=1".to_owned(),
                query: "hello%20there".to_owned(),
                fragment: "top".to_owned(),
            }
        );
    }

    #[test]
    fn parameters_only_come_from_the_last_segment() {
        let target = split_request("gemini://example.org/a;b/c.gmi");
        assert_eq!(target.path, "/a;b/c.gmi");
        assert_eq!(target.params, "");
    }

    #[test]
    fn relative_references_have_no_network_location() {
        let target = split_request("/gemlog/index.gmi?x");
        assert_eq!(target.netloc, "");
        assert_eq!(target.path, "/gemlog/index.gmi");
        assert_eq!(target.query, "x");

        let network_path = split_request("//example.org/about.gmi");
        assert_eq!(network_path.netloc, "example.org");
        assert_eq!(network_path.path, "/about.gmi");
    }
}
