//! Activity report for a capsule: traffic, errors and received messages.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::{
    access_log::AccessRecord,
    config::Config,
    error::ReportError,
    error_log::ErrorRecord,
    logfile::{self, Period},
    stats::{self, Percentage},
    store::{MessageFilter, MessageStore},
    timestamp,
};

const TOP_N: usize = 3;
const SUCCESS: u16 = 20;
const NO_DESCRIPTION: &str = "no description";

pub fn response_code_label(code: u16) -> Option<&'static str> {
    let label = match code {
        10 => "INPUT",
        11 => "SENSITIVE INPUT",
        20 => "SUCCESS",
        30 => "REDIRECT - TEMPORARY",
        31 => "REDIRECT - PERMANENT",
        40 => "TEMPORARY FAILURE",
        41 => "SERVER UNAVAILABLE",
        42 => "CGI ERROR",
        43 => "PROXY ERROR",
        44 => "SLOW DOWN",
        50 => "PERMANENT FAILURE",
        51 => "NOT FOUND",
        52 => "GONE",
        53 => "PROXY REQUEST REFUSED",
        59 => "BAD REQUEST",
        60 => "CLIENT CERTIFICATE REQUIRED",
        61 => "CERTIFICATE NOT AUTHORISED",
        62 => "CERTIFICATE NOT VALID",
        _ => return None,
    };
    Some(label)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSettings {
    pub capsule_name: String,
    pub internal_prefix: String,
    pub journal_prefix: String,
    pub journal_entries_prefix: String,
    pub feed_path: String,
}

impl From<&Config> for ReportSettings {
    fn from(config: &Config) -> Self {
        Self {
            capsule_name: config.capsule.name.clone(),
            internal_prefix: config.report.internal_prefix.clone(),
            journal_prefix: config.report.journal_prefix.clone(),
            journal_entries_prefix: config.report.journal_entries_prefix.clone(),
            feed_path: config.report.feed_path.clone(),
        }
    }
}

/// Inputs read during a report run.
#[derive(Debug, Clone, Copy)]
pub struct ReportSources<'a> {
    pub access_log: &'a Path,
    pub error_log: Option<&'a Path>,
    pub store: Option<&'a MessageStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCounts {
    pub total: u64,
    pub unread: u64,
}

/// Reads the logs and the message store and assembles the report.
pub fn generate(
    settings: &ReportSettings,
    sources: ReportSources<'_>,
    period: Period,
    generated_at: DateTime<Utc>,
) -> Result<Vec<String>, ReportError> {
    let access = logfile::parse_file::<AccessRecord>(sources.access_log, &period)?;
    if access.skipped > 0 {
        tracing::warn!(
            path = %sources.access_log.display(),
            skipped = access.skipped,
            "access log lines skipped"
        );
    }

    let errors = match sources.error_log {
        Some(path) => {
            let errors = logfile::parse_file::<ErrorRecord>(path, &period)?;
            if errors.skipped > 0 {
                tracing::warn!(
                    path = %path.display(),
                    skipped = errors.skipped,
                    "error log lines skipped"
                );
            }
            Some(errors.records)
        }
        None => None,
    };

    let messages = match sources.store {
        Some(store) => {
            let period_filter = MessageFilter {
                since: period.since,
                until: period.until,
                ..MessageFilter::default()
            };
            let unread_filter = MessageFilter {
                read: Some(false),
                ..period_filter.clone()
            };
            Some(MessageCounts {
                total: store.count(&period_filter)?,
                unread: store.count(&unread_filter)?,
            })
        }
        None => None,
    };

    tracing::info!(
        requests = access.records.len(),
        errors = errors.as_ref().map(Vec::len),
        "assembling report"
    );
    Ok(assemble(
        settings,
        period,
        generated_at,
        &access.records,
        errors.as_deref(),
        messages,
    ))
}

/// Builds the report lines from already parsed inputs. The output depends only
/// on the arguments.
pub fn assemble(
    settings: &ReportSettings,
    period: Period,
    generated_at: DateTime<Utc>,
    access: &[AccessRecord],
    errors: Option<&[ErrorRecord]>,
    messages: Option<MessageCounts>,
) -> Vec<String> {
    let mut lines = vec![
        format!(
            "# Report for {} at {}",
            settings.capsule_name,
            timestamp::display(&generated_at)
        ),
        period_line(&period),
        String::new(),
    ];

    let visible: Vec<&AccessRecord> = access
        .iter()
        .filter(|record| !record.path.starts_with(&settings.internal_prefix))
        .collect();
    let total = visible.len();

    lines.push("## Capsule traffic".to_owned());
    lines.push(String::new());
    lines.push(format!("Total requests: {total}"));
    lines.push(format!(
        "Unique IPs: {}",
        stats::unique_count(&stats::frequency_by_ip(visible.iter().copied()))
    ));
    if let Some(errors) = errors {
        lines.push(format!("Total errors: {}", errors.len()));
    }

    lines.push("Response codes:".to_owned());
    for (code, count) in stats::frequency_by_code(visible.iter().copied()) {
        lines.push(format!(
            "* {code} ({}): {count} ({}%)",
            response_code_label(code).unwrap_or(NO_DESCRIPTION),
            Percentage::of(count, total)
        ));
    }

    let (journal, other): (Vec<&AccessRecord>, Vec<&AccessRecord>) = visible
        .iter()
        .copied()
        .filter(|record| record.status == SUCCESS)
        .partition(|record| record.path.starts_with(&settings.journal_prefix));

    lines.push(String::new());
    lines.push("### Other content".to_owned());
    lines.push(String::new());
    let other_paths = stats::frequency_by_path(other.iter().copied());
    if other_paths.is_empty() {
        lines.push("No other content requested.".to_owned());
    } else {
        lines.push("Most requested pages:".to_owned());
        push_hits(&mut lines, stats::top(&other_paths, TOP_N));
    }

    lines.push(String::new());
    lines.push("### Gemlog".to_owned());
    lines.push(String::new());
    lines.push(format!("Total visits: {}", journal.len()));
    lines.push(format!(
        "Unique IPs: {}",
        stats::unique_count(&stats::frequency_by_ip(journal.iter().copied()))
    ));
    lines.push(format!(
        "Hits on feed: {}",
        journal
            .iter()
            .filter(|record| record.path == settings.feed_path)
            .count()
    ));
    if !journal.is_empty() {
        let entries = stats::frequency_by_path(journal.iter().copied().filter(|record| {
            record.path.starts_with(&settings.journal_entries_prefix)
                && record.path != settings.feed_path
        }));
        lines.push(String::new());
        if entries.is_empty() {
            lines.push("No posts requested.".to_owned());
        } else {
            lines.push("Most popular posts:".to_owned());
            push_hits(&mut lines, stats::top(&entries, TOP_N));
        }
    }

    if let Some(messages) = messages {
        lines.push(String::new());
        lines.push("## Messages".to_owned());
        lines.push(String::new());
        lines.push(format!("Total messages: {}", messages.total));
        lines.push(format!("Unread messages: {}", messages.unread));
    }

    lines
}

fn period_line(period: &Period) -> String {
    match (period.since.as_ref(), period.until.as_ref()) {
        (Some(since), Some(until)) => format!(
            "Period from {} to {}.",
            timestamp::display(since),
            timestamp::display(until)
        ),
        (Some(since), None) => format!("Period from {} to present.", timestamp::display(since)),
        (None, Some(until)) => format!("Period ending {}.", timestamp::display(until)),
        (None, None) => "Period covering all logged activity.".to_owned(),
    }
}

fn push_hits(lines: &mut Vec<String>, entries: &[(String, usize)]) {
    for (path, hits) in entries {
        lines.push(format!("* {path} ({hits} hits)"));
    }
}
