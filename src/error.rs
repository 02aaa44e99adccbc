use std::path::PathBuf;

use thiserror::Error;

/// Failures of the message store. Callers facing a remote sender must log
/// these and answer with a generic failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("create storage dir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("open sqlite {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{context}: {source}")]
    Sqlite {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("unsupported messages.db schema version {found} (expected {expected})")]
    SchemaVersion { found: i32, expected: i32 },
    #[error("invalid stored timestamp `{0}`")]
    InvalidTimestamp(String),
    #[error("message store lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub(crate) fn sqlite(context: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Sqlite { context, source }
    }
}

/// A log line that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected at least {expected} fields, found {found}")]
    MissingFields { expected: usize, found: usize },
    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),
    #[error("invalid response code `{0}`")]
    InvalidResponseCode(String),
}

/// Problems with the inputs of a run: missing files or a bad configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {kind} {path}: {source}")]
    Unreadable {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("message database {path} is not usable: {source}")]
    Database {
        path: PathBuf,
        #[source]
        source: StorageError,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Failure of a report run. Both kinds are fatal to the run.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("count messages: {0}")]
    Storage(#[from] StorageError),
}

/// A malformed SCGI request from the front-end server.
#[derive(Debug, Error)]
pub enum ScgiError {
    #[error("read scgi request: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid netstring length `{0}`")]
    InvalidLength(String),
    #[error("scgi header block of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("scgi header block is not terminated by `,`")]
    MissingTerminator,
    #[error("scgi header block has an unpaired name `{0}`")]
    UnpairedHeader(String),
    #[error("first scgi header must be CONTENT_LENGTH")]
    MissingContentLength,
    #[error("invalid CONTENT_LENGTH `{0}`")]
    InvalidContentLength(String),
}
