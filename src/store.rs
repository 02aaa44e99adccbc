use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, params, params_from_iter, types::Value};

use crate::{error::StorageError, timestamp};

const SCHEMA_VERSION: i32 = 1;
const SQLITE_MAX_BIND_PARAMS: usize = 999;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MESSAGE_COLUMNS: &str =
    "rowid, script_path, path_info, tls_client_hash, ip_addr, time, message, read";

/// Row identifier assigned by SQLite at insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(i64);

impl MessageId {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields supplied by the caller when a visitor leaves a message.
///
/// Absent values are empty strings, never `None`, so that equality filters can
/// select them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub script_path: String,
    pub path_info: String,
    pub tls_client_hash: String,
    pub ip_addr: String,
    pub time: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub script_path: String,
    pub path_info: String,
    pub tls_client_hash: String,
    pub ip_addr: String,
    pub time: DateTime<Utc>,
    pub message: String,
    pub read: bool,
}

/// Conjunctive filter over the `messages` table. `None` fields match anything.
///
/// The time range is asymmetric: with both bounds the match is
/// inclusive on each end, while a lone `since` or a lone `until` excludes its
/// boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub script_path: Option<String>,
    pub path_info: Option<String>,
    pub tls_client_hash: Option<String>,
    pub ip_addr: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub read: Option<bool>,
    pub ids: Option<Vec<MessageId>>,
}

impl MessageFilter {
    pub fn unread() -> Self {
        Self {
            read: Some(false),
            ..Self::default()
        }
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut predicates: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        match (self.since.as_ref(), self.until.as_ref()) {
            // Stored times are whole seconds, so fractional bounds are rounded
            // toward the side that keeps each comparison exact.
            (Some(since), Some(until)) => {
                predicates.push("time BETWEEN ? AND ?".to_owned());
                params.push(Value::Text(timestamp::to_storage(&timestamp::ceil_second(since))));
                params.push(Value::Text(timestamp::to_storage(until)));
            }
            (Some(since), None) => {
                predicates.push("time > ?".to_owned());
                params.push(Value::Text(timestamp::to_storage(since)));
            }
            (None, Some(until)) => {
                predicates.push("time < ?".to_owned());
                params.push(Value::Text(timestamp::to_storage(&timestamp::ceil_second(until))));
            }
            (None, None) => {}
        }

        let text_filters = [
            ("script_path", self.script_path.as_ref()),
            ("path_info", self.path_info.as_ref()),
            ("tls_client_hash", self.tls_client_hash.as_ref()),
            ("ip_addr", self.ip_addr.as_ref()),
        ];
        for (column, value) in text_filters {
            if let Some(value) = value {
                predicates.push(format!("{column} = ?"));
                params.push(Value::Text(value.clone()));
            }
        }

        if let Some(read) = self.read {
            predicates.push("read = ?".to_owned());
            params.push(Value::Integer(i64::from(read)));
        }

        if let Some(ids) = self.ids.as_ref() {
            if ids.is_empty() {
                // an empty id set selects nothing
                predicates.push("0".to_owned());
            } else {
                predicates.push(format!("rowid IN ({})", placeholders(ids.len())));
                params.extend(ids.iter().map(|id| Value::Integer(id.0)));
            }
        }

        if predicates.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", predicates.join(" AND ")), params)
        }
    }
}

/// Single-table message store.
///
/// One connection is shared by every caller and guarded by one mutex. Each
/// operation holds the lock from statement preparation until its last row has
/// been read, so callers never observe a partially applied write or another
/// caller's results.
#[derive(Debug)]
pub struct MessageStore {
    db_path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl MessageStore {
    /// Opens (creating if needed) the database at `db_path` and applies the schema.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let mut conn = open_connection(&db_path, flags)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StorageError::sqlite("set PRAGMA journal_mode=WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(StorageError::sqlite("set PRAGMA synchronous=NORMAL"))?;
        migrate(&mut conn)?;

        tracing::debug!(path = %db_path.display(), "opened message store");
        Ok(Self {
            db_path: Some(db_path),
            conn: Mutex::new(conn),
        })
    }

    /// Opens a database that must already exist and carry the current schema.
    ///
    /// An unversioned database is accepted as long as it already has the
    /// `messages` table; it is left as found.
    pub fn open_existing(db_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let db_path = db_path.into();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = open_connection(&db_path, flags)?;
        let found = user_version(&conn)?;
        let unversioned_with_table = found == 0 && has_messages_table(&conn)?;
        if found != SCHEMA_VERSION && !unversioned_with_table {
            return Err(StorageError::SchemaVersion {
                found,
                expected: SCHEMA_VERSION,
            });
        }

        Ok(Self {
            db_path: Some(db_path),
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let mut conn = Connection::open_in_memory().map_err(|source| StorageError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrate(&mut conn)?;
        Ok(Self {
            db_path: None,
            conn: Mutex::new(conn),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Appends an unread message and returns its row identifier.
    pub fn insert(&self, message: &NewMessage) -> Result<MessageId, StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO messages (
              script_path,
              path_info,
              tls_client_hash,
              ip_addr,
              time,
              message,
              read
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
            "#,
            params![
                message.script_path,
                message.path_info,
                message.tls_client_hash,
                message.ip_addr,
                timestamp::to_storage(&message.time),
                message.message,
            ],
        )
        .map_err(StorageError::sqlite("insert message"))?;

        let id = MessageId(conn.last_insert_rowid());
        tracing::debug!(%id, script_path = %message.script_path, "stored message");
        Ok(id)
    }

    /// Returns the matching messages in insertion order.
    pub fn query(&self, filter: &MessageFilter) -> Result<Vec<Message>, StorageError> {
        let (where_clause, params) = filter.where_clause();
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages{where_clause} ORDER BY rowid");
        tracing::debug!(%sql, params = params.len(), "query messages");

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(StorageError::sqlite("prepare select messages"))?;
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(StorageError::sqlite("query messages"))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(StorageError::sqlite("iterate messages"))?
        {
            messages.push(deserialize_message(row)?);
        }
        Ok(messages)
    }

    pub fn count(&self, filter: &MessageFilter) -> Result<u64, StorageError> {
        let (where_clause, params) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM messages{where_clause}");
        tracing::debug!(%sql, params = params.len(), "count messages");

        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(StorageError::sqlite("count messages"))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub fn get(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        let filter = MessageFilter {
            ids: Some(vec![id]),
            ..MessageFilter::default()
        };
        Ok(self.query(&filter)?.into_iter().next())
    }

    /// Flags the given rows as read inside one transaction and returns how many
    /// rows matched. Rows that are already read still count as matched.
    pub fn mark_read(&self, ids: &[MessageId]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(StorageError::sqlite("begin mark-read transaction"))?;
        let mut matched = 0;
        for chunk in ids.chunks(SQLITE_MAX_BIND_PARAMS) {
            let sql = format!(
                "UPDATE messages SET read = 1 WHERE rowid IN ({})",
                placeholders(chunk.len())
            );
            matched += tx
                .execute(&sql, params_from_iter(chunk.iter().map(|id| id.0)))
                .map_err(StorageError::sqlite("mark messages read"))?;
        }
        tx.commit()
            .map_err(StorageError::sqlite("commit mark-read transaction"))?;

        tracing::debug!(requested = ids.len(), matched, "marked messages read");
        Ok(matched)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn open_connection(path: &Path, flags: OpenFlags) -> Result<Connection, StorageError> {
    let conn = Connection::open_with_flags(path, flags).map_err(|source| StorageError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(StorageError::sqlite("set sqlite busy_timeout"))?;
    Ok(conn)
}

fn user_version(conn: &Connection) -> Result<i32, StorageError> {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(StorageError::sqlite("read PRAGMA user_version"))
}

fn has_messages_table(conn: &Connection) -> Result<bool, StorageError> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'messages')",
        [],
        |row| row.get(0),
    )
    .map_err(StorageError::sqlite("look up messages table"))
}

fn migrate(conn: &mut Connection) -> Result<(), StorageError> {
    match user_version(conn)? {
        0 => {
            // Every column is NOT NULL: absence is stored as an empty string.
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                  script_path TEXT NOT NULL,
                  path_info TEXT NOT NULL,
                  tls_client_hash TEXT NOT NULL,
                  ip_addr TEXT NOT NULL,
                  time TEXT NOT NULL,
                  message TEXT NOT NULL,
                  read INTEGER NOT NULL
                );
                "#,
            )
            .map_err(StorageError::sqlite("create sqlite schema v1"))?;

            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(StorageError::sqlite("set PRAGMA user_version=1"))?;
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        found => Err(StorageError::SchemaVersion {
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn deserialize_message(row: &rusqlite::Row<'_>) -> Result<Message, StorageError> {
    let id = row
        .get::<_, i64>(0)
        .map_err(StorageError::sqlite("deserialize rowid"))?;
    let script_path = row
        .get::<_, String>(1)
        .map_err(StorageError::sqlite("deserialize script_path"))?;
    let path_info = row
        .get::<_, String>(2)
        .map_err(StorageError::sqlite("deserialize path_info"))?;
    let tls_client_hash = row
        .get::<_, String>(3)
        .map_err(StorageError::sqlite("deserialize tls_client_hash"))?;
    let ip_addr = row
        .get::<_, String>(4)
        .map_err(StorageError::sqlite("deserialize ip_addr"))?;
    let raw_time = row
        .get::<_, String>(5)
        .map_err(StorageError::sqlite("deserialize time"))?;
    let message = row
        .get::<_, String>(6)
        .map_err(StorageError::sqlite("deserialize message"))?;
    let read = row
        .get::<_, i64>(7)
        .map_err(StorageError::sqlite("deserialize read"))?;

    let time = timestamp::from_storage(&raw_time)
        .ok_or_else(|| StorageError::InvalidTimestamp(raw_time.clone()))?;

    Ok(Message {
        id: MessageId(id),
        script_path,
        path_info,
        tls_client_hash,
        ip_addr,
        time,
        message,
        read: read != 0,
    })
}
