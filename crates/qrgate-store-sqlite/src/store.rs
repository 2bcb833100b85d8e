// crates/qrgate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Usage Ledger
// Description: Durable UsageLedger backed by SQLite WAL.
// Purpose: Persist usage records with ordered reads and retention cleanup.
// Dependencies: qrgate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`UsageLedger`] using `SQLite`. Each
//! entry becomes one row in `usage_records`; the row id is the ledger id, so
//! ids increase with commit order. Metadata is stored as a JSON object.
//! Security posture: database contents are untrusted; rows that fail to
//! decode are reported as storage errors rather than skipped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use qrgate_core::LedgerError;
use qrgate_core::Timestamp;
use qrgate_core::UsageEntry;
use qrgate_core::UsageLedger;
use qrgate_core::UsageRecord;
use qrgate_core::UsageStats;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the ledger.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum encoded metadata size per record.
pub const MAX_METADATA_BYTES: usize = 16 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode.
    Full,
    /// Normal synchronous mode; usage rows tolerate losing the last commits on power loss.
    #[default]
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` usage ledger.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteLedgerConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteLedgerConfig {
    /// Returns a config for `path` with default pragmas.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Default busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` ledger errors.
///
/// # Invariants
/// - Error messages avoid embedding raw key material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteLedgerError {
    /// Store I/O error.
    #[error("sqlite ledger io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite ledger db error: {0}")]
    Db(String),
    /// Row could not be decoded.
    #[error("sqlite ledger corruption: {0}")]
    Corrupt(String),
    /// Schema version mismatch.
    #[error("sqlite ledger version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid configuration or input.
    #[error("sqlite ledger invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteLedgerError> for LedgerError {
    fn from(err: SqliteLedgerError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for SqliteLedgerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(err.to_string())
    }
}

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// Durable usage ledger over a single `SQLite` connection.
///
/// # Invariants
/// - All access is serialized through one connection lock.
pub struct SqliteUsageLedger {
    /// Guarded connection.
    connection: Mutex<Connection>,
}

impl SqliteUsageLedger {
    /// Opens (or creates) the ledger at `config.path`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLedgerError`] when the path is unsafe, the database
    /// cannot be opened, or the schema version is unsupported.
    pub fn open(config: &SqliteLedgerConfig) -> Result<Self, SqliteLedgerError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Returns the number of stored records.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLedgerError`] when the query fails.
    pub fn count(&self) -> Result<u64, SqliteLedgerError> {
        let connection = self.lock()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM usage_records", params![], |row| row.get(0))?;
        u64::try_from(count).map_err(|_| SqliteLedgerError::Corrupt("negative row count".to_string()))
    }

    /// Acquires the connection lock.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteLedgerError> {
        self.connection
            .lock()
            .map_err(|_| SqliteLedgerError::Db("connection lock poisoned".to_string()))
    }

    /// Inserts one entry and returns its id.
    fn insert(&self, entry: &UsageEntry) -> Result<u64, SqliteLedgerError> {
        let metadata = serde_json::to_string(&entry.metadata)
            .map_err(|err| SqliteLedgerError::Invalid(err.to_string()))?;
        if metadata.len() > MAX_METADATA_BYTES {
            return Err(SqliteLedgerError::Invalid("metadata exceeds size limit".to_string()));
        }
        let connection = self.lock()?;
        connection.execute(
            "INSERT INTO usage_records (timestamp_ms, user_id, api_key_hash, style, success, \
             metadata) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.timestamp.as_unix_millis(),
                entry.user_id,
                entry.api_key_hash,
                entry.style,
                entry.success,
                metadata
            ],
        )?;
        u64::try_from(connection.last_insert_rowid())
            .map_err(|_| SqliteLedgerError::Corrupt("negative row id".to_string()))
    }

    /// Returns records strictly after `since`.
    fn select_since(&self, since: Timestamp) -> Result<Vec<UsageRecord>, SqliteLedgerError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT id, timestamp_ms, user_id, api_key_hash, style, success, metadata FROM \
             usage_records WHERE timestamp_ms > ?1 ORDER BY timestamp_ms, id",
        )?;
        let rows = statement.query_map(params![since.as_unix_millis()], RawRow::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// Deletes records at or before `older_than`.
    fn delete_older(&self, older_than: Timestamp) -> Result<u64, SqliteLedgerError> {
        let connection = self.lock()?;
        let removed = connection.execute(
            "DELETE FROM usage_records WHERE timestamp_ms <= ?1",
            params![older_than.as_unix_millis()],
        )?;
        u64::try_from(removed).map_err(|_| SqliteLedgerError::Corrupt("row count overflow".to_string()))
    }

    /// Aggregates usage for `user_id`.
    fn aggregate(&self, user_id: &str) -> Result<UsageStats, SqliteLedgerError> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT style, COUNT(*), SUM(success) FROM usage_records WHERE user_id = ?1 GROUP BY \
             style ORDER BY style",
        )?;
        let rows = statement.query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?;
        let mut stats = UsageStats::default();
        for row in rows {
            let (style, total, successful) = row?;
            let total = to_count(total)?;
            stats.total_requests += total;
            stats.successful += to_count(successful)?;
            stats.by_style.insert(style, total);
        }
        Ok(stats)
    }
}

impl UsageLedger for SqliteUsageLedger {
    fn record(&self, entry: UsageEntry) -> Result<(), LedgerError> {
        self.insert(&entry)?;
        Ok(())
    }

    fn get_since(&self, since: Timestamp) -> Result<Vec<UsageRecord>, LedgerError> {
        Ok(self.select_since(since)?)
    }

    fn cleanup(&self, older_than: Timestamp) -> Result<u64, LedgerError> {
        Ok(self.delete_older(older_than)?)
    }

    fn user_stats(&self, user_id: &str) -> Result<UsageStats, LedgerError> {
        Ok(self.aggregate(user_id)?)
    }
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Raw column values for one row.
struct RawRow {
    /// Row id.
    id: i64,
    /// Decision time.
    timestamp_ms: i64,
    /// Resolved user.
    user_id: Option<String>,
    /// Key hash.
    api_key_hash: String,
    /// Requested style.
    style: String,
    /// Allow flag.
    success: bool,
    /// JSON metadata.
    metadata: String,
}

impl RawRow {
    /// Reads the selected columns.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp_ms: row.get(1)?,
            user_id: row.get(2)?,
            api_key_hash: row.get(3)?,
            style: row.get(4)?,
            success: row.get(5)?,
            metadata: row.get(6)?,
        })
    }

    /// Converts into a ledger record.
    fn into_record(self) -> Result<UsageRecord, SqliteLedgerError> {
        let id = u64::try_from(self.id)
            .map_err(|_| SqliteLedgerError::Corrupt("negative row id".to_string()))?;
        let metadata: BTreeMap<String, String> = serde_json::from_str(&self.metadata)
            .map_err(|err| SqliteLedgerError::Corrupt(format!("record {id} metadata: {err}")))?;
        Ok(UsageRecord {
            id,
            timestamp: Timestamp::from_unix_millis(self.timestamp_ms),
            user_id: self.user_id,
            api_key_hash: self.api_key_hash,
            style: self.style,
            success: self.success,
            metadata,
        })
    }
}

/// Converts an aggregate column into a count.
fn to_count(value: i64) -> Result<u64, SqliteLedgerError> {
    u64::try_from(value).map_err(|_| SqliteLedgerError::Corrupt("negative aggregate".to_string()))
}

// ============================================================================
// SECTION: Setup Helpers
// ============================================================================

/// Ensures the parent directory of the database exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteLedgerError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteLedgerError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteLedgerError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteLedgerError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteLedgerError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteLedgerError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteLedgerError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteLedgerError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with the configured pragmas.
fn open_connection(config: &SqliteLedgerConfig) -> Result<Connection, SqliteLedgerError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection.execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(connection)
}

/// Initializes the schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteLedgerError> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS usage_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp_ms INTEGER NOT NULL,
                    user_id TEXT,
                    api_key_hash TEXT NOT NULL,
                    style TEXT NOT NULL,
                    success INTEGER NOT NULL,
                    metadata TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_usage_timestamp ON usage_records (timestamp_ms);
                CREATE INDEX IF NOT EXISTS idx_usage_user ON usage_records (user_id);",
            )?;
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteLedgerError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}
