use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::types::{DATE_FORMAT, TIMESTAMP_FORMAT};
use rollcall_core::{AttendanceLedger, AttendanceRecord, CommitOutcome, Identity, LedgerError};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    identity  TEXT NOT NULL,
    day       TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    UNIQUE (identity, day)
);
CREATE INDEX IF NOT EXISTS attendance_day ON attendance (day);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create ledger directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// SQLite-backed [`AttendanceLedger`].
pub struct SqliteLedger {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteLedger {
    /// Open or create the ledger at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = %path.display(), "attendance ledger opened");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Ledger that lives only as long as this value.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of records in the ledger.
    pub fn count(&self) -> Result<u64, LedgerError> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))
            .map_err(LedgerError::storage)?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(LedgerError::storage)?;
        let rows = stmt
            .query_map(args, |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
            .map_err(LedgerError::storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(LedgerError::storage)?;

        rows.into_iter()
            .map(|(seq, identity, timestamp)| decode_row(seq, identity, &timestamp))
            .collect()
    }
}

impl AttendanceLedger for SqliteLedger {
    fn commit(&self, identity: &Identity, now: NaiveDateTime) -> Result<CommitOutcome, LedgerError> {
        let record = AttendanceRecord::new(identity.clone(), now);
        let day = record.date_string();

        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so no other connection
        // can insert between the lookup and our insert.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(LedgerError::storage)?;

        let existing = tx
            .query_row(
                "SELECT seq, identity, timestamp FROM attendance WHERE identity = ?1 AND day = ?2",
                params![identity.as_str(), day],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()
            .map_err(LedgerError::storage)?;

        if let Some((seq, label, timestamp)) = existing {
            let existing = decode_row(seq, label, &timestamp)?;
            tracing::debug!(identity = %identity, day = %day, "ledger already holds today's record");
            return Ok(CommitOutcome::AlreadyMarked(existing));
        }

        tx.execute(
            "INSERT INTO attendance (identity, day, timestamp) VALUES (?1, ?2, ?3)",
            params![identity.as_str(), day, record.timestamp_string()],
        )
        .map_err(LedgerError::storage)?;
        tx.commit().map_err(LedgerError::storage)?;

        Ok(CommitOutcome::Committed(record))
    }

    fn read(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        self.query("SELECT seq, identity, timestamp FROM attendance ORDER BY seq ASC", &[])
    }

    fn read_day(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let day = date.format(DATE_FORMAT).to_string();
        self.query(
            "SELECT seq, identity, timestamp FROM attendance WHERE day = ?1 ORDER BY seq ASC",
            &[&day],
        )
    }
}

fn decode_row(seq: i64, identity: String, timestamp: &str) -> Result<AttendanceRecord, LedgerError> {
    let corrupt = |details: String| LedgerError::Corrupt { row: seq, details };
    let identity = Identity::new(identity).map_err(|e| corrupt(e.to_string()))?;
    let at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| corrupt(format!("timestamp {timestamp:?}: {e}")))?;
    Ok(AttendanceRecord::new(identity, at))
}
