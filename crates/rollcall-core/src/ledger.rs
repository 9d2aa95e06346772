//! Attendance ledger contract.
//!
//! A ledger holds at most one [`AttendanceRecord`] per identity per
//! calendar day. `commit` checks for an existing record and appends a new
//! one as a single atomic step relative to every other writer; records are
//! never updated or deleted.

use crate::types::{AttendanceRecord, Identity};
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger storage failure: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("ledger row {row} is corrupt: {details}")]
    Corrupt { row: i64, details: String },
    #[error("ledger lock poisoned by a panicked writer")]
    Poisoned,
}

impl LedgerError {
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage(Box::new(err))
    }
}

/// Result of a commit. Both variants carry the record that now stands
/// for the key: the new one, or the one already there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(AttendanceRecord),
    AlreadyMarked(AttendanceRecord),
}

impl CommitOutcome {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            Self::Committed(r) | Self::AlreadyMarked(r) => r,
        }
    }
}

/// Durable, append-only, keyed attendance store.
pub trait AttendanceLedger: Send + Sync {
    /// Record `identity` as present on the calendar day of `now`, unless
    /// a record for that day already exists.
    fn commit(&self, identity: &Identity, now: NaiveDateTime) -> Result<CommitOutcome, LedgerError>;

    /// Every record, oldest first, as one consistent snapshot.
    fn read(&self) -> Result<Vec<AttendanceRecord>, LedgerError>;

    /// Records for one calendar day, oldest first.
    fn read_day(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.read()?.into_iter().filter(|r| r.date == date).collect())
    }
}

impl<L: AttendanceLedger + ?Sized> AttendanceLedger for Arc<L> {
    fn commit(&self, identity: &Identity, now: NaiveDateTime) -> Result<CommitOutcome, LedgerError> {
        (**self).commit(identity, now)
    }

    fn read(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        (**self).read()
    }

    fn read_day(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        (**self).read_day(date)
    }
}

/// Process-local ledger. The mutex is the single-writer boundary.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<AttendanceRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttendanceLedger for MemoryLedger {
    fn commit(&self, identity: &Identity, now: NaiveDateTime) -> Result<CommitOutcome, LedgerError> {
        let record = AttendanceRecord::new(identity.clone(), now);
        let mut records = self.records.lock().map_err(|_| LedgerError::Poisoned)?;

        if let Some(existing) = records
            .iter()
            .find(|r| r.identity == record.identity && r.date == record.date)
        {
            return Ok(CommitOutcome::AlreadyMarked(existing.clone()));
        }
        records.push(record.clone());
        Ok(CommitOutcome::Committed(record))
    }

    fn read(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let records = self.records.lock().map_err(|_| LedgerError::Poisoned)?;
        Ok(records.clone())
    }
}
