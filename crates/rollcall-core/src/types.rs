use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Ledger timestamp format: second precision, 24-hour clock.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Calendar-day key format used to bucket records.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity label is empty")]
    Empty,
    #[error("identity label {0:?} has leading or trailing whitespace")]
    Whitespace(String),
    #[error("identity label {0:?} is not a plain name")]
    PathLike(String),
}

/// A registered person's label, e.g. "Areeba".
///
/// Labels double as gallery directory names, so they must be plain
/// non-empty names without surrounding whitespace or path separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn new(label: impl Into<String>) -> Result<Self, IdentityError> {
        let label = label.into();
        if label.is_empty() {
            return Err(IdentityError::Empty);
        }
        if label.trim() != label {
            return Err(IdentityError::Whitespace(label));
        }
        if label.contains(['/', '\\']) || label == "." || label == ".." {
            return Err(IdentityError::PathLike(label));
        }
        Ok(Self(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

/// One "present" mark: who, which calendar day, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity: Identity,
    pub date: NaiveDate,
    pub timestamp: NaiveDateTime,
}

impl AttendanceRecord {
    /// Build a record stamped at `at`, truncated to whole seconds.
    pub fn new(identity: Identity, at: NaiveDateTime) -> Self {
        let timestamp = at.with_nanosecond(0).unwrap_or(at);
        Self {
            identity,
            date: timestamp.date(),
            timestamp,
        }
    }

    /// Timestamp in the persisted ledger format.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Calendar-day key in the persisted ledger format.
    pub fn date_string(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_accepts_plain_name() {
        let id = Identity::new("Areeba").unwrap();
        assert_eq!(id.as_str(), "Areeba");
        assert_eq!(id.to_string(), "Areeba");
    }

    #[test]
    fn test_identity_rejects_empty() {
        assert_eq!(Identity::new(""), Err(IdentityError::Empty));
    }

    #[test]
    fn test_identity_rejects_surrounding_whitespace() {
        assert!(matches!(Identity::new(" Ramsha "), Err(IdentityError::Whitespace(_))));
    }

    #[test]
    fn test_identity_rejects_paths() {
        assert!(matches!(Identity::new("a/b"), Err(IdentityError::PathLike(_))));
        assert!(matches!(Identity::new(".."), Err(IdentityError::PathLike(_))));
    }

    #[test]
    fn test_identity_deserialize_validates() {
        let ok: Identity = serde_json::from_str("\"Kiran\"").unwrap();
        assert_eq!(ok.as_str(), "Kiran");
        assert!(serde_json::from_str::<Identity>("\"\"").is_err());
    }

    #[test]
    fn test_record_truncates_to_seconds() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 6)
            .unwrap()
            .and_hms_milli_opt(15, 4, 5, 750)
            .unwrap();
        let record = AttendanceRecord::new(Identity::new("Nehal").unwrap(), at);
        assert_eq!(record.timestamp_string(), "2024-03-06 15:04:05");
        assert_eq!(record.date_string(), "2024-03-06");
    }
}
