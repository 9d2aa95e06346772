//! Export of the ledger as the two-column `identity, timestamp` table
//! consumed by external reporting.

use rollcall_core::AttendanceRecord;
use serde::Serialize;
use std::io::{self, Write};

/// CSV header kept compatible with existing attendance spreadsheets.
const CSV_HEADER: &str = "Name,Timestamp";

/// One exported row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRow {
    pub identity: String,
    pub timestamp: String,
}

impl From<&AttendanceRecord> for LedgerRow {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            identity: record.identity.to_string(),
            timestamp: record.timestamp_string(),
        }
    }
}

pub fn write_csv<W: Write>(records: &[AttendanceRecord], mut out: W) -> io::Result<()> {
    writeln!(out, "{CSV_HEADER}")?;
    for row in records.iter().map(LedgerRow::from) {
        writeln!(out, "{},{}", csv_field(&row.identity), csv_field(&row.timestamp))?;
    }
    out.flush()
}

pub fn write_json<W: Write>(records: &[AttendanceRecord], mut out: W) -> io::Result<()> {
    let rows: Vec<LedgerRow> = records.iter().map(LedgerRow::from).collect();
    serde_json::to_writer_pretty(&mut out, &rows)?;
    writeln!(out)?;
    out.flush()
}

/// Quote a field when it holds a delimiter, quote, or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rollcall_core::Identity;

    fn record(label: &str, hour: u32) -> AttendanceRecord {
        let at = NaiveDate::from_ymd_opt(2024, 3, 6)
            .unwrap()
            .and_hms_opt(hour, 30, 0)
            .unwrap();
        AttendanceRecord::new(Identity::new(label).unwrap(), at)
    }

    #[test]
    fn test_csv_layout() {
        let mut out = Vec::new();
        write_csv(&[record("Areeba", 9), record("Ramsha", 10)], &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Name,Timestamp\nAreeba,2024-03-06 09:30:00\nRamsha,2024-03-06 10:30:00\n"
        );
    }

    #[test]
    fn test_csv_quotes_delimiters() {
        assert_eq!(csv_field("Khan, Kiran"), "\"Khan, Kiran\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("Nehal"), "Nehal");
    }

    #[test]
    fn test_json_rows() {
        let mut out = Vec::new();
        write_json(&[record("Alishba", 14)], &mut out).unwrap();
        let rows: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(rows[0]["identity"], "Alishba");
        assert_eq!(rows[0]["timestamp"], "2024-03-06 14:30:00");
    }

    #[test]
    fn test_empty_ledger_exports_header_only() {
        let mut out = Vec::new();
        write_csv(&[], &mut out).unwrap();
        assert_eq!(out, b"Name,Timestamp\n");
    }
}
