//! rollcall-store: Durable attendance ledger.
//!
//! SQLite (WAL mode) table keyed by `(identity, day)`. Commits run inside
//! an immediate transaction so the existence check and the insert form one
//! unit against every writer, in this process or another.

pub mod ledger;
pub mod report;

pub use ledger::{SqliteLedger, StoreError};
pub use report::{write_csv, write_json, LedgerRow};
