//! rollcall-core: Identity resolution and attendance gating.
//!
//! Resolves a capture (face image and/or typed name) to at most one
//! registered identity, checks it against the attendance policy, and
//! commits it to a ledger that holds one record per identity per day.
//! Face matching and ledger persistence are injected capabilities.

pub mod capture;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod policy;
pub mod resolver;
pub mod service;
pub mod types;

pub use capture::{Capture, CaptureError, CaptureImage};
pub use gallery::{Gallery, GalleryError};
pub use ledger::{AttendanceLedger, CommitOutcome, LedgerError, MemoryLedger};
pub use matcher::{FaceMatcher, MatchCandidate, MatchOutcome, MatcherError};
pub use policy::{AttendanceWindow, Decision, DenyReason, HourRange, PolicyGate, WindowRule};
pub use resolver::{resolve, Resolution, ResolutionSource, Signal};
pub use service::{AttemptReport, AttendanceService, MatchTarget, Outcome};
pub use types::{AttendanceRecord, Identity, IdentityError};
