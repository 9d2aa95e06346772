//! One attendance attempt, end to end.
//!
//! capture → face matcher → resolver → policy gate → ledger. Matcher and
//! resolution problems degrade to the next fallback; gate and ledger
//! denials are terminal outcomes. Only a ledger failure is an `Err`.

use crate::capture::Capture;
use crate::gallery::Gallery;
use crate::ledger::{AttendanceLedger, CommitOutcome, LedgerError};
use crate::matcher::{FaceMatcher, MatchOutcome, MatcherError};
use crate::policy::{Decision, DenyReason, PolicyGate, WindowRule};
use crate::resolver::{resolve, Resolution};
use crate::types::AttendanceRecord;
use chrono::NaiveDateTime;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

/// Terminal outcome of an attempt that reached a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Committed(AttendanceRecord),
    /// Today's record already exists; carries that record.
    AlreadyMarked(AttendanceRecord),
    OutsideWindow,
    UnregisteredIdentity(String),
    NoInput,
}

impl Outcome {
    /// True when the identity passed the gate, whether or not a new record was written.
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Committed(_) | Self::AlreadyMarked(_))
    }

    /// Stable machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Committed(_) => "committed",
            Self::AlreadyMarked(_) => "already_marked",
            Self::OutsideWindow => "outside_window",
            Self::UnregisteredIdentity(_) => "unregistered_identity",
            Self::NoInput => "no_input",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed(r) => write!(
                f,
                "Attendance marked for {} at {}.",
                r.identity,
                r.timestamp_string()
            ),
            Self::AlreadyMarked(r) => write!(
                f,
                "Attendance already marked for {} today (at {}).",
                r.identity,
                r.timestamp_string()
            ),
            Self::OutsideWindow => f.write_str("Attendance not marked: outside attendance window."),
            Self::UnregisteredIdentity(label) => {
                write!(f, "Attendance not marked: {label:?} is not a registered identity.")
            }
            Self::NoInput => f.write_str("Capture your face or enter your name to mark attendance."),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub resolution: Resolution,
    pub outcome: Outcome,
}

/// Where the face matcher should look, or why it is skipped.
#[derive(Debug)]
pub enum MatchTarget<'a> {
    Skip(MatchOutcome),
    Run { image: &'a Path, gallery_dir: &'a Path },
}

/// Runs attendance attempts against one gallery, window rule, and ledger.
pub struct AttendanceService<L> {
    gallery: Arc<Gallery>,
    gate: PolicyGate,
    ledger: L,
}

impl<L: AttendanceLedger> AttendanceService<L> {
    pub fn new(gallery: Arc<Gallery>, window: impl WindowRule + 'static, ledger: L) -> Self {
        let gate = PolicyGate::new(Arc::clone(&gallery), window);
        Self {
            gallery,
            gate,
            ledger,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Decide whether the capture needs the face matcher at all.
    pub fn match_target<'a>(&'a self, capture: &'a Capture) -> MatchTarget<'a> {
        let Some(image) = capture.image() else {
            return MatchTarget::Skip(MatchOutcome::NotAttempted);
        };
        match self.gallery.root() {
            Some(gallery_dir) => MatchTarget::Run {
                image: image.path(),
                gallery_dir,
            },
            None => MatchTarget::Skip(MatchOutcome::Unavailable(MatcherError::NoGalleryDir)),
        }
    }

    /// Run the matcher on the capture's image. Errors and panics become
    /// [`MatchOutcome::Unavailable`].
    pub fn match_capture<M: FaceMatcher + ?Sized>(&self, matcher: &M, capture: &Capture) -> MatchOutcome {
        let (image, gallery_dir) = match self.match_target(capture) {
            MatchTarget::Skip(outcome) => return outcome,
            MatchTarget::Run { image, gallery_dir } => (image, gallery_dir),
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| matcher.find(image, gallery_dir)))
            .unwrap_or_else(|_| Err(MatcherError::Unavailable("face matcher panicked".into())));
        match &result {
            Ok(candidates) => tracing::debug!(candidates = candidates.len(), "face matcher finished"),
            Err(e) => tracing::warn!(error = %e, "face matcher failed; falling back to typed name"),
        }
        MatchOutcome::from_result(result)
    }

    /// Resolve, authorize, and commit, given an already computed match.
    pub fn conclude(
        &self,
        capture: &Capture,
        matched: MatchOutcome,
        now: NaiveDateTime,
    ) -> Result<AttemptReport, LedgerError> {
        let resolution = resolve(&matched, capture.claim(), &self.gallery);

        let outcome = match self.gate.authorize(resolution.identity.as_ref(), now) {
            Decision::Deny(DenyReason::NoResolvableIdentity) => match resolution.unregistered_label() {
                Some(label) => Outcome::UnregisteredIdentity(label.to_string()),
                None => Outcome::NoInput,
            },
            Decision::Deny(DenyReason::UnregisteredIdentity(label)) => Outcome::UnregisteredIdentity(label),
            Decision::Deny(DenyReason::OutsideWindow) => Outcome::OutsideWindow,
            Decision::Allow(identity) => match self.ledger.commit(&identity, now) {
                Ok(CommitOutcome::Committed(record)) => {
                    tracing::info!(identity = %identity, timestamp = %record.timestamp, "attendance committed");
                    Outcome::Committed(record)
                }
                Ok(CommitOutcome::AlreadyMarked(record)) => {
                    tracing::info!(identity = %identity, "attendance already marked today");
                    Outcome::AlreadyMarked(record)
                }
                Err(e) => {
                    tracing::error!(identity = %identity, error = %e, "attendance ledger commit failed");
                    return Err(e);
                }
            },
        };

        if !outcome.is_authorized() {
            tracing::info!(outcome = outcome.kind(), "attempt denied");
        }
        Ok(AttemptReport { resolution, outcome })
    }

    /// Full attempt. The capture is consumed and released on every path.
    pub fn mark<M: FaceMatcher + ?Sized>(
        &self,
        matcher: &M,
        capture: Capture,
        now: NaiveDateTime,
    ) -> Result<AttemptReport, LedgerError> {
        let matched = self.match_capture(matcher, &capture);
        self.conclude(&capture, matched, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureImage;
    use crate::ledger::MemoryLedger;
    use crate::matcher::MatchCandidate;
    use crate::policy::AttendanceWindow;
    use crate::resolver::ResolutionSource;
    use crate::types::Identity;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Matcher returning a fixed result and counting calls.
    struct ScriptedMatcher {
        result: Result<Vec<MatchCandidate>, MatcherError>,
        calls: AtomicUsize,
    }

    impl ScriptedMatcher {
        fn returning(list: &[(&str, f32)]) -> Self {
            Self {
                result: Ok(list.iter().map(|(l, d)| MatchCandidate::new(*l, Some(*d))).collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                result: Err(MatcherError::Unavailable("model not loaded".into())),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl FaceMatcher for ScriptedMatcher {
        fn find(&self, _image: &Path, _gallery_dir: &Path) -> Result<Vec<MatchCandidate>, MatcherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct PanickingMatcher;

    impl FaceMatcher for PanickingMatcher {
        fn find(&self, _image: &Path, _gallery_dir: &Path) -> Result<Vec<MatchCandidate>, MatcherError> {
            panic!("inference crashed");
        }
    }

    struct BrokenLedger;

    impl AttendanceLedger for BrokenLedger {
        fn commit(&self, _identity: &Identity, _now: NaiveDateTime) -> Result<CommitOutcome, LedgerError> {
            Err(LedgerError::storage(std::io::Error::other("disk full")))
        }

        fn read(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
            Ok(Vec::new())
        }
    }

    // 2024-03-03 is a Sunday, 2024-03-06 a Wednesday.
    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    /// Rooted at an (emptied) scratch directory so stubs are consulted.
    fn gallery() -> Arc<Gallery> {
        let dir = tempfile::TempDir::new().unwrap();
        let roster = ["Areeba".to_string(), "Ramsha".to_string()];
        Arc::new(Gallery::load(dir.path(), &roster).unwrap())
    }

    fn service<L: AttendanceLedger>(window: AttendanceWindow, ledger: L) -> AttendanceService<L> {
        AttendanceService::new(gallery(), window, ledger)
    }

    fn counted_image(counter: &Arc<AtomicUsize>) -> CaptureImage {
        let counter = Arc::clone(counter);
        CaptureImage::with_release("/captures/snapshot.jpg", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn capture(counter: &Arc<AtomicUsize>, claim: Option<&str>) -> Capture {
        Capture::new(Some(counted_image(counter)), claim.map(str::to_string))
    }

    #[test]
    fn test_registered_match_commits() {
        let svc = service(AttendanceWindow::default(), MemoryLedger::new());
        let released = Arc::new(AtomicUsize::new(0));
        let matcher = ScriptedMatcher::returning(&[("Areeba", 0.28)]);

        let report = svc.mark(&matcher, capture(&released, None), at(6, 15)).unwrap();

        match &report.outcome {
            Outcome::Committed(r) => {
                assert_eq!(r.identity.as_str(), "Areeba");
                assert_eq!(r.date, at(6, 15).date());
            }
            other => panic!("expected Committed, got {other:?}"),
        }
        assert_eq!(report.resolution.distance, Some(0.28));
        assert_eq!(svc.ledger().read().unwrap().len(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_attempt_same_day_already_marked() {
        let svc = service(AttendanceWindow::default(), MemoryLedger::new());
        let released = Arc::new(AtomicUsize::new(0));
        let matcher = ScriptedMatcher::returning(&[("Areeba", 0.28)]);

        svc.mark(&matcher, capture(&released, None), at(6, 15)).unwrap();
        let again = svc.mark(&matcher, capture(&released, None), at(6, 18)).unwrap();

        assert_eq!(again.outcome.kind(), "already_marked");
        assert_eq!(svc.ledger().read().unwrap().len(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregistered_match_without_claim() {
        let svc = service(AttendanceWindow::default(), MemoryLedger::new());
        let released = Arc::new(AtomicUsize::new(0));
        let matcher = ScriptedMatcher::returning(&[("Unknown123", 0.1)]);

        let report = svc.mark(&matcher, capture(&released, Some("")), at(6, 15)).unwrap();

        assert_eq!(report.outcome, Outcome::UnregisteredIdentity("Unknown123".into()));
        assert!(svc.ledger().read().unwrap().is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_matcher_failure_uses_trimmed_claim() {
        let svc = service(AttendanceWindow::default(), MemoryLedger::new());
        let released = Arc::new(AtomicUsize::new(0));

        let report = svc
            .mark(&ScriptedMatcher::failing(), capture(&released, Some(" Ramsha ")), at(6, 15))
            .unwrap();

        assert_eq!(report.resolution.source, Some(ResolutionSource::ManualClaim));
        assert!(matches!(&report.outcome, Outcome::Committed(r) if r.identity.as_str() == "Ramsha"));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_matcher_panic_degrades_to_claim() {
        let svc = service(AttendanceWindow::default(), MemoryLedger::new());
        let released = Arc::new(AtomicUsize::new(0));

        let report = svc
            .mark(&PanickingMatcher, capture(&released, Some("Ramsha")), at(6, 15))
            .unwrap();

        assert!(report.outcome.is_authorized());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registered_match_never_consults_claim() {
        let svc = service(AttendanceWindow::default(), MemoryLedger::new());
        let released = Arc::new(AtomicUsize::new(0));
        let matcher = ScriptedMatcher::returning(&[("Areeba", 0.2)]);

        let report = svc.mark(&matcher, capture(&released, Some("Ramsha")), at(6, 15)).unwrap();

        assert_eq!(report.resolution.source, Some(ResolutionSource::FaceMatch));
        assert!(matches!(&report.outcome, Outcome::Committed(r) if r.identity.as_str() == "Areeba"));
    }

    #[test]
    fn test_window_gating_scenarios() {
        let window = AttendanceWindow {
            enabled: true,
            ..AttendanceWindow::default()
        };
        let svc = service(window, MemoryLedger::new());
        let released = Arc::new(AtomicUsize::new(0));
        let matcher = ScriptedMatcher::returning(&[("Areeba", 0.3)]);

        let sunday = svc.mark(&matcher, capture(&released, None), at(3, 15)).unwrap();
        assert_eq!(sunday.outcome, Outcome::OutsideWindow);
        assert!(svc.ledger().read().unwrap().is_empty());

        let wednesday = svc.mark(&matcher, capture(&released, None), at(6, 15)).unwrap();
        assert_eq!(wednesday.outcome.kind(), "committed");
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_claim_only_skips_matcher() {
        let svc = service(AttendanceWindow::default(), MemoryLedger::new());
        let matcher = ScriptedMatcher::returning(&[("Areeba", 0.2)]);

        let report = svc
            .mark(&matcher, Capture::new(None, Some("Ramsha".into())), at(6, 15))
            .unwrap();

        assert_eq!(matcher.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(&report.outcome, Outcome::Committed(r) if r.identity.as_str() == "Ramsha"));
    }

    #[test]
    fn test_empty_capture_is_no_input() {
        let svc = service(AttendanceWindow::default(), MemoryLedger::new());
        let matcher = ScriptedMatcher::returning(&[]);
        let report = svc.mark(&matcher, Capture::default(), at(6, 15)).unwrap();
        assert_eq!(report.outcome, Outcome::NoInput);
    }

    #[test]
    fn test_gallery_without_root_skips_matcher() {
        let gallery = Arc::new(Gallery::from_labels(["Areeba"]).unwrap());
        let svc = AttendanceService::new(gallery, AttendanceWindow::default(), MemoryLedger::new());
        let released = Arc::new(AtomicUsize::new(0));
        let matcher = ScriptedMatcher::returning(&[("Areeba", 0.2)]);

        let report = svc.mark(&matcher, capture(&released, None), at(6, 15)).unwrap();

        assert_eq!(matcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.outcome, Outcome::NoInput);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_gallery_dir_reports_matcher_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let gallery = Gallery::load(&dir.path().join("known_faces"), &["Areeba".to_string()]).unwrap();
        let svc = AttendanceService::new(Arc::new(gallery), AttendanceWindow::default(), MemoryLedger::new());
        let released = Arc::new(AtomicUsize::new(0));
        let matcher = ScriptedMatcher::returning(&[("Areeba", 0.2)]);
        let capture = capture(&released, Some("Areeba"));

        assert_eq!(
            svc.match_capture(&matcher, &capture),
            MatchOutcome::Unavailable(MatcherError::NoGalleryDir)
        );
        let report = svc.mark(&matcher, capture, at(6, 15)).unwrap();

        assert_eq!(matcher.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(report.outcome, Outcome::Committed(_)));
        assert_eq!(report.resolution.source, Some(ResolutionSource::ManualClaim));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ledger_failure_is_fatal_and_releases_capture() {
        let svc = service(AttendanceWindow::default(), BrokenLedger);
        let released = Arc::new(AtomicUsize::new(0));
        let matcher = ScriptedMatcher::returning(&[("Areeba", 0.2)]);

        let err = svc.mark(&matcher, capture(&released, None), at(6, 15)).unwrap_err();

        assert!(matches!(err, LedgerError::Storage(_)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_outcome_messages_are_distinct() {
        let record = AttendanceRecord::new(Identity::new("Areeba").unwrap(), at(6, 15));
        let messages: std::collections::HashSet<String> = [
            Outcome::Committed(record.clone()),
            Outcome::AlreadyMarked(record),
            Outcome::OutsideWindow,
            Outcome::UnregisteredIdentity("x".into()),
            Outcome::NoInput,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(messages.len(), 5);
    }
}
