//! Identity resolution: face match first, typed name second.
//!
//! Only the top-ranked candidate is considered and the only acceptance
//! test is gallery membership. The typed name is consulted only when the
//! face path produced no registered identity.

use crate::gallery::Gallery;
use crate::matcher::MatchOutcome;
use crate::types::Identity;
use std::fmt;

/// Which input produced the resolved identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    FaceMatch,
    ManualClaim,
}

/// Non-fatal observations made while resolving, in the order they occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// The matcher failed; its error message is kept for display.
    MatcherUnavailable(String),
    /// The matcher ran and returned no candidates.
    NoFaceMatch,
    /// Top candidate is not a registered identity.
    UnregisteredMatch { label: String, distance: Option<f32> },
    /// The typed name is not a registered identity.
    UnregisteredClaim { claim: String },
    /// Neither a usable match nor a typed name was supplied.
    NoInput,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatcherUnavailable(e) => {
                write!(f, "Face recognition failed ({e}). You can enter your name manually.")
            }
            Self::NoFaceMatch => f.write_str("Face not recognized. You can enter your name manually."),
            Self::UnregisteredMatch { label, .. } => {
                write!(f, "Face recognized as {label:?}, which is not a registered identity.")
            }
            Self::UnregisteredClaim { claim } => {
                write!(f, "{claim:?} is not a registered identity.")
            }
            Self::NoInput => f.write_str("No face match and no name supplied."),
        }
    }
}

/// Result of resolving one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub identity: Option<Identity>,
    pub source: Option<ResolutionSource>,
    /// Distance of the accepted face match, when the matcher reported one.
    pub distance: Option<f32>,
    pub signals: Vec<Signal>,
}

impl Resolution {
    fn resolved(identity: &Identity, source: ResolutionSource, distance: Option<f32>, signals: Vec<Signal>) -> Self {
        Self {
            identity: Some(identity.clone()),
            source: Some(source),
            distance,
            signals,
        }
    }

    /// The most recent unregistered label seen, if resolution failed on one.
    pub fn unregistered_label(&self) -> Option<&str> {
        self.signals.iter().rev().find_map(|s| match s {
            Signal::UnregisteredClaim { claim } => Some(claim.as_str()),
            Signal::UnregisteredMatch { label, .. } => Some(label.as_str()),
            _ => None,
        })
    }
}

/// Resolve a match outcome and an optional typed name to at most one
/// registered identity.
pub fn resolve(matched: &MatchOutcome, claim: Option<&str>, gallery: &Gallery) -> Resolution {
    let mut signals = Vec::new();

    match matched {
        MatchOutcome::Candidates(candidates) => match candidates.first() {
            Some(top) => {
                if let Some(id) = gallery.get(&top.label) {
                    tracing::debug!(identity = %id, distance = ?top.distance, "resolved by face match");
                    return Resolution::resolved(id, ResolutionSource::FaceMatch, top.distance, signals);
                }
                tracing::info!(label = %top.label, "face match is not a registered identity");
                signals.push(Signal::UnregisteredMatch {
                    label: top.label.clone(),
                    distance: top.distance,
                });
            }
            None => signals.push(Signal::NoFaceMatch),
        },
        MatchOutcome::Unavailable(e) => signals.push(Signal::MatcherUnavailable(e.to_string())),
        MatchOutcome::NotAttempted => {}
    }

    match claim.map(str::trim).filter(|c| !c.is_empty()) {
        Some(claim) => {
            if let Some(id) = gallery.get(claim) {
                tracing::debug!(identity = %id, "resolved by typed name");
                return Resolution::resolved(id, ResolutionSource::ManualClaim, None, signals);
            }
            tracing::info!(claim, "typed name is not a registered identity");
            signals.push(Signal::UnregisteredClaim {
                claim: claim.to_string(),
            });
        }
        None => {
            let saw_unregistered = signals
                .iter()
                .any(|s| matches!(s, Signal::UnregisteredMatch { .. }));
            if !saw_unregistered {
                signals.push(Signal::NoInput);
            }
        }
    }

    Resolution {
        identity: None,
        source: None,
        distance: None,
        signals,
    }
}
