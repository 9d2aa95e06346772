//! Face matcher contract.
//!
//! The embedding model lives outside this crate. A [`FaceMatcher`] takes
//! one captured image and the gallery directory and returns candidates ranked
//! closest first. Failures are values: the resolver treats them as "no
//! match" and falls back to the typed name.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatcherError {
    #[error("face matcher unavailable: {0}")]
    Unavailable(String),
    #[error("face detection failed: {0}")]
    DetectionFailed(String),
    #[error("gallery has no sample directory to match against")]
    NoGalleryDir,
}

/// One ranked candidate. Lower distance = stronger match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub label: String,
    /// Absent when the matcher reports no usable score.
    #[serde(default)]
    pub distance: Option<f32>,
}

impl MatchCandidate {
    pub fn new(label: impl Into<String>, distance: Option<f32>) -> Self {
        Self {
            label: label.into(),
            distance,
        }
    }

    /// Candidate reported as a reference sample path
    /// (`known_faces/Areeba/front.jpg`). The label is the sample's
    /// directory name; a bare name is taken as-is.
    pub fn from_sample(reported: &str, distance: Option<f32>) -> Self {
        let label = if reported.contains(['/', '\\']) {
            Path::new(reported)
                .parent()
                .and_then(Path::file_name)
                .and_then(|n| n.to_str())
                .unwrap_or(reported)
        } else {
            reported
        };
        Self::new(label, distance)
    }
}

/// Strategy for ranking gallery identities against a captured image.
pub trait FaceMatcher {
    /// Rank gallery identities by distance to the face in `image`,
    /// closest first. An empty list means no face matched.
    fn find(&self, image: &Path, gallery_dir: &Path) -> Result<Vec<MatchCandidate>, MatcherError>;
}

impl<M: FaceMatcher + ?Sized> FaceMatcher for &M {
    fn find(&self, image: &Path, gallery_dir: &Path) -> Result<Vec<MatchCandidate>, MatcherError> {
        (**self).find(image, gallery_dir)
    }
}

impl<M: FaceMatcher + ?Sized> FaceMatcher for Box<M> {
    fn find(&self, image: &Path, gallery_dir: &Path) -> Result<Vec<MatchCandidate>, MatcherError> {
        (**self).find(image, gallery_dir)
    }
}

impl<M: FaceMatcher + ?Sized> FaceMatcher for Arc<M> {
    fn find(&self, image: &Path, gallery_dir: &Path) -> Result<Vec<MatchCandidate>, MatcherError> {
        (**self).find(image, gallery_dir)
    }
}

/// What the matching stage produced for one capture.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// No image was captured, so the matcher never ran.
    NotAttempted,
    /// Matcher ran; candidates closest first, possibly empty.
    Candidates(Vec<MatchCandidate>),
    /// Matcher failed; recovered by the manual-claim path.
    Unavailable(MatcherError),
}

impl MatchOutcome {
    pub fn from_result(result: Result<Vec<MatchCandidate>, MatcherError>) -> Self {
        match result {
            Ok(candidates) => Self::Candidates(candidates),
            Err(e) => Self::Unavailable(e),
        }
    }

    /// Top-ranked candidate, if any.
    pub fn top(&self) -> Option<&MatchCandidate> {
        match self {
            Self::Candidates(c) => c.first(),
            _ => None,
        }
    }
}
