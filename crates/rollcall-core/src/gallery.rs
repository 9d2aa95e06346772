//! Registry of known identities and their reference face samples.
//!
//! On disk the gallery is one subdirectory per identity holding that
//! person's reference photos:
//!
//! ```text
//! known_faces/
//!   Areeba/front.jpg
//!   Ramsha/1.jpg  Ramsha/2.png
//! ```
//!
//! The registered set comes from a roster when one is configured; the
//! directory only contributes samples. Without a roster every valid
//! subdirectory name is registered.

use crate::types::{Identity, IdentityError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions accepted as reference samples.
const SAMPLE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read gallery directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid roster entry: {0}")]
    InvalidRoster(#[from] IdentityError),
}

/// Read-only set of registered identities.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    root: Option<PathBuf>,
    members: BTreeMap<Identity, Vec<PathBuf>>,
}

impl Gallery {
    /// Build a gallery from bare labels, with no sample directory.
    pub fn from_labels<I, S>(labels: I) -> Result<Self, GalleryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = labels
            .into_iter()
            .map(|label| Identity::new(label).map(|id| (id, Vec::new())))
            .collect::<Result<_, _>>()?;
        Ok(Self { root: None, members })
    }

    /// Load a gallery rooted at `root`, registering `roster` (or every
    /// subdirectory when the roster is empty).
    ///
    /// A missing root is tolerated: roster members are registered without
    /// samples and the gallery has no [`root`](Self::root), so face
    /// matching is skipped.
    pub fn load(root: &Path, roster: &[String]) -> Result<Self, GalleryError> {
        let present = root.is_dir();
        let scanned = if present {
            scan_samples(root)?
        } else {
            tracing::warn!(path = %root.display(), "gallery directory missing; no reference samples");
            BTreeMap::new()
        };

        let members = if roster.is_empty() {
            scanned
        } else {
            let mut members = BTreeMap::new();
            for label in roster {
                let id = Identity::new(label.as_str())?;
                let samples = scanned.get(label.as_str()).cloned().unwrap_or_default();
                members.insert(id, samples);
            }
            for label in scanned.keys().filter(|id| !members.contains_key(*id)) {
                tracing::debug!(label = %label, "gallery directory not on roster; ignored");
            }
            members
        };

        if members.is_empty() {
            tracing::warn!(path = %root.display(), "gallery has no registered identities");
        }
        tracing::info!(
            path = %root.display(),
            identities = members.len(),
            samples = members.values().map(Vec::len).sum::<usize>(),
            "gallery loaded"
        );

        Ok(Self {
            root: present.then(|| root.to_path_buf()),
            members,
        })
    }

    /// Directory handed to the face matcher, if the gallery has one.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.members.contains_key(label)
    }

    /// Registered identity with exactly this label.
    pub fn get(&self, label: &str) -> Option<&Identity> {
        self.members.get_key_value(label).map(|(id, _)| id)
    }

    /// Reference samples for an identity (empty when it has none).
    pub fn samples(&self, label: &str) -> &[PathBuf] {
        self.members.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.members.keys()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn scan_samples(root: &Path) -> Result<BTreeMap<Identity, Vec<PathBuf>>, GalleryError> {
    let mut found = BTreeMap::new();
    for entry in std::fs::read_dir(root).map_err(io_err(root))? {
        let entry = entry.map_err(io_err(root))?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let id = match Identity::new(name) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping gallery directory");
                continue;
            }
        };

        let mut samples = Vec::new();
        for sample in std::fs::read_dir(&dir).map_err(io_err(&dir))? {
            let path = sample.map_err(io_err(&dir))?.path();
            if path.is_file() && is_sample(&path) {
                samples.push(path);
            }
        }
        samples.sort();
        found.insert(id, samples);
    }
    Ok(found)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> GalleryError {
    let path = path.to_path_buf();
    move |source| GalleryError::Io { path, source }
}

fn is_sample(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SAMPLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
