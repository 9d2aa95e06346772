//! Transient capture for one attendance attempt.
//!
//! A [`CaptureImage`] owns a release action that runs exactly once: on
//! [`CaptureImage::release`] or, failing that, on drop. Dropping the
//! owning [`Capture`] on any exit path (success, denial, matcher failure,
//! a cancelled future) therefore frees the image.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

type ReleaseHook = Box<dyn FnOnce(&Path) -> std::io::Result<()> + Send>;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

enum Release {
    /// Staged for this attempt; closing the temp path deletes it.
    Staged(tempfile::TempPath),
    Hook(ReleaseHook),
}

/// Image handle borrowed from the capture pipeline for one attempt.
pub struct CaptureImage {
    path: PathBuf,
    release: Option<Release>,
}

impl CaptureImage {
    /// Write `bytes` to a fresh file under `dir`; the file is deleted on release.
    pub fn stage(bytes: &[u8], dir: &Path, suffix: &str) -> Result<Self, CaptureError> {
        let mut file = tempfile::Builder::new()
            .prefix("rollcall-capture-")
            .suffix(suffix)
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        let staged = file.into_temp_path();
        tracing::debug!(path = %staged.display(), bytes = bytes.len(), "capture staged");
        Ok(Self {
            path: staged.to_path_buf(),
            release: Some(Release::Staged(staged)),
        })
    }

    /// Wrap an image the pipeline manages itself; `hook` disposes of it.
    pub fn with_release<F>(path: impl Into<PathBuf>, hook: F) -> Self
    where
        F: FnOnce(&Path) -> std::io::Result<()> + Send + 'static,
    {
        Self {
            path: path.into(),
            release: Some(Release::Hook(Box::new(hook))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release now and report the result instead of only logging it.
    pub fn release(mut self) -> Result<(), CaptureError> {
        self.run_release().map_err(CaptureError::from)
    }

    fn run_release(&mut self) -> std::io::Result<()> {
        match self.release.take() {
            Some(Release::Staged(staged)) => match staged.close() {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
            Some(Release::Hook(hook)) => hook(&self.path),
            None => Ok(()),
        }
    }
}

impl Drop for CaptureImage {
    fn drop(&mut self) {
        if let Err(e) = self.run_release() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release capture image");
        }
    }
}

impl fmt::Debug for CaptureImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureImage")
            .field("path", &self.path)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// One user interaction: an image, a typed name, or both.
#[derive(Debug, Default)]
pub struct Capture {
    image: Option<CaptureImage>,
    claim: Option<String>,
}

impl Capture {
    pub fn new(image: Option<CaptureImage>, claim: Option<String>) -> Self {
        Self { image, claim }
    }

    pub fn image(&self) -> Option<&CaptureImage> {
        self.image.as_ref()
    }

    pub fn claim(&self) -> Option<&str> {
        self.claim.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted(counter: &Arc<AtomicUsize>) -> CaptureImage {
        let counter = Arc::clone(counter);
        CaptureImage::with_release("/snapshot.jpg", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_stage_writes_and_drop_deletes() {
        let dir = tempfile::TempDir::new().unwrap();
        let image = CaptureImage::stage(b"jpeg-bytes", dir.path(), ".jpg").unwrap();
        let path = image.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg-bytes");
        assert!(path.extension().is_some_and(|e| e == "jpg"));

        drop(image);
        assert!(!path.exists());
    }

    #[test]
    fn test_explicit_release_deletes_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let image = CaptureImage::stage(b"x", dir.path(), ".png").unwrap();
        let path = image.path().to_path_buf();
        image.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_release_tolerates_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let image = CaptureImage::stage(b"x", dir.path(), ".jpg").unwrap();
        std::fs::remove_file(image.path()).unwrap();
        assert!(image.release().is_ok());
    }

    #[test]
    fn test_capture_drop_deletes_staged_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let image = CaptureImage::stage(b"x", dir.path(), ".jpg").unwrap();
        let path = image.path().to_path_buf();
        assert!(format!("{image:?}").contains("released: false"));

        drop(Capture::new(Some(image), Some("Kiran".into())));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_hook_runs_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        counted(&counter).release().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let capture = Capture::new(Some(counted(&counter)), None);
        drop(capture);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_hook_error_is_reported() {
        let image = CaptureImage::with_release("/snapshot.jpg", |_| {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "busy"))
        });
        assert!(image.release().is_err());
    }
}
