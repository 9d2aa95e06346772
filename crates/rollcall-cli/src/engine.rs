use rollcall_core::{FaceMatcher, MatchCandidate, MatcherError};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// Messages sent from attempt handlers to the matcher thread.
enum EngineRequest {
    Find {
        image: PathBuf,
        gallery_dir: PathBuf,
        reply: oneshot::Sender<Result<Vec<MatchCandidate>, MatcherError>>,
    },
}

/// Clone-safe handle to the matcher thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Rank gallery identities for `image`.
    ///
    /// Dropping the returned future abandons the request; the thread
    /// finishes the match and discards the result.
    pub async fn find(&self, image: PathBuf, gallery_dir: PathBuf) -> Result<Vec<MatchCandidate>, MatcherError> {
        let closed = || MatcherError::Unavailable("matcher engine exited".into());
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Find {
                image,
                gallery_dir,
                reply: reply_tx,
            })
            .await
            .map_err(|_| closed())?;
        reply_rx.await.map_err(|_| closed())?
    }
}

/// Spawn the matcher on a dedicated OS thread so slow inference never
/// blocks the async runtime.
pub fn spawn_engine(matcher: Box<dyn FaceMatcher + Send>) -> std::io::Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-matcher".into())
        .spawn(move || {
            tracing::debug!("matcher thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Find {
                        image,
                        gallery_dir,
                        reply,
                    } => {
                        let started = std::time::Instant::now();
                        let result = panic::catch_unwind(AssertUnwindSafe(|| matcher.find(&image, &gallery_dir)))
                            .unwrap_or_else(|_| Err(MatcherError::Unavailable("face matcher panicked".into())));
                        tracing::debug!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            ok = result.is_ok(),
                            "match finished"
                        );
                        if reply.send(result).is_err() {
                            tracing::debug!("match result discarded; attempt was abandoned");
                        }
                    }
                }
            }
            tracing::debug!("matcher thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
