//! # Single-File Receiver
//!
//! A transient HTTP endpoint that accepts exactly one multipart file upload,
//! persists it to a caller-chosen destination, and reports the outcome to a
//! waiting caller exactly once.
//!
//! One [`Receiver`] tracks one Transfer. The upload route and [`Receiver::cancel`]
//! race to resolve the same completion slot; whichever gets there first wins
//! and every later attempt is a no-op. `cancel` resolves the *wait*, not the
//! listener, so an out-of-band "nothing will be uploaded" signal unblocks the
//! caller without tearing the endpoint down mid-request.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::post;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Well-known port the remote service streams bundles back to.
pub const DEFAULT_PORT: u16 = 18103;

/// How long [`Receiver::close`] waits for in-flight connections to drain
/// before the serve task is aborted outright.
const CLOSE_GRACE: Duration = Duration::from_secs(60);

/// Fixed acknowledgment body returned to the uploader. A failed local write
/// is reported through the Transfer outcome, never through the HTTP status.
const UPLOAD_ACK: &str = "upload received";

/// Listener configuration. The port is an explicit constructor input rather
/// than module-level state, so receivers under test can bind port 0 and read
/// the assigned address back without colliding.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverConfig {
    pub port: u16,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

#[derive(Debug)]
struct UploadState {
    destination: PathBuf,
    /// Completion slot for the Transfer. Emptied by whichever of the upload
    /// handler or `cancel` resolves first.
    completion: Mutex<Option<oneshot::Sender<Option<PathBuf>>>>,
}

impl UploadState {
    async fn resolve(&self, outcome: Option<PathBuf>) {
        if let Some(tx) = self.completion.lock().await.take() {
            // The receiver half only disappears once the handle is dropped,
            // and an unreceived send is harmless either way.
            let _ = tx.send(outcome);
        }
    }
}

/// Handle for one pending Transfer: a bound listener plus the completion
/// channel the caller blocks on.
#[derive(Debug)]
pub struct Receiver {
    state: Arc<UploadState>,
    completion: Option<oneshot::Receiver<Option<PathBuf>>>,
    shutdown: Option<oneshot::Sender<()>>,
    serve_task: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl Receiver {
    /// Bind the listener and register the single upload route.
    ///
    /// Fails with [`FetchError::Bind`] when the port is already in use.
    pub async fn start(
        config: ReceiverConfig,
        destination: impl Into<PathBuf>,
    ) -> Result<Self, FetchError> {
        let destination = destination.into();
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr).await.map_err(|source| FetchError::Bind {
            port: config.port,
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| FetchError::Bind {
            port: config.port,
            source,
        })?;

        let (completion_tx, completion_rx) = oneshot::channel();
        let state = Arc::new(UploadState {
            destination,
            completion: Mutex::new(Some(completion_tx)),
        });

        // Bundles run to hundreds of megabytes; the stock request-body cap
        // would reject them.
        let router = Router::new()
            .route("/upload", post(accept_upload))
            .layer(DefaultBodyLimit::disable())
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&state));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_task = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serve.await {
                warn!(error = %err, "upload endpoint terminated abnormally");
            }
        });

        debug!(addr = %local_addr, "upload endpoint listening");
        Ok(Self {
            state,
            completion: Some(completion_rx),
            shutdown: Some(shutdown_tx),
            serve_task: Some(serve_task),
            local_addr,
        })
    }

    /// Address the listener is actually bound to. Differs from the configured
    /// port only when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Suspend until the Transfer resolves.
    ///
    /// Returns the destination path once a file has been received and
    /// persisted, or `None` when the upload failed or the wait was canceled.
    /// Callers branch on the value; a canceled transfer is not an error.
    /// A second call after resolution returns `None` immediately.
    pub async fn wait(&mut self) -> Option<PathBuf> {
        match self.completion.take() {
            Some(rx) => rx.await.unwrap_or(None),
            None => None,
        }
    }

    /// Resolve the pending wait with a canceled outcome, without closing the
    /// listener. A no-op once the Transfer has already resolved.
    pub async fn cancel(&self) {
        self.state.resolve(None).await;
    }

    /// Release the listener, waiting up to the drain grace period for
    /// in-flight connections before forcing the serve task down. Idempotent.
    ///
    /// Callers must sequence `wait` or `cancel` strictly before `close`.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.serve_task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("upload endpoint did not drain in time; aborting");
                task.abort();
            }
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        // A handle dropped without `close` must not leak the serve task.
        if let Some(task) = self.serve_task.take() {
            task.abort();
        }
    }
}

async fn accept_upload(
    State(state): State<Arc<UploadState>>,
    multipart: Multipart,
) -> &'static str {
    match persist_upload(&state.destination, multipart).await {
        Ok(true) => {
            let resolved = absolute(&state.destination);
            debug!(path = %resolved.display(), "upload persisted");
            state.resolve(Some(resolved)).await;
        }
        Ok(false) => {
            warn!("upload request carried no file field");
            state.resolve(None).await;
        }
        Err(err) => {
            warn!(error = %err, "failed to persist upload");
            state.resolve(None).await;
        }
    }
    UPLOAD_ACK
}

/// Stream the first file field of the multipart body into `destination`,
/// opened in write/truncate mode. `Ok(false)` means no file field arrived.
async fn persist_upload(
    destination: &Path,
    mut multipart: Multipart,
) -> std::io::Result<bool> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?
    {
        if field.file_name().is_none() {
            continue;
        }
        let mut file = tokio::fs::File::create(destination).await?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        return Ok(true);
    }
    Ok(false)
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
