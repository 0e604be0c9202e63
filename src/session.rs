//! One retrieval invocation: the receiver lifecycle interleaved with a
//! remote action.
//!
//! The receiver starts before the remote is asked to produce anything, so the
//! upload endpoint is live by the time the service tries to stream the file.
//! The remote's answer then decides whether the pending Transfer is awaited
//! or canceled, and the listener is closed strictly after the Transfer has
//! resolved.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::FetchError;
use crate::receiver::{Receiver, ReceiverConfig};
use crate::remote::RemoteActions;

/// Upload URL advertised to the remote service for a receiver bound on
/// `port`.
pub fn upload_target(host: &str, port: u16) -> String {
    format!("http://{host}:{port}/upload")
}

/// Retrieve the result bundle for `id`, writing it to `destination`.
///
/// `Ok(None)` means the service reported that no results were produced; the
/// wait was canceled rather than failed.
pub async fn fetch_results<R>(
    remote: &R,
    config: ReceiverConfig,
    id: &str,
    target: &str,
    destination: &Path,
) -> Result<Option<PathBuf>, FetchError>
where
    R: RemoteActions + ?Sized,
{
    let mut receiver = Receiver::start(config, destination).await?;
    let produced = match remote.request_results(id, target).await {
        Ok(produced) => produced,
        Err(err) => {
            settle_canceled(&mut receiver).await;
            return Err(err);
        }
    };

    let outcome = if produced {
        receiver.wait().await
    } else {
        info!(id, "no results produced; canceling transfer");
        receiver.cancel().await;
        receiver.wait().await
    };
    receiver.close().await;
    Ok(outcome)
}

/// Retrieve the diagnostic bundle for `id`, writing it to `destination`.
///
/// An empty label mapping from the service cancels the wait and yields
/// `Ok(None)`.
pub async fn fetch_diagnostics<R>(
    remote: &R,
    config: ReceiverConfig,
    id: &str,
    target: &str,
    destination: &Path,
) -> Result<Option<PathBuf>, FetchError>
where
    R: RemoteActions + ?Sized,
{
    let mut receiver = Receiver::start(config, destination).await?;
    let files = match remote.request_diagnostics(id, target).await {
        Ok(files) => files,
        Err(err) => {
            settle_canceled(&mut receiver).await;
            return Err(err);
        }
    };

    let outcome = if files.is_empty() {
        info!(id, "no diagnostic files produced; canceling transfer");
        receiver.cancel().await;
        receiver.wait().await
    } else {
        info!(id, count = files.len(), "diagnostic files announced");
        receiver.wait().await
    };
    receiver.close().await;
    Ok(outcome)
}

/// Resolve and close a receiver whose remote action failed. Close must come
/// after the Transfer has resolved, even on the error path.
async fn settle_canceled(receiver: &mut Receiver) {
    receiver.cancel().await;
    receiver.wait().await;
    receiver.close().await;
}
