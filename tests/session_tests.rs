//! Session orchestration tests with stubbed remote actions. Each test pins
//! its own port so receivers never collide across the suite.

use async_trait::async_trait;
use simfetch::FetchError;
use simfetch::receiver::ReceiverConfig;
use simfetch::remote::RemoteActions;
use simfetch::session::{fetch_diagnostics, fetch_results, upload_target};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

/// Remote that streams a fixed payload to the announced target, the way the
/// real service does once it has produced a bundle.
struct UploadingRemote {
    payload: &'static [u8],
    diagnostics: BTreeMap<String, String>,
}

impl UploadingRemote {
    fn new(payload: &'static [u8]) -> Self {
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("solver".to_string(), "solver.log".to_string());
        Self {
            payload,
            diagnostics,
        }
    }

    async fn stream(&self, target: &str) -> Result<(), FetchError> {
        let part = reqwest::multipart::Part::bytes(self.payload.to_vec()).file_name("bundle.tgz");
        let form = reqwest::multipart::Form::new().part("file", part);
        reqwest::Client::new()
            .post(target)
            .multipart(form)
            .send()
            .await
            .map_err(|err| FetchError::RemoteAction(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RemoteActions for UploadingRemote {
    async fn request_results(&self, _id: &str, target: &str) -> Result<bool, FetchError> {
        self.stream(target).await?;
        Ok(true)
    }

    async fn request_diagnostics(
        &self,
        _id: &str,
        target: &str,
    ) -> Result<BTreeMap<String, String>, FetchError> {
        self.stream(target).await?;
        Ok(self.diagnostics.clone())
    }
}

/// Remote that reports nothing to fetch.
struct EmptyRemote;

#[async_trait]
impl RemoteActions for EmptyRemote {
    async fn request_results(&self, _id: &str, _target: &str) -> Result<bool, FetchError> {
        Ok(false)
    }

    async fn request_diagnostics(
        &self,
        _id: &str,
        _target: &str,
    ) -> Result<BTreeMap<String, String>, FetchError> {
        Ok(BTreeMap::new())
    }
}

/// Remote whose action fails outright, e.g. an unknown simulation.
struct FailingRemote;

#[async_trait]
impl RemoteActions for FailingRemote {
    async fn request_results(&self, id: &str, _target: &str) -> Result<bool, FetchError> {
        Err(FetchError::RemoteAction(format!("simulation {id} not found")))
    }

    async fn request_diagnostics(
        &self,
        id: &str,
        _target: &str,
    ) -> Result<BTreeMap<String, String>, FetchError> {
        Err(FetchError::RemoteAction(format!("simulation {id} not found")))
    }
}

#[tokio::test]
async fn results_flow_delivers_the_uploaded_bundle() {
    let port = 18113;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("results.tgz");
    let remote = UploadingRemote::new(b"result bundle bytes");

    let received = fetch_results(
        &remote,
        ReceiverConfig { port },
        "sim-1",
        &upload_target("127.0.0.1", port),
        &dest,
    )
    .await
    .unwrap();

    let path = received.expect("an uploaded bundle must resolve the transfer");
    assert_eq!(fs::read(&path).unwrap(), b"result bundle bytes");
}

#[tokio::test]
async fn results_flow_cancels_when_nothing_was_produced() {
    let port = 18114;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("results.tgz");

    let received = tokio::time::timeout(
        Duration::from_secs(5),
        fetch_results(
            &EmptyRemote,
            ReceiverConfig { port },
            "sim-2",
            &upload_target("127.0.0.1", port),
            &dest,
        ),
    )
    .await
    .expect("a canceled transfer must not block the caller")
    .unwrap();

    assert!(received.is_none());
    assert!(!dest.exists());
}

#[tokio::test]
async fn remote_failure_propagates_and_releases_the_port() {
    let port = 18115;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("results.tgz");

    let err = fetch_results(
        &FailingRemote,
        ReceiverConfig { port },
        "ghost",
        &upload_target("127.0.0.1", port),
        &dest,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FetchError::RemoteAction(ref msg) if msg.contains("not found")));

    // The receiver was closed on the error path, so the port is free again.
    let rebound = tokio::net::TcpListener::bind(("0.0.0.0", port)).await;
    assert!(rebound.is_ok());
}

#[tokio::test]
async fn diagnostics_flow_cancels_on_an_empty_mapping() {
    let port = 18116;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("diagnostics.tgz");

    let received = fetch_diagnostics(
        &EmptyRemote,
        ReceiverConfig { port },
        "sim-3",
        &upload_target("127.0.0.1", port),
        &dest,
    )
    .await
    .unwrap();

    assert!(received.is_none());
}

#[tokio::test]
async fn diagnostics_flow_delivers_the_uploaded_bundle() {
    let port = 18117;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("diagnostics.tgz");
    let remote = UploadingRemote::new(b"diagnostic bundle bytes");

    let received = fetch_diagnostics(
        &remote,
        ReceiverConfig { port },
        "sim-4",
        &upload_target("127.0.0.1", port),
        &dest,
    )
    .await
    .unwrap();

    let path = received.expect("announced diagnostics must resolve the transfer");
    assert_eq!(fs::read(&path).unwrap(), b"diagnostic bundle bytes");
}
