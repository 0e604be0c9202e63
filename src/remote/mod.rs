//! # Remote Control-Plane Interface
//!
//! The simulation service speaks its own RPC dialect; this crate models only
//! the two actions the retrieval flow depends on and ships a thin
//! JSON-over-HTTP stand-in client so the CLI is exercisable end to end. No
//! protocol fidelity with the real service is claimed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FetchError;

/// Actions the remote simulation service performs on our behalf. The return
/// values decide whether the receiver's wait is awaited or canceled.
#[async_trait]
pub trait RemoteActions {
    /// Ask the service to produce the result bundle for `id` and stream it
    /// to `target`. `false` means the simulation produced nothing to fetch.
    async fn request_results(&self, id: &str, target: &str) -> Result<bool, FetchError>;

    /// Ask the service to collect diagnostics for `id` and stream the bundle
    /// to `target`. The returned label-to-filename mapping is empty when no
    /// files were produced.
    async fn request_diagnostics(
        &self,
        id: &str,
        target: &str,
    ) -> Result<BTreeMap<String, String>, FetchError>;
}

#[derive(Serialize)]
struct ActionRequest<'a> {
    target: &'a str,
}

#[derive(Deserialize)]
struct ResultsResponse {
    success: bool,
}

/// JSON-over-HTTP stand-in for the control plane.
pub struct ControlClient {
    client: Client,
    base: String,
}

impl ControlClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base: base.into(),
        }
    }

    fn endpoint(&self, id: &str, action: &str) -> String {
        format!(
            "{}/simulations/{}/{}",
            self.base.trim_end_matches('/'),
            id,
            action
        )
    }

    async fn post(
        &self,
        id: &str,
        action: &str,
        target: &str,
    ) -> Result<reqwest::Response, FetchError> {
        let url = self.endpoint(id, action);
        debug!(%url, "requesting remote action");
        let response = self
            .client
            .post(&url)
            .json(&ActionRequest { target })
            .send()
            .await
            .map_err(|err| FetchError::RemoteAction(format!("control request failed: {err}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::RemoteAction(format!("simulation {id} not found")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = if body.trim().is_empty() {
                format!("status {status}")
            } else {
                format!("{} (status {status})", body.trim())
            };
            return Err(FetchError::RemoteAction(detail));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteActions for ControlClient {
    async fn request_results(&self, id: &str, target: &str) -> Result<bool, FetchError> {
        let response = self.post(id, "results", target).await?;
        let body: ResultsResponse = response.json().await.map_err(|err| {
            FetchError::RemoteAction(format!("malformed control response: {err}"))
        })?;
        Ok(body.success)
    }

    async fn request_diagnostics(
        &self,
        id: &str,
        target: &str,
    ) -> Result<BTreeMap<String, String>, FetchError> {
        let response = self.post(id, "diagnostics", target).await?;
        response.json().await.map_err(|err| {
            FetchError::RemoteAction(format!("malformed control response: {err}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn request_results_reports_the_service_verdict() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/simulations/sim-1/results")
                .json_body(serde_json::json!({ "target": "http://client:18103/upload" }));
            then.status(200).json_body(serde_json::json!({ "success": true }));
        });

        let client = ControlClient::new(server.base_url());
        let produced = client
            .request_results("sim-1", "http://client:18103/upload")
            .await
            .unwrap();

        mock.assert();
        assert!(produced);
    }

    #[tokio::test]
    async fn request_results_maps_missing_simulation_to_remote_action_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/simulations/ghost/results");
            then.status(404);
        });

        let client = ControlClient::new(server.base_url());
        let err = client
            .request_results("ghost", "http://client:18103/upload")
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::RemoteAction(ref msg) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn request_diagnostics_returns_the_label_mapping() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/simulations/sim-2/diagnostics");
            then.status(200)
                .json_body(serde_json::json!({ "solver": "solver.log", "mesher": "mesh.log" }));
        });

        let client = ControlClient::new(server.base_url());
        let files = client
            .request_diagnostics("sim-2", "http://client:18103/upload")
            .await
            .unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files["solver"], "solver.log");
    }

    #[tokio::test]
    async fn server_error_body_surfaces_in_the_message() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/simulations/sim-3/results");
            then.status(500).body("solver crashed");
        });

        let client = ControlClient::new(server.base_url());
        let err = client
            .request_results("sim-3", "http://client:18103/upload")
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::RemoteAction(ref msg) if msg.contains("solver crashed")));
    }
}
