//! HTTP clients for the manager and the learning engine

use super::{async_trait, LearningEngine, ManagerNotifier, StateValidityOracle};
use crate::models::{LearningEngineTask, StateNotification};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default timeout for collaborator requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimal JSON-over-HTTP client shared by the collaborator clients
#[derive(Debug, Clone)]
struct JsonClient {
    client: Client,
    base_url: Url,
}

impl JsonClient {
    fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        // A trailing slash keeps any path prefix when joining
        let mut base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid collaborator URL: {}", base_url))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.join(path).context("Invalid path")?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path, query)?;
        debug!(url = %url, "GET collaborator");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Collaborator error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path, &[])?;
        debug!(url = %url, "POST collaborator");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Collaborator error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    async fn post_ignoring_body<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.url(path, &[])?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Collaborator error ({}): {}", status, body);
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StateValidityResponse {
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct EnqueueResponse {
    accepted: bool,
}

#[derive(Debug, Deserialize)]
struct TimeoutResponse {
    timed_out: bool,
}

/// Client for the workflow manager owning the state executions
#[derive(Debug, Clone)]
pub struct HttpManagerClient {
    http: JsonClient,
}

impl HttpManagerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.http.base_url
    }
}

#[async_trait]
impl StateValidityOracle for HttpManagerClient {
    async fn is_state_valid(&self, app_id: &str, state_execution_id: &str) -> Result<bool> {
        let response: StateValidityResponse = self
            .http
            .get(
                "api/verification/state-valid",
                &[
                    ("app_id", app_id),
                    ("state_execution_id", state_execution_id),
                ],
            )
            .await?;
        Ok(response.valid)
    }
}

#[async_trait]
impl ManagerNotifier for HttpManagerClient {
    async fn notify(&self, notification: &StateNotification) -> Result<()> {
        self.http
            .post_ignoring_body("api/verification/notify", notification)
            .await
    }
}

/// Client for the learning engine task queue
#[derive(Debug, Clone)]
pub struct HttpLearningEngineClient {
    http: JsonClient,
}

impl HttpLearningEngineClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.http.base_url
    }
}

#[async_trait]
impl LearningEngine for HttpLearningEngineClient {
    async fn enqueue(&self, task: &LearningEngineTask) -> Result<bool> {
        let response: EnqueueResponse = self.http.post("api/learning/tasks", task).await?;
        Ok(response.accepted)
    }

    async fn has_analysis_timed_out(
        &self,
        app_id: &str,
        workflow_execution_id: &str,
        state_execution_id: &str,
    ) -> Result<bool> {
        let response: TimeoutResponse = self
            .http
            .get(
                "api/learning/timeout",
                &[
                    ("app_id", app_id),
                    ("workflow_execution_id", workflow_execution_id),
                    ("state_execution_id", state_execution_id),
                ],
            )
            .await?;
        Ok(response.timed_out)
    }
}
