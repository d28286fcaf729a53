use std::path::PathBuf;
use std::time::Duration;

use cloud_sync::ProviderError;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use super::types::{
    ConnectionCreate, ConnectionResponse, DestinationResponse, JobResponse, ListResponse,
    ResourceCreate, SourceResponse, StreamProperties,
};
use crate::http;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const LIST_LIMIT: &str = "100";

/// How to reach the ETL backend and where its sink writes.
#[derive(Debug, Clone)]
pub struct EtlSettings {
    pub base_url: String,
    pub api_token: Option<String>,
    pub workspace_id: String,
    /// Host directory the shared local-JSON destination writes into.
    pub sink_root: PathBuf,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
}

impl EtlSettings {
    pub fn new(
        base_url: impl Into<String>,
        workspace_id: impl Into<String>,
        sink_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            workspace_id: workspace_id.into(),
            sink_root: sink_root.into(),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(3600),
        }
    }
}

fn is_retryable(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Statuses that guarantee the server did not act on the request.
fn is_rejected_unprocessed(status: u16) -> bool {
    matches!(status, 408 | 429 | 503)
}

/// REST client for the ETL backend's resource lifecycle.
///
/// Connect failures, timeouts and transient statuses are retried with
/// exponential backoff (or the server's `Retry-After`) up to
/// `max_attempts`, after which a `Connectivity` error is returned.
/// A `POST` that may already have been applied (a timeout, or a 500, 502
/// or 504) is not retried, so creates never leave duplicates behind.
pub struct EtlClient {
    client: reqwest::Client,
    settings: EtlSettings,
}

impl EtlClient {
    pub fn new(settings: EtlSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(http::USER_AGENT)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &EtlSettings {
        &self.settings
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.settings
            .initial_backoff
            .saturating_mul(factor)
            .min(MAX_BACKOFF)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = http::join_url(&self.settings.base_url, path);
        let max_attempts = self.settings.max_attempts.max(1);
        let idempotent = method != Method::POST;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut request = self.client.request(method.clone(), &url).query(query);
            if let Some(token) = &self.settings.api_token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let (wait, last_error) = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if is_retryable(response.status().as_u16())
                        && (idempotent || is_rejected_unprocessed(response.status().as_u16())) =>
                {
                    let wait = http::retry_after(response.headers())
                        .unwrap_or_else(|| self.backoff(attempt));
                    (wait, format!("HTTP {}", response.status()))
                }
                Ok(response) => return http::check(response, path).await,
                Err(e) if e.is_connect() || (idempotent && e.is_timeout()) => {
                    (self.backoff(attempt), e.to_string())
                }
                Err(e) if e.is_timeout() => {
                    return Err(ProviderError::Connectivity(format!(
                        "{method} {path} timed out and may have been applied; not retried: {e}"
                    )));
                }
                Err(e) => return Err(http::transport_error(e)),
            };

            if attempt >= max_attempts {
                return Err(ProviderError::Connectivity(format!(
                    "{method} {path} failed after {attempt} attempts: {last_error}"
                )));
            }

            tracing::warn!(
                %method,
                path,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %last_error,
                "retrying ETL request"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, ProviderError> {
        http::json(self.send(Method::GET, path, query, None).await?).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ProviderError> {
        let body = serde_json::to_value(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        http::json(self.send(Method::POST, path, &[], Some(&body)).await?).await
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        self.send(Method::DELETE, path, &[], None).await.map(|_| ())
    }

    fn workspace_query(&self) -> [(&str, &str); 2] {
        [
            ("workspaceIds", self.settings.workspace_id.as_str()),
            ("limit", LIST_LIMIT),
        ]
    }

    pub async fn create_source(
        &self,
        name: &str,
        configuration: &serde_json::Value,
    ) -> Result<SourceResponse, ProviderError> {
        let source: SourceResponse = self
            .post(
                "/v1/sources",
                &ResourceCreate {
                    name,
                    workspace_id: &self.settings.workspace_id,
                    configuration,
                },
            )
            .await?;
        tracing::info!(source_id = %source.source_id, name, "created ETL source");
        Ok(source)
    }

    pub async fn get_source(&self, source_id: &str) -> Result<SourceResponse, ProviderError> {
        self.get(&format!("/v1/sources/{source_id}"), &[]).await
    }

    pub async fn delete_source(&self, source_id: &str) -> Result<(), ProviderError> {
        self.delete(&format!("/v1/sources/{source_id}")).await
    }

    pub async fn create_destination(
        &self,
        name: &str,
        configuration: &serde_json::Value,
    ) -> Result<DestinationResponse, ProviderError> {
        let destination: DestinationResponse = self
            .post(
                "/v1/destinations",
                &ResourceCreate {
                    name,
                    workspace_id: &self.settings.workspace_id,
                    configuration,
                },
            )
            .await?;
        tracing::info!(destination_id = %destination.destination_id, name, "created ETL destination");
        Ok(destination)
    }

    pub async fn get_destination(&self, destination_id: &str) -> Result<DestinationResponse, ProviderError> {
        self.get(&format!("/v1/destinations/{destination_id}"), &[])
            .await
    }

    pub async fn list_destinations(&self) -> Result<Vec<DestinationResponse>, ProviderError> {
        let list: ListResponse<DestinationResponse> =
            self.get("/v1/destinations", &self.workspace_query()).await?;
        Ok(list.data)
    }

    pub async fn delete_destination(&self, destination_id: &str) -> Result<(), ProviderError> {
        self.delete(&format!("/v1/destinations/{destination_id}"))
            .await
    }

    pub async fn create_connection(
        &self,
        connection: &ConnectionCreate,
    ) -> Result<ConnectionResponse, ProviderError> {
        let created: ConnectionResponse = self.post("/v1/connections", connection).await?;
        tracing::info!(connection_id = %created.connection_id, name = %created.name, "created ETL connection");
        Ok(created)
    }

    pub async fn get_connection(&self, connection_id: &str) -> Result<ConnectionResponse, ProviderError> {
        self.get(&format!("/v1/connections/{connection_id}"), &[])
            .await
    }

    pub async fn list_connections(&self) -> Result<Vec<ConnectionResponse>, ProviderError> {
        let list: ListResponse<ConnectionResponse> =
            self.get("/v1/connections", &self.workspace_query()).await?;
        Ok(list.data)
    }

    pub async fn delete_connection(&self, connection_id: &str) -> Result<(), ProviderError> {
        self.delete(&format!("/v1/connections/{connection_id}"))
            .await
    }

    /// Streams the source offers.
    pub async fn discover_schema(&self, source_id: &str) -> Result<Vec<StreamProperties>, ProviderError> {
        self.get("/v1/streams", &[("sourceId", source_id)]).await
    }

    pub async fn trigger_sync(&self, connection_id: &str) -> Result<JobResponse, ProviderError> {
        let job: JobResponse = self
            .post(
                "/v1/jobs",
                &serde_json::json!({ "connectionId": connection_id, "jobType": "sync" }),
            )
            .await?;
        tracing::info!(job_id = job.job_id, connection_id, "triggered ETL sync");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<JobResponse, ProviderError> {
        self.get(&format!("/v1/jobs/{job_id}"), &[]).await
    }

    pub async fn cancel_job(&self, job_id: i64) -> Result<(), ProviderError> {
        self.delete(&format!("/v1/jobs/{job_id}")).await
    }

    /// Poll a job until it reaches a terminal status.
    ///
    /// Past `job_timeout` the job is cancelled and a `Connectivity` error
    /// returned.
    pub async fn wait_for_job(&self, job_id: i64) -> Result<JobResponse, ProviderError> {
        let deadline = Instant::now() + self.settings.job_timeout;

        loop {
            let job = self.get_job(job_id).await?;
            if job.status.is_terminal() {
                tracing::info!(job_id, status = ?job.status, rows = job.rows_synced, "ETL job finished");
                return Ok(job);
            }

            if Instant::now() >= deadline {
                if let Err(e) = self.cancel_job(job_id).await {
                    tracing::warn!(job_id, error = %e, "failed to cancel timed-out ETL job");
                }
                return Err(ProviderError::Connectivity(format!(
                    "ETL job {job_id} did not finish within {}s",
                    self.settings.job_timeout.as_secs()
                )));
            }

            tracing::debug!(job_id, status = ?job.status, "waiting for ETL job");
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}
