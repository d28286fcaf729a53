use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_stream::stream;
use chrono::{DateTime, Utc};
use cloud_sync::{
    AuthType, ByteStream, CloudProvider, ConnectionCredentials, ListOptions, ProviderCapabilities,
    ProviderError, ProviderMetadata, ProviderType, RemoteFile, RemoteFileStream, RemoteFolder,
    SyncDelta,
};
use futures::TryStreamExt;
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;

use super::client::EtlClient;
use super::sources::source_configuration;
use super::types::{
    ConnectionCreate, ConnectionResponse, EtlJobStatus, JobResponse, StreamConfiguration,
    StreamConfigurations,
};
use crate::require_auth_type;

/// Name of the shared local-JSON destination every delegated connection
/// writes into.
pub const SINK_DESTINATION_NAME: &str = "cloud-sync-sink";
/// Destination path inside the backend; maps to `EtlSettings::sink_root`.
const SINK_DESTINATION_PATH: &str = "/local/cloud-sync";
const ROOT_ID: &str = "root";
const JSONL_MIME: &str = "application/x-ndjson";

/// Options read from `ConnectionCredentials::extra`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DelegatedOptions {
    /// Distinguishes several connections of the same provider type.
    pub label: Option<String>,
    /// Streams to sync. Empty selects every discovered stream.
    pub streams: Vec<String>,
    /// Merged over the generated source configuration.
    pub source_config: BTreeMap<String, serde_json::Value>,
}

/// The backend connection a provider instance syncs through.
#[derive(Debug, Clone)]
struct EtlConnection {
    connection_id: String,
    prefix: String,
    streams: Vec<String>,
}

impl From<ConnectionResponse> for EtlConnection {
    fn from(connection: ConnectionResponse) -> Self {
        Self {
            connection_id: connection.connection_id,
            prefix: connection.prefix.unwrap_or_default(),
            streams: connection
                .configurations
                .streams
                .into_iter()
                .map(|s| s.name)
                .collect(),
        }
    }
}

/// A SaaS source reached through the ETL backend.
///
/// The first operation that needs it resolves (or creates) the source, the
/// shared sink destination and a connection named `cloud-sync-<label>`.
/// Each stream's JSONL output in the sink is presented as one file.
/// Changes are "run a sync job": every stream that produced records is
/// reported as modified, and the job id becomes the cursor.
pub struct DelegatedProvider {
    provider_type: ProviderType,
    client: Arc<EtlClient>,
    credentials: Option<ConnectionCredentials>,
    options: DelegatedOptions,
    connection: OnceCell<EtlConnection>,
    last_job: Mutex<Option<String>>,
}

impl DelegatedProvider {
    pub fn new(provider_type: ProviderType, client: Arc<EtlClient>) -> Self {
        Self {
            provider_type,
            client,
            credentials: None,
            options: DelegatedOptions::default(),
            connection: OnceCell::new(),
            last_job: Mutex::new(None),
        }
    }

    fn label(&self) -> String {
        let raw = self
            .options
            .label
            .as_deref()
            .unwrap_or(self.provider_type.as_str());
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect()
    }

    pub fn connection_name(&self) -> String {
        format!("cloud-sync-{}", self.label())
    }

    fn stream_prefix(&self) -> String {
        format!("{}_", self.label().replace('-', "_"))
    }

    fn source_configuration(&self) -> Result<serde_json::Value, ProviderError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ProviderError::Authentication(format!("{} is not authenticated", self.provider_type))
        })?;

        let mut configuration = source_configuration(self.provider_type, credentials)?;
        if let Some(object) = configuration.as_object_mut() {
            for (key, value) in &self.options.source_config {
                object.insert(key.clone(), value.clone());
            }
        }
        Ok(configuration)
    }

    async fn connection(&self) -> Result<&EtlConnection, ProviderError> {
        self.connection.get_or_try_init(|| self.set_up()).await
    }

    async fn set_up(&self) -> Result<EtlConnection, ProviderError> {
        let name = self.connection_name();
        let existing = self
            .client
            .list_connections()
            .await?
            .into_iter()
            .find(|c| c.name == name);
        if let Some(connection) = existing {
            tracing::debug!(connection_id = %connection.connection_id, %name, "reusing ETL connection");
            return Ok(connection.into());
        }

        let configuration = self.source_configuration()?;
        let source = self.client.create_source(&name, &configuration).await?;

        match self.connect_source(&name, &source.source_id).await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                tracing::warn!(source_id = %source.source_id, error = %e, "ETL setup failed; removing new source");
                if let Err(cleanup) = self.client.delete_source(&source.source_id).await {
                    tracing::warn!(source_id = %source.source_id, error = %cleanup, "failed to remove ETL source");
                }
                Err(e)
            }
        }
    }

    async fn connect_source(&self, name: &str, source_id: &str) -> Result<EtlConnection, ProviderError> {
        let destination_id = self.sink_destination().await?;

        let discovered = self.client.discover_schema(source_id).await?;
        let selected: Vec<StreamConfiguration> = discovered
            .into_iter()
            .filter(|s| self.options.streams.is_empty() || self.options.streams.contains(&s.stream_name))
            .map(|s| {
                let incremental = s.sync_modes.iter().any(|m| m == "incremental_append");
                StreamConfiguration {
                    name: s.stream_name,
                    sync_mode: Some(
                        if incremental {
                            "incremental_append"
                        } else {
                            "full_refresh_overwrite"
                        }
                        .to_owned(),
                    ),
                }
            })
            .collect();

        if selected.is_empty() {
            return Err(ProviderError::Configuration(format!(
                "no streams selected for {name}"
            )));
        }

        let created = self
            .client
            .create_connection(&ConnectionCreate {
                name: name.to_owned(),
                source_id: source_id.to_owned(),
                destination_id,
                prefix: Some(self.stream_prefix()),
                configurations: StreamConfigurations { streams: selected },
            })
            .await?;
        Ok(created.into())
    }

    async fn sink_destination(&self) -> Result<String, ProviderError> {
        let existing = self
            .client
            .list_destinations()
            .await?
            .into_iter()
            .find(|d| d.name == SINK_DESTINATION_NAME);
        if let Some(destination) = existing {
            return Ok(destination.destination_id);
        }

        let configuration = serde_json::json!({
            "destinationType": "local-json",
            "destination_path": SINK_DESTINATION_PATH,
        });
        let created = self
            .client
            .create_destination(SINK_DESTINATION_NAME, &configuration)
            .await?;
        Ok(created.destination_id)
    }

    /// Trigger a sync on the connection and wait for it to succeed.
    async fn run_job(&self) -> Result<JobResponse, ProviderError> {
        let connection = self.connection().await?;
        let started = self.client.trigger_sync(&connection.connection_id).await?;
        let job = self.client.wait_for_job(started.job_id).await?;

        if job.status != EtlJobStatus::Succeeded {
            return Err(ProviderError::Other(format!(
                "ETL job {} ended as {:?}",
                job.job_id, job.status
            )));
        }

        *self
            .last_job
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(job.job_id.to_string());
        Ok(job)
    }

    fn last_job(&self) -> Option<String> {
        self.last_job
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn sink_file(&self, connection: &EtlConnection, stream: &str) -> PathBuf {
        self.client
            .settings()
            .sink_root
            .join(format!("_airbyte_raw_{}{stream}.jsonl", connection.prefix))
    }

    /// The sink output of one stream, or `None` if it has no records.
    async fn stream_file(
        &self,
        connection: &EtlConnection,
        stream: &str,
        job_id: Option<String>,
    ) -> Result<Option<RemoteFile>, ProviderError> {
        let path = self.sink_file(connection, stream);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProviderError::Other(format!("{}: {e}", path.display()))),
        };

        let records = count_records(&path).await?;
        if records == 0 {
            return Ok(None);
        }

        let mut file = RemoteFile::new(
            stream,
            format!("{stream}.jsonl"),
            format!("/{}/{stream}.jsonl", self.label()),
        );
        file.mime_type = Some(JSONL_MIME.to_owned());
        file.size_bytes = metadata.len();
        file.modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
        file.parent_id = Some(stream.to_owned());
        file.provider_metadata = ProviderMetadata::Delegated {
            stream: stream.to_owned(),
            records_synced: records,
            job_id,
        };
        Ok(Some(file))
    }

    async fn stream_files(&self, selected: &[String]) -> Result<Vec<RemoteFile>, ProviderError> {
        let connection = self.connection().await?;
        let job_id = self.last_job();
        let mut files = Vec::new();

        for stream in &connection.streams {
            if !selected.is_empty() && !selected.contains(stream) {
                continue;
            }
            if let Some(file) = self.stream_file(connection, stream, job_id.clone()).await? {
                files.push(file);
            }
        }

        Ok(files)
    }
}

async fn count_records(path: &std::path::Path) -> Result<u64, ProviderError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ProviderError::Other(format!("{}: {e}", path.display())))?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut count = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| ProviderError::Parse(format!("{}: {e}", path.display())))?
    {
        if !line.trim().is_empty() {
            count += 1;
        }
    }

    Ok(count)
}

#[async_trait::async_trait]
impl CloudProvider for DelegatedProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn capabilities(&self) -> ProviderCapabilities {
        let (auth_types, attachments) = match self.provider_type {
            ProviderType::Confluence | ProviderType::Jira => (vec![AuthType::ApiKey], true),
            ProviderType::Gmail => (vec![AuthType::OAuth2], true),
            _ => (vec![AuthType::AppToken, AuthType::OAuth2], false),
        };

        ProviderCapabilities {
            auth_types,
            delta_sync: true,
            attachments,
            folders: true,
            file_download: true,
            max_page_size: 0,
        }
    }

    async fn authenticate(&mut self, credentials: ConnectionCredentials) -> Result<bool, ProviderError> {
        require_auth_type(&self.capabilities(), &credentials)?;
        self.options = credentials.options()?;
        source_configuration(self.provider_type, &credentials)?;
        self.credentials = Some(credentials);

        self.client.list_connections().await?;
        tracing::debug!(provider = %self.provider_type, connection = %self.connection_name(), "ETL backend reachable");
        Ok(true)
    }

    async fn validate_credentials(&self) -> bool {
        self.credentials.is_some() && self.client.list_connections().await.is_ok()
    }

    async fn list_root_folders(&self) -> Result<Vec<RemoteFolder>, ProviderError> {
        let mut root = RemoteFolder::new(ROOT_ID, self.label(), "/");
        root.is_root = true;
        Ok(vec![root])
    }

    async fn list_folder_contents(
        &self,
        folder_id: &str,
    ) -> Result<(Vec<RemoteFolder>, Vec<RemoteFile>), ProviderError> {
        let connection = self.connection().await?;

        if folder_id == ROOT_ID {
            let folders = connection
                .streams
                .iter()
                .map(|stream| {
                    let mut folder = RemoteFolder::new(stream, stream, format!("/{stream}"));
                    folder.parent_id = Some(ROOT_ID.to_owned());
                    folder.has_children = false;
                    folder
                })
                .collect();
            return Ok((folders, Vec::new()));
        }

        if !connection.streams.iter().any(|s| s == folder_id) {
            return Err(ProviderError::NotFound(folder_id.to_owned()));
        }
        let files = self.stream_files(&[folder_id.to_owned()]).await?;
        Ok((Vec::new(), files))
    }

    async fn get_file_metadata(&self, file_id: &str) -> Result<RemoteFile, ProviderError> {
        let connection = self.connection().await?;
        self.stream_file(connection, file_id, self.last_job())
            .await?
            .ok_or_else(|| ProviderError::NotFound(file_id.to_owned()))
    }

    async fn download_file(&self, file_id: &str) -> Result<ByteStream, ProviderError> {
        let connection = self.connection().await?;
        let path = self.sink_file(connection, file_id);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::NotFound(file_id.to_owned()));
            }
            Err(e) => return Err(ProviderError::Other(format!("{}: {e}", path.display()))),
        };

        Ok(Box::pin(ReaderStream::new(file).map_err(|e| {
            ProviderError::Other(format!("reading sink output failed: {e}"))
        })))
    }

    fn list_all_files<'a>(&'a self, options: &'a ListOptions) -> RemoteFileStream<'a> {
        let selected: Vec<String> = options
            .folder_ids
            .iter()
            .filter(|id| id.as_str() != ROOT_ID)
            .cloned()
            .collect();

        Box::pin(stream! {
            if let Err(e) = self.run_job().await {
                yield Err(e);
                return;
            }
            match self.stream_files(&selected).await {
                Ok(files) => {
                    for file in files {
                        yield Ok(file);
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }

    async fn get_changes(&self, delta_token: Option<&str>) -> Result<SyncDelta, ProviderError> {
        if delta_token.is_none() {
            let token = self.last_job().unwrap_or_else(|| "initial".to_owned());
            return Ok(SyncDelta::unchanged(token));
        }

        let job = self.run_job().await?;
        let token = job.job_id.to_string();
        if job.rows_synced == 0 {
            return Ok(SyncDelta::unchanged(token));
        }

        let modified = self.stream_files(&[]).await?;
        Ok(SyncDelta::new(Vec::new(), modified, Vec::new(), Some(token), false))
    }
}
