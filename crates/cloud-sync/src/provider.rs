use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::credentials::{AuthType, ConnectionCredentials};
use crate::delta::SyncDelta;
use crate::error::ProviderError;
use crate::file::{RemoteFile, RemoteFolder};

/// Raw file contents, yielded chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Lazily produced file listing. Calling `list_all_files` again restarts it.
pub type RemoteFileStream<'a> = Pin<Box<dyn Stream<Item = Result<RemoteFile, ProviderError>> + Send + 'a>>;

/// Every backend this system can mirror from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    GoogleDrive,
    #[serde(rename = "onedrive")]
    OneDrive,
    #[serde(rename = "webdav")]
    WebDav,
    Confluence,
    Jira,
    Notion,
    Slack,
    Gmail,
}

/// How a provider reaches its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    /// Talks to the remote REST/WebDAV API itself.
    Direct,
    /// Drives the external ETL backend's resource lifecycle.
    Delegated,
}

impl ProviderType {
    pub const ALL: [ProviderType; 8] = [
        Self::GoogleDrive,
        Self::OneDrive,
        Self::WebDav,
        Self::Confluence,
        Self::Jira,
        Self::Notion,
        Self::Slack,
        Self::Gmail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoogleDrive => "google-drive",
            Self::OneDrive => "onedrive",
            Self::WebDav => "webdav",
            Self::Confluence => "confluence",
            Self::Jira => "jira",
            Self::Notion => "notion",
            Self::Slack => "slack",
            Self::Gmail => "gmail",
        }
    }

    pub fn family(self) -> ProviderFamily {
        match self {
            Self::GoogleDrive | Self::OneDrive | Self::WebDav => ProviderFamily::Direct,
            Self::Confluence | Self::Jira | Self::Notion | Self::Slack | Self::Gmail => {
                ProviderFamily::Delegated
            }
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ProviderError::Configuration(format!("unknown provider type: {s}")))
    }
}

/// What a provider supports. The sync worker reads this before choosing a
/// full or incremental strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub auth_types: Vec<AuthType>,
    pub delta_sync: bool,
    pub attachments: bool,
    pub folders: bool,
    pub file_download: bool,
    pub max_page_size: u32,
}

impl ProviderCapabilities {
    pub fn supports_auth(&self, auth: AuthType) -> bool {
        self.auth_types.contains(&auth)
    }
}

/// Parameters for [`CloudProvider::list_all_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Folders to list. Empty means the provider's root.
    pub folder_ids: Vec<String>,
    pub recursive: bool,
    pub page_size: Option<u32>,
}

impl ListOptions {
    pub fn recursive(folder_ids: Vec<String>) -> Self {
        Self {
            folder_ids,
            recursive: true,
            page_size: None,
        }
    }
}

/// A remote data source.
///
/// Direct providers talk to the backend API and handle pagination
/// themselves. Delegated providers implement the same contract on top of
/// the external ETL backend.
#[async_trait::async_trait]
pub trait CloudProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Store the credentials and verify them against the backend.
    ///
    /// Fails with [`ProviderError::Authentication`] on bad or expired
    /// credentials.
    async fn authenticate(&mut self, credentials: ConnectionCredentials) -> Result<bool, ProviderError>;

    /// Non-throwing liveness probe for the stored credentials.
    async fn validate_credentials(&self) -> bool;

    /// Exchange the refresh token for a new access token, updating the
    /// stored credentials in place and returning them.
    async fn refresh_credentials(&mut self) -> Result<ConnectionCredentials, ProviderError> {
        Err(ProviderError::Authentication(format!(
            "{} does not support credential refresh",
            self.provider_type()
        )))
    }

    async fn list_root_folders(&self) -> Result<Vec<RemoteFolder>, ProviderError>;

    async fn list_folder_contents(
        &self,
        folder_id: &str,
    ) -> Result<(Vec<RemoteFolder>, Vec<RemoteFile>), ProviderError>;

    /// Folders below `folder_id`, breadth first, at most `max_depth` levels deep.
    async fn list_folders_recursive(
        &self,
        folder_id: &str,
        max_depth: usize,
    ) -> Result<Vec<RemoteFolder>, ProviderError> {
        let mut found = Vec::new();
        let mut frontier = vec![folder_id.to_owned()];

        for _ in 0..max_depth {
            let mut next = Vec::new();
            for id in &frontier {
                let (folders, _) = self.list_folder_contents(id).await?;
                next.extend(folders.iter().map(|f| f.id.clone()));
                found.extend(folders);
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        Ok(found)
    }

    async fn get_file_metadata(&self, file_id: &str) -> Result<RemoteFile, ProviderError>;

    async fn download_file(&self, file_id: &str) -> Result<ByteStream, ProviderError>;

    /// Walk the requested folders, yielding files as they are discovered.
    fn list_all_files<'a>(&'a self, options: &'a ListOptions) -> RemoteFileStream<'a>;

    /// Changes since `delta_token`. With no token, delta-capable providers
    /// return an empty delta carrying a fresh starting cursor.
    async fn get_changes(&self, delta_token: Option<&str>) -> Result<SyncDelta, ProviderError> {
        let _ = delta_token;
        Err(ProviderError::DeltaSyncUnsupported)
    }
}
