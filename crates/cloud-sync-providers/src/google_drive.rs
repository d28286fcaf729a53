//! Google Drive (Drive API v3).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cloud_sync::{
    AuthType, ByteStream, CloudProvider, ConnectionCredentials, ListOptions, ProviderCapabilities,
    ProviderError, ProviderMetadata, ProviderType, RemoteFile, RemoteFileStream, RemoteFolder,
    SyncDelta,
};
use serde::Deserialize;

use crate::walk::walk_folders;
use crate::{http, oauth, require_auth_type};

pub const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Drive's alias for the signed-in user's root folder.
const ROOT_ID: &str = "root";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const NATIVE_PREFIX: &str = "application/vnd.google-apps.";
const FILE_FIELDS: &str =
    "id,name,mimeType,size,md5Checksum,createdTime,modifiedTime,parents,webViewLink,version,trashed";
const PAGE_SIZE: u32 = 1000;
const MAX_PATH_DEPTH: usize = 32;
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

/// Export target for a Google-native document: MIME type and extension.
fn export_format(mime_type: &str) -> Option<(&'static str, &'static str)> {
    match mime_type.strip_prefix(NATIVE_PREFIX)? {
        "document" => Some((
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "docx",
        )),
        "spreadsheet" => Some((
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "xlsx",
        )),
        "presentation" => Some((
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            "pptx",
        )),
        "drawing" => Some(("application/pdf", "pdf")),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    md5_checksum: Option<String>,
    #[serde(default)]
    created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    web_view_link: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    trashed: bool,
}

impl DriveFile {
    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    /// Native documents without an export format (forms, sites, ...) have
    /// no byte content to download.
    fn is_downloadable(&self) -> bool {
        !self.mime_type.starts_with(NATIVE_PREFIX) || export_format(&self.mime_type).is_some()
    }

    fn is_new(&self) -> bool {
        self.created_time.is_some() && self.created_time == self.modified_time
    }

    fn into_folder(self, parent_path: &str) -> RemoteFolder {
        let path = format!("{parent_path}/{}", self.name);
        let mut folder = RemoteFolder::new(self.id, self.name, path);
        folder.parent_id = self.parents.into_iter().next();
        folder
    }

    fn into_remote_file(self, parent_path: &str) -> RemoteFile {
        let export = export_format(&self.mime_type);
        let name = match export {
            Some((_, ext)) if !self.name.to_lowercase().ends_with(&format!(".{ext}")) => {
                format!("{}.{ext}", self.name)
            }
            _ => self.name,
        };

        let mut file = RemoteFile::new(self.id, name.clone(), format!("{parent_path}/{name}"));
        file.mime_type = Some(match export {
            Some((mime, _)) => mime.to_owned(),
            None => self.mime_type,
        });
        file.size_bytes = self.size.and_then(|s| s.parse().ok()).unwrap_or(0);
        file.created_at = self.created_time;
        file.modified_at = self.modified_time;
        file.checksum = self.md5_checksum.clone();
        file.version_id = self.version;
        file.parent_id = self.parents.into_iter().next();
        file.web_view_url = self.web_view_link;
        file.provider_metadata = ProviderMetadata::GoogleDrive {
            md5: self.md5_checksum,
            export_mime_type: export.map(|(mime, _)| mime.to_owned()),
        };
        file
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPageToken {
    start_page_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveChange {
    file_id: String,
    #[serde(default)]
    removed: bool,
    #[serde(default)]
    file: Option<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeList {
    #[serde(default)]
    changes: Vec<DriveChange>,
    next_page_token: Option<String>,
    new_start_page_token: Option<String>,
}

/// Google Drive provider.
///
/// Google-native documents are exported to their Office equivalents;
/// natives without an export format are left out of listings.
pub struct GoogleDriveProvider {
    client: reqwest::Client,
    api_base_url: Option<String>,
    credentials: Option<ConnectionCredentials>,
    /// Folder id to path, filled while browsing.
    paths: Mutex<HashMap<String, String>>,
}

impl GoogleDriveProvider {
    pub fn new(api_base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base_url,
            credentials: None,
            paths: Mutex::new(HashMap::new()),
        }
    }

    fn api_base(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DRIVE_API)
    }

    fn url(&self, path: &str) -> String {
        http::join_url(self.api_base(), path)
    }

    fn bearer(&self) -> Result<&str, ProviderError> {
        self.credentials
            .as_ref()
            .and_then(|c| c.auth.bearer_token())
            .ok_or_else(|| ProviderError::Authentication("Google Drive is not authenticated".into()))
    }

    fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, ProviderError> {
        Ok(self
            .client
            .get(url)
            .header("User-Agent", http::USER_AGENT)
            .bearer_auth(self.bearer()?))
    }

    /// Drive reports quota exhaustion as 403 with a `rateLimitExceeded`
    /// reason, so that case is split off before the generic mapping.
    async fn check(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        if response.status().as_u16() != 403 {
            return http::check(response, context).await;
        }

        let retry = http::retry_after(response.headers());
        let body = http::error_body(response).await;
        if body.contains("rateLimitExceeded") {
            Err(ProviderError::RateLimited {
                retry_after: retry.unwrap_or(DEFAULT_RATE_LIMIT_WAIT),
            })
        } else {
            Err(ProviderError::PermissionDenied(format!("{context}: {body}")))
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = request.send().await.map_err(http::transport_error)?;
        self.check(response, context).await
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let request = self.get(&self.url("about"))?.query(&[("fields", "user")]);
        self.send(request, "about").await.map(|_| ())
    }

    async fn fetch_file(&self, file_id: &str) -> Result<DriveFile, ProviderError> {
        let url = self.url(&format!("files/{}", urlencoding::encode(file_id)));
        let request = self
            .get(&url)?
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")]);
        let response = self.send(request, file_id).await?;
        http::json(response).await
    }

    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveFile>, ProviderError> {
        let query = format!("'{}' in parents and trashed = false", folder_id.replace('\'', "\\'"));
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.clone()),
                ("fields", fields.clone()),
                ("pageSize", PAGE_SIZE.to_string()),
                ("supportsAllDrives", "true".to_owned()),
                ("includeItemsFromAllDrives", "true".to_owned()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let request = self.get(&self.url("files"))?.query(&params);
            let page: FileList = http::json(self.send(request, folder_id).await?).await?;
            items.extend(page.files);

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(items)
    }

    fn cached_path(&self, folder_id: &str) -> Option<String> {
        self.paths
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(folder_id)
            .cloned()
    }

    fn remember_path(&self, folder_id: &str, path: &str) {
        self.paths
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(folder_id.to_owned(), path.to_owned());
    }

    /// Path of a folder relative to the drive root, without a trailing
    /// slash. The root itself is the empty string.
    async fn folder_path(&self, folder_id: &str) -> Result<String, ProviderError> {
        let mut names = Vec::new();
        let mut current = folder_id.to_owned();

        let base = loop {
            if current == ROOT_ID {
                break String::new();
            }
            if let Some(path) = self.cached_path(&current) {
                break path;
            }
            if names.len() >= MAX_PATH_DEPTH {
                break String::new();
            }

            let folder = self.fetch_file(&current).await?;
            // A folder without parents is a drive root.
            let Some(parent) = folder.parents.into_iter().next() else {
                break String::new();
            };
            names.push(folder.name);
            current = parent;
        };

        let path = names
            .iter()
            .rev()
            .fold(base, |acc, name| format!("{acc}/{name}"));
        self.remember_path(folder_id, &path);
        Ok(path)
    }

    async fn parent_path(&self, file: &DriveFile) -> Result<String, ProviderError> {
        match file.parents.first() {
            Some(parent) => self.folder_path(parent).await,
            None => Ok(String::new()),
        }
    }
}

#[async_trait::async_trait]
impl CloudProvider for GoogleDriveProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::GoogleDrive
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            auth_types: vec![AuthType::OAuth2, AuthType::AppToken],
            delta_sync: true,
            attachments: false,
            folders: true,
            file_download: true,
            max_page_size: PAGE_SIZE,
        }
    }

    async fn authenticate(&mut self, credentials: ConnectionCredentials) -> Result<bool, ProviderError> {
        require_auth_type(&self.capabilities(), &credentials)?;
        let can_refresh = credentials.auth.has_refresh_token();
        let expired = credentials.auth.is_expired();
        self.credentials = Some(credentials);

        if expired && can_refresh {
            self.refresh_credentials().await?;
        }

        match self.probe().await {
            Err(ProviderError::Authentication(_)) if can_refresh && !expired => {
                self.refresh_credentials().await?;
                self.probe().await?;
            }
            other => other?,
        }

        tracing::debug!("authenticated with Google Drive");
        Ok(true)
    }

    async fn validate_credentials(&self) -> bool {
        self.probe().await.is_ok()
    }

    async fn refresh_credentials(&mut self) -> Result<ConnectionCredentials, ProviderError> {
        let credentials = self
            .credentials
            .as_mut()
            .ok_or_else(|| ProviderError::Authentication("no credentials to refresh".into()))?;
        oauth::refresh(&self.client, credentials, GOOGLE_TOKEN_URL).await?;
        Ok(credentials.clone())
    }

    async fn list_root_folders(&self) -> Result<Vec<RemoteFolder>, ProviderError> {
        let mut root = RemoteFolder::new(ROOT_ID, "My Drive", "/");
        root.is_root = true;
        Ok(vec![root])
    }

    async fn list_folder_contents(
        &self,
        folder_id: &str,
    ) -> Result<(Vec<RemoteFolder>, Vec<RemoteFile>), ProviderError> {
        let parent_path = self.folder_path(folder_id).await?;
        let mut folders = Vec::new();
        let mut files = Vec::new();

        for item in self.list_children(folder_id).await? {
            if item.trashed {
                continue;
            }
            if item.is_folder() {
                let folder = item.into_folder(&parent_path);
                self.remember_path(&folder.id, &folder.path);
                folders.push(folder);
            } else if item.is_downloadable() {
                files.push(item.into_remote_file(&parent_path));
            } else {
                tracing::debug!(file_id = %item.id, mime_type = %item.mime_type, "skipping Google-native file with no export format");
            }
        }

        Ok((folders, files))
    }

    async fn get_file_metadata(&self, file_id: &str) -> Result<RemoteFile, ProviderError> {
        let item = self.fetch_file(file_id).await?;
        if item.is_folder() {
            return Err(ProviderError::NotFound(format!("{file_id} is a folder")));
        }
        let parent_path = self.parent_path(&item).await?;
        Ok(item.into_remote_file(&parent_path))
    }

    async fn download_file(&self, file_id: &str) -> Result<ByteStream, ProviderError> {
        let item = self.fetch_file(file_id).await?;
        if item.is_folder() {
            return Err(ProviderError::NotFound(format!("{file_id} is a folder")));
        }

        let encoded = urlencoding::encode(file_id);
        let request = if item.mime_type.starts_with(NATIVE_PREFIX) {
            let Some((export_mime, _)) = export_format(&item.mime_type) else {
                return Err(ProviderError::PermissionDenied(format!(
                    "{} ({}) cannot be exported",
                    item.name, item.mime_type
                )));
            };
            self.get(&self.url(&format!("files/{encoded}/export")))?
                .query(&[("mimeType", export_mime)])
        } else {
            self.get(&self.url(&format!("files/{encoded}")))?
                .query(&[("alt", "media"), ("supportsAllDrives", "true")])
        };

        let response = self.send(request, file_id).await?;
        Ok(http::byte_stream(response))
    }

    fn list_all_files<'a>(&'a self, options: &'a ListOptions) -> RemoteFileStream<'a> {
        walk_folders(self, options, ROOT_ID)
    }

    async fn get_changes(&self, delta_token: Option<&str>) -> Result<SyncDelta, ProviderError> {
        let Some(token) = delta_token else {
            let request = self
                .get(&self.url("changes/startPageToken"))?
                .query(&[("supportsAllDrives", "true")]);
            let start: StartPageToken = http::json(self.send(request, "startPageToken").await?).await?;
            return Ok(SyncDelta::unchanged(start.start_page_token));
        };

        let fields = format!(
            "nextPageToken,newStartPageToken,changes(fileId,removed,file({FILE_FIELDS}))"
        );
        let request = self.get(&self.url("changes"))?.query(&[
            ("pageToken", token.to_owned()),
            ("fields", fields),
            ("includeRemoved", "true".to_owned()),
            ("pageSize", PAGE_SIZE.to_string()),
            ("supportsAllDrives", "true".to_owned()),
            ("includeItemsFromAllDrives", "true".to_owned()),
        ]);

        let response = request.send().await.map_err(http::transport_error)?;
        if matches!(response.status().as_u16(), 400 | 410) {
            let body = http::error_body(response).await;
            return Err(ProviderError::ExpiredCursor(format!("{token}: {body}")));
        }
        let page: ChangeList = http::json(self.check(response, "changes").await?).await?;

        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut deleted = Vec::new();

        for change in page.changes {
            let file = match change.file {
                Some(file) if !change.removed && !file.trashed => file,
                _ => {
                    deleted.push(change.file_id);
                    continue;
                }
            };
            if file.is_folder() || !file.is_downloadable() {
                continue;
            }

            let is_new = file.is_new();
            let parent_path = self.parent_path(&file).await?;
            let remote = file.into_remote_file(&parent_path);
            if is_new {
                added.push(remote);
            } else {
                modified.push(remote);
            }
        }

        let (next, has_more) = match (page.next_page_token, page.new_start_page_token) {
            (Some(next), _) => (Some(next), true),
            (None, Some(fresh)) => (Some(fresh), false),
            (None, None) => (Some(token.to_owned()), false),
        };

        Ok(SyncDelta::new(added, modified, deleted, next, has_more))
    }
}
