//! OneDrive through Microsoft Graph.

use chrono::{DateTime, Utc};
use cloud_sync::{
    AuthType, ByteStream, CloudProvider, ConnectionCredentials, ListOptions, ProviderCapabilities,
    ProviderError, ProviderMetadata, ProviderType, RemoteFile, RemoteFileStream, RemoteFolder,
    SyncDelta,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::walk::walk_folders;
use crate::{http, oauth, require_auth_type};

pub const GRAPH_API: &str = "https://graph.microsoft.com/v1.0";
pub const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

const ROOT_ID: &str = "root";
const PAGE_SIZE: u32 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemReference {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    drive_id: Option<String>,
    /// `/drive/root:/Some/Folder`
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileFacet {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    hashes: Option<Hashes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hashes {
    #[serde(default)]
    sha256_hash: Option<String>,
    #[serde(default)]
    sha1_hash: Option<String>,
    #[serde(default)]
    quick_xor_hash: Option<String>,
}

impl Hashes {
    fn strongest(self) -> Option<String> {
        self.sha256_hash.or(self.sha1_hash).or(self.quick_xor_hash)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    web_url: Option<String>,
    #[serde(default)]
    created_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    e_tag: Option<String>,
    #[serde(default)]
    c_tag: Option<String>,
    #[serde(default)]
    parent_reference: Option<ItemReference>,
    #[serde(default)]
    file: Option<FileFacet>,
    #[serde(default)]
    folder: Option<serde_json::Value>,
    #[serde(default)]
    root: Option<serde_json::Value>,
    #[serde(default)]
    deleted: Option<serde_json::Value>,
}

impl DriveItem {
    fn parent_path(&self) -> String {
        self.parent_reference
            .as_ref()
            .and_then(|r| r.path.as_deref())
            .map(|p| match p.split_once("root:") {
                Some((_, rest)) => urlencoding::decode(rest)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| rest.to_owned()),
                None => String::new(),
            })
            .unwrap_or_default()
    }

    fn parent_id(&self) -> Option<String> {
        self.parent_reference.as_ref().and_then(|r| r.id.clone())
    }

    fn is_new(&self) -> bool {
        self.created_date_time.is_some() && self.created_date_time == self.last_modified_date_time
    }

    fn into_folder(self) -> RemoteFolder {
        let name = self.name.clone().unwrap_or_default();
        let path = format!("{}/{name}", self.parent_path());
        let parent_id = self.parent_id();
        let has_children = self
            .folder
            .as_ref()
            .and_then(|f| f.get("childCount"))
            .and_then(|c| c.as_u64())
            .is_none_or(|count| count > 0);

        let mut folder = RemoteFolder::new(self.id, name, path);
        folder.parent_id = parent_id;
        folder.has_children = has_children;
        folder
    }

    fn into_remote_file(self) -> RemoteFile {
        let name = self.name.clone().unwrap_or_default();
        let path = format!("{}/{name}", self.parent_path());
        let parent_id = self.parent_id();
        let drive_id = self.parent_reference.and_then(|r| r.drive_id);
        let (mime_type, checksum) = match self.file {
            Some(facet) => (facet.mime_type, facet.hashes.and_then(Hashes::strongest)),
            None => (None, None),
        };

        let mut file = RemoteFile::new(self.id, name, path);
        file.mime_type = mime_type;
        file.size_bytes = self.size.unwrap_or(0);
        file.created_at = self.created_date_time;
        file.modified_at = self.last_modified_date_time;
        file.checksum = checksum;
        file.etag = self.e_tag;
        file.parent_id = parent_id;
        file.web_view_url = self.web_url;
        file.provider_metadata = ProviderMetadata::OneDrive {
            drive_id,
            c_tag: self.c_tag,
        };
        file
    }
}

#[derive(Debug, Deserialize)]
struct ItemPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink", default)]
    delta_link: Option<String>,
}

/// OneDrive / SharePoint document library provider.
///
/// Delta cursors are the `@odata.nextLink` / `@odata.deltaLink` URLs Graph
/// hands back, stored verbatim.
pub struct OneDriveProvider {
    client: reqwest::Client,
    api_base_url: Option<String>,
    credentials: Option<ConnectionCredentials>,
}

impl OneDriveProvider {
    pub fn new(api_base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base_url,
            credentials: None,
        }
    }

    fn api_base(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(GRAPH_API)
    }

    fn url(&self, path: &str) -> String {
        http::join_url(self.api_base(), path)
    }

    fn item_url(&self, item_id: &str, suffix: &str) -> String {
        if item_id == ROOT_ID {
            self.url(&format!("me/drive/root{suffix}"))
        } else {
            self.url(&format!(
                "me/drive/items/{}{suffix}",
                urlencoding::encode(item_id)
            ))
        }
    }

    fn bearer(&self) -> Result<&str, ProviderError> {
        self.credentials
            .as_ref()
            .and_then(|c| c.auth.bearer_token())
            .ok_or_else(|| ProviderError::Authentication("OneDrive is not authenticated".into()))
    }

    async fn send(&self, url: &str, context: &str) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", http::USER_AGENT)
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .map_err(http::transport_error)?;
        http::check(response, context).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, context: &str) -> Result<T, ProviderError> {
        http::json(self.send(url, context).await?).await
    }

    async fn children(&self, folder_id: &str) -> Result<Vec<DriveItem>, ProviderError> {
        let mut items = Vec::new();
        let mut next = Some(format!(
            "{}?$top={PAGE_SIZE}",
            self.item_url(folder_id, "/children")
        ));

        while let Some(url) = next {
            let page: ItemPage = self.get_json(&url, folder_id).await?;
            items.extend(page.value);
            next = page.next_link;
        }

        Ok(items)
    }
}

#[async_trait::async_trait]
impl CloudProvider for OneDriveProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OneDrive
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

        let drive: serde_json::Value = match self.get_json(&self.url("me/drive"), "me/drive").await {
            Err(ProviderError::Authentication(_)) if can_refresh && !expired => {
                self.refresh_credentials().await?;
                self.get_json(&self.url("me/drive"), "me/drive").await?
            }
            other => other?,
        };
        tracing::debug!(drive_id = ?drive.get("id"), "authenticated with Microsoft Graph");
        Ok(true)
    }

    async fn validate_credentials(&self) -> bool {
        self.send(&self.url("me/drive"), "me/drive").await.is_ok()
    }

    async fn refresh_credentials(&mut self) -> Result<ConnectionCredentials, ProviderError> {
        let credentials = self
            .credentials
            .as_mut()
            .ok_or_else(|| ProviderError::Authentication("no credentials to refresh".into()))?;
        oauth::refresh(&self.client, credentials, MICROSOFT_TOKEN_URL).await?;
        Ok(credentials.clone())
    }

    async fn list_root_folders(&self) -> Result<Vec<RemoteFolder>, ProviderError> {
        let root: DriveItem = self.get_json(&self.item_url(ROOT_ID, ""), "root").await?;
        let mut folder = RemoteFolder::new(root.id, root.name.unwrap_or_else(|| "root".into()), "/");
        folder.is_root = true;
        Ok(vec![folder])
    }

    async fn list_folder_contents(
        &self,
        folder_id: &str,
    ) -> Result<(Vec<RemoteFolder>, Vec<RemoteFile>), ProviderError> {
        let mut folders = Vec::new();
        let mut files = Vec::new();

        for item in self.children(folder_id).await? {
            if item.folder.is_some() {
                folders.push(item.into_folder());
            } else if item.file.is_some() {
                files.push(item.into_remote_file());
            }
        }

        Ok((folders, files))
    }

    async fn get_file_metadata(&self, file_id: &str) -> Result<RemoteFile, ProviderError> {
        let item: DriveItem = self.get_json(&self.item_url(file_id, ""), file_id).await?;
        if item.file.is_none() {
            return Err(ProviderError::NotFound(format!("{file_id} is not a file")));
        }
        Ok(item.into_remote_file())
    }

    async fn download_file(&self, file_id: &str) -> Result<ByteStream, ProviderError> {
        let response = self.send(&self.item_url(file_id, "/content"), file_id).await?;
        Ok(http::byte_stream(response))
    }

    fn list_all_files<'a>(&'a self, options: &'a ListOptions) -> RemoteFileStream<'a> {
        walk_folders(self, options, ROOT_ID)
    }

    async fn get_changes(&self, delta_token: Option<&str>) -> Result<SyncDelta, ProviderError> {
        let Some(token) = delta_token else {
            let url = format!("{}?token=latest", self.item_url(ROOT_ID, "/delta"));
            let page: ItemPage = self.get_json(&url, "delta").await?;
            let link = page
                .delta_link
                .ok_or_else(|| ProviderError::Parse("delta response carried no deltaLink".into()))?;
            return Ok(SyncDelta::unchanged(link));
        };

        let url = if token.starts_with("http://") || token.starts_with("https://") {
            token.to_owned()
        } else {
            format!(
                "{}?token={}",
                self.item_url(ROOT_ID, "/delta"),
                urlencoding::encode(token)
            )
        };

        let response = self
            .client
            .get(&url)
            .header("User-Agent", http::USER_AGENT)
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .map_err(http::transport_error)?;
        if response.status().as_u16() == 410 {
            let body = http::error_body(response).await;
            return Err(ProviderError::ExpiredCursor(body));
        }
        let page: ItemPage = http::json(http::check(response, "delta").await?).await?;

        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut deleted = Vec::new();

        for item in page.value {
            if item.deleted.is_some() {
                deleted.push(item.id);
            } else if item.root.is_some() || item.folder.is_some() || item.file.is_none() {
                continue;
            } else if item.is_new() {
                added.push(item.into_remote_file());
            } else {
                modified.push(item.into_remote_file());
            }
        }

        let (next, has_more) = match (page.next_link, page.delta_link) {
            (Some(next), _) => (next, true),
            (None, Some(delta)) => (delta, false),
            (None, None) => {
                return Err(ProviderError::Parse(
                    "delta response carried neither nextLink nor deltaLink".into(),
                ));
            }
        };

        Ok(SyncDelta::new(added, modified, deleted, Some(next), has_more))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(json: serde_json::Value) -> DriveItem {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn path_comes_from_parent_reference() {
        let file = item(serde_json::json!({
            "id": "01A",
            "name": "notes.txt",
            "size": 12,
            "eTag": "e1",
            "cTag": "c1",
            "parentReference": { "id": "01P", "driveId": "d1", "path": "/drive/root:/Work" },
            "file": { "mimeType": "text/plain", "hashes": { "sha1Hash": "aa" } }
        }))
        .into_remote_file();

        assert_eq!(file.path, "/Work/notes.txt");
        assert_eq!(file.parent_id.as_deref(), Some("01P"));
        assert_eq!(file.checksum.as_deref(), Some("aa"));
        assert_eq!(
            file.provider_metadata,
            ProviderMetadata::OneDrive {
                drive_id: Some("d1".into()),
                c_tag: Some("c1".into()),
            }
        );
    }

    #[test]
    fn top_level_items_sit_under_root() {
        let file = item(serde_json::json!({
            "id": "01B",
            "name": "a.pdf",
            "parentReference": { "path": "/drive/root:" },
            "file": {}
        }))
        .into_remote_file();
        assert_eq!(file.path, "/a.pdf");
    }
}
