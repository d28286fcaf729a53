//! Generic WebDAV servers (Nextcloud, ownCloud, Apache mod_dav, ...).

use cloud_sync::{
    AuthCredentials, AuthType, ByteStream, CloudProvider, ConnectionCredentials, ListOptions,
    ProviderCapabilities, ProviderError, ProviderMetadata, ProviderType, RemoteFile,
    RemoteFileStream, RemoteFolder,
};
use reqwest::Method;

use crate::dav::{DavEntry, PROPFIND_BODY, parse_multistatus};
use crate::walk::walk_folders;
use crate::{http, require_auth_type};

const ROOT_ID: &str = "/";

/// Connection state after a successful `authenticate`.
struct Session {
    /// Server URL without a trailing slash.
    base_url: String,
    /// Path component of `base_url`, stripped from response hrefs.
    base_path: String,
    username: String,
    password: String,
}

/// WebDAV provider. Ids are paths relative to the configured server URL.
///
/// WebDAV has no change feed, so every sync is a full listing.
pub struct WebDavProvider {
    client: reqwest::Client,
    session: Option<Session>,
}

impl Default for WebDavProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl WebDavProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            session: None,
        }
    }

    fn session(&self) -> Result<&Session, ProviderError> {
        self.session
            .as_ref()
            .ok_or_else(|| ProviderError::Authentication("WebDAV is not authenticated".into()))
    }

    fn resource_url(session: &Session, id: &str, collection: bool) -> String {
        let encoded: Vec<String> = id
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();

        let mut url = format!("{}/{}", session.base_url, encoded.join("/"));
        if collection && !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    /// Map a response href back to a resource id.
    fn id_from_href(session: &Session, href: &str) -> String {
        let path = match reqwest::Url::parse(href) {
            Ok(url) => url.path().to_owned(),
            Err(_) => href.to_owned(),
        };
        let decoded = urlencoding::decode(&path)
            .map(|d| d.into_owned())
            .unwrap_or(path);

        let relative = decoded
            .strip_prefix(session.base_path.as_str())
            .unwrap_or(&decoded);
        normalize_id(relative)
    }

    async fn propfind(
        &self,
        id: &str,
        depth: u8,
        collection: bool,
    ) -> Result<Vec<(String, DavEntry)>, ProviderError> {
        let session = self.session()?;
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        let response = self
            .client
            .request(method, Self::resource_url(session, id, collection))
            .header("User-Agent", http::USER_AGENT)
            .header("Depth", depth.to_string())
            .header("Content-Type", "application/xml; charset=utf-8")
            .basic_auth(&session.username, Some(&session.password))
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(http::transport_error)?;

        let body = http::check(response, id)
            .await?
            .text()
            .await
            .map_err(http::transport_error)?;

        Ok(parse_multistatus(&body)?
            .into_iter()
            .map(|entry| (Self::id_from_href(session, &entry.href), entry))
            .collect())
    }

    fn to_folder(id: String, entry: DavEntry) -> RemoteFolder {
        let name = entry.display_name.unwrap_or_else(|| last_segment(&id));
        let parent = parent_of(&id);
        let mut folder = RemoteFolder::new(id.clone(), name, &id);
        folder.parent_id = Some(parent);
        folder
    }

    fn to_file(id: String, entry: DavEntry) -> RemoteFile {
        let name = entry.display_name.unwrap_or_else(|| last_segment(&id));
        let mut file = RemoteFile::new(id.clone(), name, &id);
        file.mime_type = entry.content_type;
        file.size_bytes = entry.content_length.unwrap_or(0);
        file.modified_at = entry.last_modified;
        file.created_at = entry.created;
        file.etag = entry.etag;
        file.parent_id = Some(parent_of(&id));
        file.provider_metadata = ProviderMetadata::WebDav { href: entry.href };
        file
    }
}

/// `/a/b` form: one leading slash, none trailing, root is `/`.
fn normalize_id(id: &str) -> String {
    let trimmed = id.trim_matches('/');
    if trimmed.is_empty() {
        ROOT_ID.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

fn last_segment(id: &str) -> String {
    id.rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(ROOT_ID)
        .to_owned()
}

fn parent_of(id: &str) -> String {
    match id.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => ROOT_ID.to_owned(),
        Some((parent, _)) => parent.to_owned(),
    }
}

#[async_trait::async_trait]
impl CloudProvider for WebDavProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::WebDav
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            auth_types: vec![AuthType::Basic],
            delta_sync: false,
            attachments: false,
            folders: true,
            file_download: true,
            max_page_size: 0,
        }
    }

    async fn authenticate(&mut self, credentials: ConnectionCredentials) -> Result<bool, ProviderError> {
        require_auth_type(&self.capabilities(), &credentials)?;

        let server_url = credentials
            .server_url
            .as_deref()
            .ok_or_else(|| ProviderError::Configuration("WebDAV needs a server_url".into()))?;
        let parsed = reqwest::Url::parse(server_url)
            .map_err(|e| ProviderError::Configuration(format!("invalid server_url: {e}")))?;

        let AuthCredentials::Basic { username, password } = credentials.auth else {
            return Err(ProviderError::Configuration("WebDAV needs basic credentials".into()));
        };

        self.session = Some(Session {
            base_url: server_url.trim_end_matches('/').to_owned(),
            base_path: parsed.path().trim_end_matches('/').to_owned(),
            username,
            password,
        });

        if let Err(e) = self.propfind(ROOT_ID, 0, true).await {
            self.session = None;
            return Err(e);
        }

        tracing::debug!(server = %parsed.host_str().unwrap_or_default(), "authenticated with WebDAV server");
        Ok(true)
    }

    async fn validate_credentials(&self) -> bool {
        self.propfind(ROOT_ID, 0, true).await.is_ok()
    }

    async fn list_root_folders(&self) -> Result<Vec<RemoteFolder>, ProviderError> {
        let mut root = RemoteFolder::new(ROOT_ID, ROOT_ID, ROOT_ID);
        root.is_root = true;
        Ok(vec![root])
    }

    async fn list_folder_contents(
        &self,
        folder_id: &str,
    ) -> Result<(Vec<RemoteFolder>, Vec<RemoteFile>), ProviderError> {
        let this = normalize_id(folder_id);
        let mut folders = Vec::new();
        let mut files = Vec::new();

        for (id, entry) in self.propfind(folder_id, 1, true).await? {
            if id == this {
                continue;
            }
            if entry.is_collection {
                folders.push(Self::to_folder(id, entry));
            } else {
                files.push(Self::to_file(id, entry));
            }
        }

        Ok((folders, files))
    }

    async fn get_file_metadata(&self, file_id: &str) -> Result<RemoteFile, ProviderError> {
        let (id, entry) = self
            .propfind(file_id, 0, false)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(file_id.to_owned()))?;

        if entry.is_collection {
            return Err(ProviderError::NotFound(format!("{file_id} is a collection")));
        }
        Ok(Self::to_file(id, entry))
    }

    async fn download_file(&self, file_id: &str) -> Result<ByteStream, ProviderError> {
        let session = self.session()?;
        let response = self
            .client
            .get(Self::resource_url(session, file_id, false))
            .header("User-Agent", http::USER_AGENT)
            .basic_auth(&session.username, Some(&session.password))
            .send()
            .await
            .map_err(http::transport_error)?;

        Ok(http::byte_stream(http::check(response, file_id).await?))
    }

    fn list_all_files<'a>(&'a self, options: &'a ListOptions) -> RemoteFileStream<'a> {
        walk_folders(self, options, ROOT_ID)
    }
}
