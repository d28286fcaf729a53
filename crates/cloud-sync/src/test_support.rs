use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream;

use crate::{
    AuthType, ByteStream, CloudProvider, ConnectionCredentials, DocumentId, IngestError, Ingestor,
    ListOptions, Provenance, ProviderCapabilities, ProviderError, ProviderType, RemoteFile,
    RemoteFileStream, RemoteFolder, SyncDelta, Vault, VaultError,
};

/// In-memory provider for testing. Clones share download counters and
/// rate-limit budgets, so a registry factory can hand out copies while the
/// test keeps observing the original.
#[derive(Clone)]
pub struct InMemoryProvider {
    provider_type: ProviderType,
    files: Vec<(RemoteFile, Bytes)>,
    folders: Vec<RemoteFolder>,
    start_token: Option<String>,
    deltas: HashMap<String, SyncDelta>,
    expired_tokens: HashSet<String>,
    missing: HashSet<String>,
    fail_listing_after: Option<usize>,
    rate_limits: Arc<Mutex<HashMap<String, u32>>>,
    retry_after: Duration,
    download_delay: Option<Duration>,
    downloads: Arc<AtomicUsize>,
    credentials: Option<ConnectionCredentials>,
}

impl InMemoryProvider {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            files: Vec::new(),
            folders: Vec::new(),
            start_token: None,
            deltas: HashMap::new(),
            expired_tokens: HashSet::new(),
            missing: HashSet::new(),
            fail_listing_after: None,
            rate_limits: Arc::new(Mutex::new(HashMap::new())),
            retry_after: Duration::from_millis(5),
            download_delay: None,
            downloads: Arc::new(AtomicUsize::new(0)),
            credentials: None,
        }
    }

    /// Add a file whose size is taken from its content.
    pub fn add_file(&mut self, file: RemoteFile, content: impl Into<Bytes>) {
        let content = content.into();
        let file = file.with_size(content.len() as u64);
        self.files.push((file, content));
    }

    /// Add a folder. Files and folders without a `parent_id` sit in the root.
    pub fn add_folder(&mut self, folder: RemoteFolder) {
        self.folders.push(folder);
    }

    /// Enable the change feed. `get_changes(None)` returns this token.
    pub fn with_start_token(mut self, token: impl Into<String>) -> Self {
        self.start_token = Some(token.into());
        self
    }

    /// Script the delta returned for a given cursor.
    pub fn add_delta(&mut self, token: impl Into<String>, delta: SyncDelta) {
        self.deltas.insert(token.into(), delta);
    }

    pub fn expire_token(&mut self, token: impl Into<String>) {
        self.expired_tokens.insert(token.into());
    }

    /// Listing succeeds but downloading this id reports `NotFound`.
    pub fn remove_content(&mut self, file_id: impl Into<String>) {
        self.missing.insert(file_id.into());
    }

    /// Fail the listing with a connectivity error after `n` files.
    pub fn fail_listing_after(&mut self, n: usize) {
        self.fail_listing_after = Some(n);
    }

    /// Rate-limit the next `times` downloads of `file_id`.
    pub fn rate_limit(&mut self, file_id: impl Into<String>, times: u32) {
        self.rate_limits
            .lock()
            .unwrap()
            .insert(file_id.into(), times);
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = Some(delay);
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn file(&self, file_id: &str) -> Option<&(RemoteFile, Bytes)> {
        self.files.iter().find(|(f, _)| f.id == file_id)
    }

    /// Whether `parent` is `folder_id` or one of its descendants.
    fn is_within<'a>(&'a self, mut parent: Option<&'a str>, folder_id: &str) -> bool {
        if folder_id == ROOT_ID {
            return true;
        }
        while let Some(id) = parent {
            if id == folder_id {
                return true;
            }
            parent = self
                .folders
                .iter()
                .find(|f| f.id == id)
                .and_then(|f| f.parent_id.as_deref());
        }
        false
    }
}

const ROOT_ID: &str = "root";

fn in_folder(parent_id: Option<&str>, folder_id: &str) -> bool {
    parent_id.unwrap_or(ROOT_ID) == folder_id
}

#[async_trait::async_trait]
impl CloudProvider for InMemoryProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            auth_types: vec![AuthType::AppToken, AuthType::OAuth2],
            delta_sync: self.start_token.is_some(),
            attachments: false,
            folders: true,
            file_download: true,
            max_page_size: 100,
        }
    }

    async fn authenticate(&mut self, credentials: ConnectionCredentials) -> Result<bool, ProviderError> {
        if credentials.auth.bearer_token() == Some("revoked") {
            return Err(ProviderError::Authentication("token revoked".into()));
        }
        self.credentials = Some(credentials);
        Ok(true)
    }

    async fn validate_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    async fn list_root_folders(&self) -> Result<Vec<RemoteFolder>, ProviderError> {
        let mut root = RemoteFolder::new(ROOT_ID, "root", "/");
        root.is_root = true;
        Ok(vec![root])
    }

    async fn list_folder_contents(
        &self,
        folder_id: &str,
    ) -> Result<(Vec<RemoteFolder>, Vec<RemoteFile>), ProviderError> {
        let folders = self
            .folders
            .iter()
            .filter(|f| in_folder(f.parent_id.as_deref(), folder_id))
            .cloned()
            .collect();
        let files = self
            .files
            .iter()
            .filter(|(f, _)| in_folder(f.parent_id.as_deref(), folder_id))
            .map(|(f, _)| f.clone())
            .collect();
        Ok((folders, files))
    }

    async fn get_file_metadata(&self, file_id: &str) -> Result<RemoteFile, ProviderError> {
        self.file(file_id)
            .map(|(f, _)| f.clone())
            .ok_or_else(|| ProviderError::NotFound(file_id.to_owned()))
    }

    async fn download_file(&self, file_id: &str) -> Result<ByteStream, ProviderError> {
        let limited = {
            let mut limits = self.rate_limits.lock().unwrap();
            match limits.get_mut(file_id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if limited {
            return Err(ProviderError::RateLimited {
                retry_after: self.retry_after,
            });
        }

        if self.missing.contains(file_id) {
            return Err(ProviderError::NotFound(file_id.to_owned()));
        }

        let content = self
            .file(file_id)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| ProviderError::NotFound(file_id.to_owned()))?;

        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);

        // Two chunks so consumers exercise their streaming path.
        let mid = content.len() / 2;
        let chunks = vec![Ok(content.slice(..mid)), Ok(content.slice(mid..))];
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn list_all_files<'a>(&'a self, options: &'a ListOptions) -> RemoteFileStream<'a> {
        let mut items: Vec<Result<RemoteFile, ProviderError>> = self
            .files
            .iter()
            .filter(|(f, _)| {
                options.folder_ids.is_empty()
                    || options
                        .folder_ids
                        .iter()
                        .any(|id| self.is_within(f.parent_id.as_deref(), id))
            })
            .map(|(f, _)| Ok(f.clone()))
            .collect();

        if let Some(n) = self.fail_listing_after {
            items.truncate(n);
            items.push(Err(ProviderError::Connectivity("listing interrupted".into())));
        }

        Box::pin(stream::iter(items))
    }

    async fn get_changes(&self, delta_token: Option<&str>) -> Result<SyncDelta, ProviderError> {
        let Some(start) = &self.start_token else {
            return Err(ProviderError::DeltaSyncUnsupported);
        };

        match delta_token {
            None => Ok(SyncDelta::unchanged(start.clone())),
            Some(token) if self.expired_tokens.contains(token) => {
                Err(ProviderError::ExpiredCursor(token.to_owned()))
            }
            Some(token) => Ok(self
                .deltas
                .get(token)
                .cloned()
                .unwrap_or_else(|| SyncDelta::unchanged(token))),
        }
    }
}

/// A document captured by [`RecordingIngestor`].
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub document_id: DocumentId,
    pub file_name: String,
    pub content: Vec<u8>,
    pub provenance: Option<Provenance>,
}

/// Ingestor that keeps everything in memory.
#[derive(Default)]
pub struct RecordingIngestor {
    documents: Mutex<Vec<IngestedDocument>>,
    reject: HashSet<String>,
    counter: AtomicUsize,
}

impl RecordingIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject files with this name as unsupported.
    pub fn reject(mut self, file_name: impl Into<String>) -> Self {
        self.reject.insert(file_name.into());
        self
    }

    pub fn documents(&self) -> Vec<IngestedDocument> {
        self.documents.lock().unwrap().clone()
    }

    /// File names in ingestion order.
    pub fn ingested_names(&self) -> Vec<String> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.file_name.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Ingestor for RecordingIngestor {
    async fn ingest_file(&self, local_path: &Path) -> Result<DocumentId, IngestError> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.reject.contains(&file_name) {
            return Err(IngestError::Unsupported(file_name));
        }

        let content = tokio::fs::read(local_path).await?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let document_id = DocumentId::new(format!("doc-{n}"));

        self.documents.lock().unwrap().push(IngestedDocument {
            document_id: document_id.clone(),
            file_name,
            content,
            provenance: None,
        });
        Ok(document_id)
    }

    async fn attach_provenance(
        &self,
        document_id: &DocumentId,
        provenance: &Provenance,
    ) -> Result<(), IngestError> {
        let mut documents = self.documents.lock().unwrap();
        // Upsert by remote id: an older document for the same remote file
        // is replaced by the new one.
        documents.retain(|d| {
            &d.document_id == document_id
                || d.provenance.as_ref().is_none_or(|p| {
                    p.connection_id != provenance.connection_id
                        || p.remote_id != provenance.remote_id
                })
        });
        let document = documents
            .iter_mut()
            .find(|d| &d.document_id == document_id)
            .ok_or_else(|| IngestError::Storage(format!("unknown document {document_id}")))?;
        document.provenance = Some(provenance.clone());
        Ok(())
    }

    async fn remove_by_remote_id(
        &self,
        connection_id: &str,
        remote_id: &str,
    ) -> Result<bool, IngestError> {
        let mut documents = self.documents.lock().unwrap();
        let before = documents.len();
        documents.retain(|d| {
            d.provenance
                .as_ref()
                .is_none_or(|p| p.connection_id != connection_id || p.remote_id != remote_id)
        });
        Ok(documents.len() != before)
    }

    async fn known_remote_ids(&self, connection_id: &str) -> Result<Vec<String>, IngestError> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter_map(|d| d.provenance.as_ref())
            .filter(|p| p.connection_id == connection_id)
            .map(|p| p.remote_id.clone())
            .collect())
    }
}

/// Vault that stores credentials as plain JSON.
pub struct PlainVault;

impl Vault for PlainVault {
    fn encrypt(&self, plaintext: &BTreeMap<String, serde_json::Value>) -> Result<String, VaultError> {
        serde_json::to_string(plaintext).map_err(|e| VaultError::Encrypt(e.to_string()))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<BTreeMap<String, serde_json::Value>, VaultError> {
        serde_json::from_str(ciphertext).map_err(|e| VaultError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use crate::AuthCredentials;

    use super::*;

    fn provider() -> InMemoryProvider {
        let mut provider = InMemoryProvider::new(ProviderType::GoogleDrive).with_start_token("T0");
        provider.add_file(RemoteFile::new("f1", "a.txt", "/a.txt"), "alpha");
        provider.add_file(RemoteFile::new("f2", "b.txt", "/b.txt"), "bravo");
        provider
    }

    #[tokio::test]
    async fn download_streams_full_content() {
        let provider = provider();
        let chunks: Vec<Bytes> = provider.download_file("f1").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"alpha");
        assert_eq!(provider.download_count(), 1);
    }

    #[tokio::test]
    async fn rate_limit_budget_is_shared_between_clones() {
        let mut provider = provider();
        provider.rate_limit("f1", 1);
        let copy = provider.clone();

        assert!(matches!(
            copy.download_file("f1").await,
            Err(ProviderError::RateLimited { .. })
        ));
        assert!(provider.download_file("f1").await.is_ok());
    }

    #[tokio::test]
    async fn listing_can_be_interrupted() {
        let mut provider = provider();
        provider.fail_listing_after(1);
        let options = ListOptions::default();
        let results: Vec<_> = futures::StreamExt::collect(provider.list_all_files(&options)).await;
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn revoked_token_fails_authentication() {
        let mut provider = provider();
        let creds = ConnectionCredentials::new(AuthCredentials::AppToken {
            token: "revoked".into(),
        });
        assert!(provider.authenticate(creds).await.is_err());
        assert!(!provider.validate_credentials().await);
    }

    #[tokio::test]
    async fn listing_is_scoped_to_folder_subtrees() {
        let mut provider = InMemoryProvider::new(ProviderType::GoogleDrive);
        let mut work = RemoteFolder::new("work", "Work", "/Work");
        work.parent_id = Some("root".into());
        let mut nested = RemoteFolder::new("nested", "Nested", "/Work/Nested");
        nested.parent_id = Some("work".into());
        provider.add_folder(work);
        provider.add_folder(nested);

        let mut inner = RemoteFile::new("f1", "a.txt", "/Work/Nested/a.txt");
        inner.parent_id = Some("nested".into());
        provider.add_file(inner, "alpha");
        provider.add_file(RemoteFile::new("f2", "b.txt", "/b.txt"), "bravo");

        let options = ListOptions::recursive(vec!["work".into()]);
        let files: Vec<RemoteFile> = provider.list_all_files(&options).try_collect().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, "f1");

        let (folders, files) = provider.list_folder_contents("root").await.unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, "f2");
    }

    #[test]
    fn plain_vault_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("token".to_owned(), serde_json::json!("abc"));
        let sealed = PlainVault.encrypt(&map).unwrap();
        assert_eq!(PlainVault.decrypt(&sealed).unwrap(), map);
    }
}
