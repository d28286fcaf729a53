use std::path::{Path, PathBuf};
use std::sync::Arc;

use cloud_sync::{DocumentId, IngestError, Ingestor, Provenance};

use crate::records::DocumentRecord;
use crate::store::{StoreError, SyncStore};

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        IngestError::Storage(e.to_string())
    }
}

/// Local document library: the ingestion pipeline's landing zone.
///
/// Each ingested file is copied to `<root>/<document_id>/<file_name>` and
/// recorded in the `documents` table. Attaching provenance upserts by
/// `(connection_id, remote_id)`, so a re-synced file replaces its earlier
/// copy.
pub struct DocumentLibrary {
    root: PathBuf,
    store: Arc<SyncStore>,
}

impl DocumentLibrary {
    pub fn new(root: impl Into<PathBuf>, store: Arc<SyncStore>) -> Self {
        Self {
            root: root.into(),
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn documents(&self, connection_id: Option<&str>) -> Result<Vec<DocumentRecord>, StoreError> {
        self.store.list_documents(connection_id)
    }

    async fn remove_files(&self, documents: &[DocumentRecord]) {
        for document in documents {
            let dir = self.root.join(&document.id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(document_id = %document.id, path = %dir.display(), error = %e, "failed to remove document files");
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Ingestor for DocumentLibrary {
    async fn ingest_file(&self, local_path: &Path) -> Result<DocumentId, IngestError> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| IngestError::Unsupported(format!("{} has no file name", local_path.display())))?;

        let metadata = tokio::fs::metadata(local_path).await?;
        if !metadata.is_file() {
            return Err(IngestError::Unsupported(format!(
                "{} is not a regular file",
                local_path.display()
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.root.join(&id);
        tokio::fs::create_dir_all(&dir).await?;
        let target = dir.join(&file_name);
        let size = tokio::fs::copy(local_path, &target).await?;

        if let Err(e) = self.store.insert_document(
            &id,
            &file_name,
            &target.to_string_lossy(),
            size,
        ) {
            let _ = tokio::fs::remove_dir_all(&dir).await;
            return Err(e.into());
        }

        tracing::debug!(document_id = %id, file = %file_name, size, "ingested document");
        Ok(DocumentId::new(id))
    }

    async fn attach_provenance(
        &self,
        document_id: &DocumentId,
        provenance: &Provenance,
    ) -> Result<(), IngestError> {
        let replaced = self
            .store
            .attach_document_provenance(document_id.as_str(), provenance)?;
        if !replaced.is_empty() {
            tracing::debug!(
                connection_id = %provenance.connection_id,
                remote_id = %provenance.remote_id,
                replaced = replaced.len(),
                "replaced earlier copies of document"
            );
        }
        self.remove_files(&replaced).await;
        Ok(())
    }

    async fn remove_by_remote_id(
        &self,
        connection_id: &str,
        remote_id: &str,
    ) -> Result<bool, IngestError> {
        let removed = self
            .store
            .remove_documents_by_remote_id(connection_id, remote_id)?;
        self.remove_files(&removed).await;
        Ok(!removed.is_empty())
    }

    async fn known_remote_ids(&self, connection_id: &str) -> Result<Vec<String>, IngestError> {
        Ok(self.store.known_remote_ids(connection_id)?)
    }
}
