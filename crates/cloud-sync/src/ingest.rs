use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderType;

/// Identifier the ingestion pipeline assigns to a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an ingested document came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: ProviderType,
    pub connection_id: String,
    pub remote_id: String,
    pub remote_path: String,
    pub web_view_url: Option<String>,
    pub synced_at: DateTime<Utc>,
    /// Profile the document is filed under, from the sync config.
    pub profile_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported document: {0}")]
    Unsupported(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// The document pipeline: turns a local file into indexed content.
///
/// Ingestion upserts by `(connection_id, remote_id)` once provenance is
/// attached, so re-ingesting a changed file replaces the earlier document.
#[async_trait::async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest_file(&self, local_path: &Path) -> Result<DocumentId, IngestError>;

    async fn attach_provenance(
        &self,
        document_id: &DocumentId,
        provenance: &Provenance,
    ) -> Result<(), IngestError>;

    /// Remove documents that originated from a remote file. Returns
    /// whether anything was removed.
    async fn remove_by_remote_id(
        &self,
        connection_id: &str,
        remote_id: &str,
    ) -> Result<bool, IngestError>;

    /// Remote ids of every document ingested for a connection.
    async fn known_remote_ids(&self, connection_id: &str) -> Result<Vec<String>, IngestError>;
}
