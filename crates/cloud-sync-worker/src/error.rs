use cloud_sync::{IngestError, JobStatus, ProviderError, VaultError};
use cloud_sync_store::StoreError;

/// Errors that can occur while scheduling or running a sync job.
///
/// Inside [`crate::SyncWorker::run`] these end the job as `failed` and are
/// recorded on it. They only reach the caller when the job record itself
/// cannot be read or written.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job {id} is {status}, only pending jobs can run")]
    NotPending { id: String, status: JobStatus },
}
