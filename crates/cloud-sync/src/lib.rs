pub mod credentials;
pub mod delta;
pub mod error;
pub mod file;
pub mod filter;
pub mod ingest;
pub mod job;
pub mod provider;
pub mod registry;
pub mod vault;

pub use credentials::{AuthCredentials, AuthType, ConnectionCredentials};
pub use delta::SyncDelta;
pub use error::ProviderError;
pub use file::{ProviderMetadata, RemoteFile, RemoteFolder, normalize_path};
pub use filter::{SkipReason, SyncFilters};
pub use ingest::{DocumentId, IngestError, Ingestor, Provenance};
pub use job::{JobError, JobProgress, JobStatus, JobType, SyncJob};
pub use provider::{
    ByteStream, CloudProvider, ListOptions, ProviderCapabilities, ProviderFamily, ProviderType,
    RemoteFileStream,
};
pub use registry::{ProviderFactory, ProviderRegistry};
pub use vault::{Vault, VaultError};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
