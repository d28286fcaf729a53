//! Persistence for the sync system: connections, sync configs, cursors and
//! job records in SQLite, the AES-GCM credential vault, and the local
//! document library used as the ingestion target.

mod documents;
mod library;
mod records;
mod schema;
mod store;
mod vault;

pub use library::DocumentLibrary;
pub use records::{ConnectionRecord, DocumentRecord, SyncConfigRecord, SyncCursor};
pub use store::{StoreError, SyncStore};
pub use vault::AesGcmVault;
