//! Sync job orchestration.
//!
//! A [`SyncWorker`] turns one persisted sync config into a job: it resolves
//! and authenticates the provider, picks a full or incremental strategy
//! from the stored cursor, feeds every matching file through the
//! ingestion pipeline, and only then advances the cursor.

mod error;
mod strategy;
mod transfer;
mod worker;

pub use error::WorkerError;
pub use worker::{SyncWorker, WorkerSettings};
