use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use cloud_sync::{AuthType, JobStatus, JobType, ProviderType, SyncJob};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::records::{ConnectionRecord, SyncConfigRecord, SyncCursor};
use crate::schema;

/// Errors specific to store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl StoreError {
    fn not_found(kind: &'static str, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_owned(),
        }
    }
}

/// SQLite-backed persistence for connections, sync configs, cursors, jobs
/// and library documents.
pub struct SyncStore {
    conn: Mutex<Connection>,
}

impl SyncStore {
    /// Open a store backed by a file on disk.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let mut store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        let conn = self.conn.get_mut().map_err(|_| StoreError::Poisoned)?;
        schema::migrations()
            .to_latest(conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // Connections

    pub fn insert_connection(&self, record: &ConnectionRecord) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO connections
                (id, name, provider_type, auth_type, encrypted_credentials, cache_limit_bytes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.name,
                record.provider_type.as_str(),
                record.auth_type.to_string(),
                record.encrypted_credentials,
                record.cache_limit_bytes.map(to_i64),
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_connection(&self, id: &str) -> Result<ConnectionRecord, StoreError> {
        self.conn()?
            .query_row(
                "SELECT id, name, provider_type, auth_type, encrypted_credentials,
                        cache_limit_bytes, created_at, updated_at
                 FROM connections WHERE id = ?1",
                [id],
                row_to_connection,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("connection", id))
    }

    pub fn list_connections(&self) -> Result<Vec<ConnectionRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, provider_type, auth_type, encrypted_credentials,
                    cache_limit_bytes, created_at, updated_at
             FROM connections ORDER BY name, id",
        )?;
        let records = stmt
            .query_map([], row_to_connection)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Replace the stored credentials, e.g. after an OAuth refresh.
    pub fn update_connection_credentials(&self, id: &str, encrypted: &str) -> Result<(), StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE connections SET encrypted_credentials = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, encrypted, Utc::now()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("connection", id));
        }
        Ok(())
    }

    pub fn set_connection_cache_limit(&self, id: &str, limit: Option<u64>) -> Result<(), StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE connections SET cache_limit_bytes = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, limit.map(to_i64), Utc::now()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("connection", id));
        }
        Ok(())
    }

    /// Delete a connection with its sync configs, cursors and jobs.
    /// Returns whether it existed.
    pub fn delete_connection(&self, id: &str) -> Result<bool, StoreError> {
        let changed = self
            .conn()?
            .execute("DELETE FROM connections WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    // Sync configs

    pub fn insert_sync_config(&self, record: &SyncConfigRecord) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO sync_configs
                (id, connection_id, name, folder_ids_json, filters_json, delete_removed, profile_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.connection_id,
                record.name,
                to_json(&record.folder_ids)?,
                to_json(&record.filters)?,
                record.delete_removed,
                record.profile_id,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_sync_config(&self, id: &str) -> Result<SyncConfigRecord, StoreError> {
        self.conn()?
            .query_row(
                "SELECT id, connection_id, name, folder_ids_json, filters_json,
                        delete_removed, profile_id, created_at
                 FROM sync_configs WHERE id = ?1",
                [id],
                row_to_sync_config,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("sync config", id))
    }

    /// Sync configs, optionally only those of one connection.
    pub fn list_sync_configs(&self, connection_id: Option<&str>) -> Result<Vec<SyncConfigRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, connection_id, name, folder_ids_json, filters_json,
                    delete_removed, profile_id, created_at
             FROM sync_configs
             WHERE ?1 IS NULL OR connection_id = ?1
             ORDER BY created_at, id",
        )?;
        let records = stmt
            .query_map([connection_id], row_to_sync_config)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn delete_sync_config(&self, id: &str) -> Result<bool, StoreError> {
        let changed = self
            .conn()?
            .execute("DELETE FROM sync_configs WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    // Sync state

    pub fn load_cursor(&self, sync_config_id: &str) -> Result<Option<SyncCursor>, StoreError> {
        let cursor = self
            .conn()?
            .query_row(
                "SELECT sync_config_id, delta_token, last_sync_at
                 FROM sync_state WHERE sync_config_id = ?1",
                [sync_config_id],
                |row| {
                    Ok(SyncCursor {
                        sync_config_id: row.get(0)?,
                        delta_token: row.get(1)?,
                        last_sync_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(cursor)
    }

    /// Record a completed sync. `delta_token` is `None` for providers
    /// without a change feed.
    pub fn save_cursor(&self, sync_config_id: &str, delta_token: Option<&str>) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO sync_state (sync_config_id, delta_token, last_sync_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(sync_config_id) DO UPDATE
                SET delta_token = excluded.delta_token,
                    last_sync_at = excluded.last_sync_at",
            params![sync_config_id, delta_token, Utc::now()],
        )?;
        Ok(())
    }

    // Jobs

    pub fn create_job(&self, job: &SyncJob) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO sync_jobs
                (id, sync_config_id, job_type, status, progress_json, errors_json, created_at, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.sync_config_id,
                job.job_type.as_str(),
                job.status.as_str(),
                to_json(&job.progress)?,
                to_json(&job.errors)?,
                job.created_at,
                job.started_at,
                job.finished_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_job(&self, job: &SyncJob) -> Result<(), StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE sync_jobs
             SET status = ?2, progress_json = ?3, errors_json = ?4, started_at = ?5, finished_at = ?6
             WHERE id = ?1",
            params![
                job.id,
                job.status.as_str(),
                to_json(&job.progress)?,
                to_json(&job.errors)?,
                job.started_at,
                job.finished_at,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("job", &job.id));
        }
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<SyncJob, StoreError> {
        self.conn()?
            .query_row(
                "SELECT id, sync_config_id, job_type, status, progress_json, errors_json,
                        created_at, started_at, finished_at
                 FROM sync_jobs WHERE id = ?1",
                [id],
                row_to_job,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("job", id))
    }

    /// Most recent jobs first.
    pub fn list_jobs(&self, sync_config_id: Option<&str>, limit: usize) -> Result<Vec<SyncJob>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, sync_config_id, job_type, status, progress_json, errors_json,
                    created_at, started_at, finished_at
             FROM sync_jobs
             WHERE ?1 IS NULL OR sync_config_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let jobs = stmt
            .query_map(params![sync_config_id, to_i64(limit as u64)], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, message.into())
}

fn from_json<T: DeserializeOwned>(row: &Row, index: usize) -> rusqlite::Result<T> {
    let text: String = row.get(index)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(index, e.to_string()))
}

pub(crate) fn provider_type_at(row: &Row, index: usize) -> rusqlite::Result<ProviderType> {
    let text: String = row.get(index)?;
    text.parse()
        .map_err(|e: cloud_sync::ProviderError| conversion_error(index, e.to_string()))
}

fn row_to_connection(row: &Row) -> rusqlite::Result<ConnectionRecord> {
    let auth_type: String = row.get(3)?;
    let cache_limit: Option<i64> = row.get(5)?;

    Ok(ConnectionRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        provider_type: provider_type_at(row, 2)?,
        auth_type: AuthType::parse(&auth_type)
            .ok_or_else(|| conversion_error(3, format!("unknown auth type {auth_type}")))?,
        encrypted_credentials: row.get(4)?,
        cache_limit_bytes: cache_limit.map(|l| l.max(0) as u64),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn row_to_sync_config(row: &Row) -> rusqlite::Result<SyncConfigRecord> {
    Ok(SyncConfigRecord {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        name: row.get(2)?,
        folder_ids: from_json(row, 3)?,
        filters: from_json(row, 4)?,
        delete_removed: row.get(5)?,
        profile_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn row_to_job(row: &Row) -> rusqlite::Result<SyncJob> {
    let job_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let started_at: Option<DateTime<Utc>> = row.get(7)?;
    let finished_at: Option<DateTime<Utc>> = row.get(8)?;

    Ok(SyncJob {
        id: row.get(0)?,
        sync_config_id: row.get(1)?,
        job_type: JobType::parse(&job_type)
            .ok_or_else(|| conversion_error(2, format!("unknown job type {job_type}")))?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| conversion_error(3, format!("unknown job status {status}")))?,
        progress: from_json(row, 4)?,
        errors: from_json(row, 5)?,
        created_at: row.get(6)?,
        started_at,
        finished_at,
    })
}
