use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use cloud_sync::{ByteStream, ConnectionCredentials, ProviderError, ProviderRegistry, ProviderType, RemoteFile};
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::index::{CacheIndex, CachedFileInfo};
use crate::path::{full_file_path, sanitize_component, short_file_path};

/// Share of the byte budget freed on top of the immediate need, so the
/// next few writes don't each trigger an eviction pass.
const EVICTION_MARGIN: f64 = 0.2;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("file {size} bytes exceeds the cache budget of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
}

/// Usage summary for one connection's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub file_count: usize,
    pub total_bytes: u64,
    pub limit_bytes: u64,
}

/// In-memory handle on one connection's directory. Every index mutation
/// and every write of the metadata file happens under `index`.
struct ConnectionCache {
    dir: PathBuf,
    index: Mutex<CacheIndex>,
}

type KeyLock = Arc<Mutex<()>>;

/// Bounded, per-connection disk cache of downloaded remote files.
///
/// Eviction is least-frequently-used with least-recently-used as the
/// tie-break. Concurrent requests for the same `(connection, remote_id)`
/// collapse into one download.
pub struct FileCache {
    root: PathBuf,
    default_limit: u64,
    limits: StdMutex<HashMap<String, u64>>,
    connections: Mutex<HashMap<String, Arc<ConnectionCache>>>,
    key_locks: StdMutex<HashMap<(String, String), KeyLock>>,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>, default_limit: u64) -> Self {
        Self {
            root: root.into(),
            default_limit,
            limits: StdMutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            key_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Set the byte budget for one connection.
    pub fn set_limit(&self, connection_id: &str, limit_bytes: u64) {
        if let Ok(mut limits) = self.limits.lock() {
            limits.insert(connection_id.to_owned(), limit_bytes);
        }
    }

    pub fn limit(&self, connection_id: &str) -> u64 {
        self.limits
            .lock()
            .ok()
            .and_then(|limits| limits.get(connection_id).copied())
            .unwrap_or(self.default_limit)
    }

    fn connection_dir(&self, connection_id: &str) -> PathBuf {
        self.root.join(sanitize_component(connection_id))
    }

    async fn connection(&self, connection_id: &str) -> Result<Arc<ConnectionCache>, CacheError> {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(connection_id) {
            return Ok(Arc::clone(existing));
        }

        let dir = self.connection_dir(connection_id);
        let index = CacheIndex::load(&dir).await?;
        let handle = Arc::new(ConnectionCache {
            dir,
            index: Mutex::new(index),
        });
        connections.insert(connection_id.to_owned(), Arc::clone(&handle));
        Ok(handle)
    }

    fn key_lock(&self, connection_id: &str, remote_id: &str) -> KeyLock {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            locks
                .entry((connection_id.to_owned(), remote_id.to_owned()))
                .or_default(),
        )
    }

    fn release_key_lock(&self, connection_id: &str, remote_id: &str, lock: KeyLock) {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this caller hold it: nobody is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&(connection_id.to_owned(), remote_id.to_owned()));
        }
    }

    /// Look up a cached file, bumping its access statistics.
    ///
    /// If the backing file vanished from disk, the stale entry is purged
    /// and a miss is reported.
    pub async fn get_cached_file(
        &self,
        connection_id: &str,
        remote_id: &str,
    ) -> Result<Option<CachedFileInfo>, CacheError> {
        let connection = self.connection(connection_id).await?;
        let mut index = connection.index.lock().await;

        let Some(entry) = index.files.get(remote_id) else {
            return Ok(None);
        };

        if !tokio::fs::try_exists(&entry.local_path).await.unwrap_or(false) {
            tracing::info!(connection_id, remote_id, "cached file missing on disk; dropping entry");
            index.files.remove(remote_id);
            index.persist(&connection.dir).await?;
            return Ok(None);
        }

        let info = {
            let Some(entry) = index.files.get_mut(remote_id) else {
                return Ok(None);
            };
            entry.access_count += 1;
            entry.last_accessed_at = Utc::now();
            entry.clone()
        };
        index.persist(&connection.dir).await?;
        Ok(Some(info))
    }

    /// Entry for `remote_id` if its file exists, without touching stats.
    async fn peek(
        &self,
        connection: &ConnectionCache,
        remote_id: &str,
    ) -> Option<CachedFileInfo> {
        let entry = connection.index.lock().await.files.get(remote_id).cloned()?;
        match tokio::fs::try_exists(&entry.local_path).await {
            Ok(true) => Some(entry),
            _ => None,
        }
    }

    /// Write a downloaded stream into the cache.
    ///
    /// Serialized per `(connection, remote_id)`: a caller that waited on
    /// another caller's write gets that result back and its stream is
    /// dropped unread.
    pub async fn cache_file(
        &self,
        connection_id: &str,
        file: &RemoteFile,
        stream: ByteStream,
    ) -> Result<CachedFileInfo, CacheError> {
        let lock = self.key_lock(connection_id, &file.id);
        let result = {
            let _guard = lock.lock().await;
            self.cache_file_locked(connection_id, file, stream).await
        };
        self.release_key_lock(connection_id, &file.id, lock);
        result
    }

    async fn cache_file_locked(
        &self,
        connection_id: &str,
        file: &RemoteFile,
        stream: ByteStream,
    ) -> Result<CachedFileInfo, CacheError> {
        let connection = self.connection(connection_id).await?;
        if let Some(existing) = self.peek(&connection, &file.id).await {
            return Ok(existing);
        }
        self.store(connection_id, &connection, file, stream).await
    }

    /// Read-through path: return the cached copy, or authenticate a
    /// provider for the connection and download the file into the cache.
    pub async fn get_or_download(
        &self,
        connection_id: &str,
        remote_id: &str,
        registry: &ProviderRegistry,
        provider_type: ProviderType,
        credentials: ConnectionCredentials,
    ) -> Result<CachedFileInfo, CacheError> {
        if let Some(hit) = self.get_cached_file(connection_id, remote_id).await? {
            return Ok(hit);
        }

        let lock = self.key_lock(connection_id, remote_id);
        let result = {
            let _guard = lock.lock().await;
            self.download_locked(connection_id, remote_id, registry, provider_type, credentials)
                .await
        };
        self.release_key_lock(connection_id, remote_id, lock);
        result
    }

    async fn download_locked(
        &self,
        connection_id: &str,
        remote_id: &str,
        registry: &ProviderRegistry,
        provider_type: ProviderType,
        credentials: ConnectionCredentials,
    ) -> Result<CachedFileInfo, CacheError> {
        let connection = self.connection(connection_id).await?;
        if let Some(existing) = self.peek(&connection, remote_id).await {
            return Ok(existing);
        }

        let provider = registry
            .create_provider(provider_type, Some(credentials))
            .await?;
        let file = provider.get_file_metadata(remote_id).await?;
        let stream = provider.download_file(remote_id).await?;
        tracing::debug!(connection_id, remote_id, name = %file.name, "cache miss; downloading");
        self.store(connection_id, &connection, &file, stream).await
    }

    async fn store(
        &self,
        connection_id: &str,
        connection: &ConnectionCache,
        file: &RemoteFile,
        stream: ByteStream,
    ) -> Result<CachedFileInfo, CacheError> {
        let target = {
            let mut index = connection.index.lock().await;
            let short = short_file_path(&connection.dir, &file.id, &file.name);
            let target = if index.path_taken_by_other(&short, &file.id) {
                full_file_path(&connection.dir, &file.id, &file.name)
            } else {
                short
            };
            index.reserve(target.clone(), &file.id);
            target
        };

        let result = self
            .fill(connection_id, connection, file, stream, &target)
            .await;
        if result.is_err() {
            connection.index.lock().await.release(&target);
        }
        result
    }

    /// Write `stream` to the reserved `target` and record the entry.
    async fn fill(
        &self,
        connection_id: &str,
        connection: &ConnectionCache,
        file: &RemoteFile,
        stream: ByteStream,
        target: &Path,
    ) -> Result<CachedFileInfo, CacheError> {
        let limit = self.limit(connection_id);

        let size = match write_stream(target, stream).await {
            Ok(size) => size,
            Err(e) => {
                remove_file_and_empty_parent(target, &connection.dir).await;
                return Err(e);
            }
        };

        if size > limit {
            remove_file_and_empty_parent(target, &connection.dir).await;
            return Err(CacheError::TooLarge { size, limit });
        }

        let mut index = connection.index.lock().await;
        // A previous entry for this id points at a file that is gone (or
        // is being replaced); it must not count towards the budget.
        if let Some(previous) = index.files.remove(&file.id)
            && previous.local_path != target
        {
            remove_file_and_empty_parent(&previous.local_path, &connection.dir).await;
        }

        evict(&mut index, &connection.dir, limit, size).await;

        let now = Utc::now();
        let info = CachedFileInfo {
            remote_id: file.id.clone(),
            remote_path: file.path.clone(),
            local_path: target.to_path_buf(),
            file_name: file.name.clone(),
            size_bytes: size,
            mime_type: file.mime_type.clone(),
            cached_at: now,
            last_accessed_at: now,
            access_count: 1,
            web_view_url: file.web_view_url.clone(),
        };
        index.files.insert(file.id.clone(), info.clone());
        index.release(target);
        index.persist(&connection.dir).await?;

        tracing::info!(connection_id, remote_id = %file.id, size, "cached file");
        Ok(info)
    }

    pub async fn stats(&self, connection_id: &str) -> Result<CacheStats, CacheError> {
        let connection = self.connection(connection_id).await?;
        let index = connection.index.lock().await;
        Ok(CacheStats {
            file_count: index.files.len(),
            total_bytes: index.total_size(),
            limit_bytes: self.limit(connection_id),
        })
    }

    /// Remove every cached file for a connection and forget its index.
    pub async fn clear_cache(&self, connection_id: &str) -> Result<(), CacheError> {
        let removed = self.connections.lock().await.remove(connection_id);
        // Wait out any in-flight index writer before deleting the directory.
        let _index = match &removed {
            Some(connection) => Some(connection.index.lock().await),
            None => None,
        };

        let dir = self.connection_dir(connection_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(connection_id, "cleared cache");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Free space for `incoming` bytes if the budget would be exceeded.
///
/// Frees the overflow plus a margin of the budget, taking victims in
/// eviction order. A victim that can't be removed is logged and skipped.
/// Returns the number of bytes freed.
async fn evict(index: &mut CacheIndex, dir: &Path, limit: u64, incoming: u64) -> u64 {
    let current = index.total_size();
    if current + incoming <= limit {
        return 0;
    }

    let needed = current + incoming - limit;
    let margin = (limit as f64 * EVICTION_MARGIN) as u64;
    let target = needed + margin;
    let mut freed = 0u64;

    for victim in index.eviction_order() {
        if freed >= target {
            break;
        }

        match tokio::fs::remove_file(&victim.local_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    remote_id = %victim.remote_id,
                    path = %victim.local_path.display(),
                    error = %e,
                    "failed to evict cached file; skipping"
                );
                continue;
            }
        }
        remove_empty_parent(&victim.local_path, dir).await;

        index.files.remove(&victim.remote_id);
        if let Err(e) = index.persist(dir).await {
            tracing::warn!(remote_id = %victim.remote_id, error = %e, "failed to persist cache index after eviction");
        }

        freed += victim.size_bytes;
        tracing::debug!(
            remote_id = %victim.remote_id,
            size = victim.size_bytes,
            access_count = victim.access_count,
            "evicted cached file"
        );
    }

    tracing::info!(freed, needed, target, "cache eviction pass finished");
    freed
}

/// Stream into a temp file next to `target`, then move it into place.
/// Each writer gets its own temp file; a failed write leaves nothing behind.
async fn write_stream(target: &Path, mut stream: ByteStream) -> Result<u64, CacheError> {
    let parent = target.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let partial = tempfile::Builder::new()
        .prefix(".")
        .suffix(".partial")
        .tempfile_in(parent)?;
    let (file, partial_path) = partial.into_parts();
    let mut out = tokio::fs::File::from_std(file);
    let mut written = 0u64;

    while let Some(chunk) = stream.try_next().await? {
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    drop(out);

    partial_path.persist(target).map_err(|e| e.error)?;
    Ok(written)
}

async fn remove_file_and_empty_parent(path: &Path, dir: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove cached file");
    }
    remove_empty_parent(path, dir).await;
}

/// Remove the file's parent directory if it is now empty, never climbing
/// above the connection directory.
async fn remove_empty_parent(path: &Path, dir: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    if parent == dir || !parent.starts_with(dir) {
        return;
    }
    // Fails harmlessly when the directory still has entries.
    let _ = tokio::fs::remove_dir(parent).await;
}
