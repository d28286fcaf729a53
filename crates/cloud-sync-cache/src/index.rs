use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const METADATA_FILE: &str = ".cache_metadata.json";

/// One locally cached remote file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFileInfo {
    pub remote_id: String,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub cached_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub web_view_url: Option<String>,
}

impl CachedFileInfo {
    fn eviction_key(&self) -> (u64, DateTime<Utc>) {
        (self.access_count, self.last_accessed_at)
    }
}

/// The durable per-connection index, serialized as `.cache_metadata.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheIndex {
    pub files: BTreeMap<String, CachedFileInfo>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Paths claimed by writes still in flight, keyed to their remote id.
    #[serde(skip)]
    reserved: HashMap<PathBuf, String>,
}

impl CacheIndex {
    /// Load the index from a connection directory. A missing file is an
    /// empty index; a corrupt one is logged and discarded.
    pub async fn load(dir: &Path) -> std::io::Result<Self> {
        let path = dir.join(METADATA_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e),
        };

        match serde_json::from_slice(&raw) {
            Ok(index) => Ok(index),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding unreadable cache index");
                Ok(Self::default())
            }
        }
    }

    /// Write the index with temp-file-and-rename so readers never see a
    /// partially written file.
    pub async fn persist(&mut self, dir: &Path) -> std::io::Result<()> {
        self.updated_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;

        tokio::fs::create_dir_all(dir).await?;
        let final_path = dir.join(METADATA_FILE);
        let temp_path = dir.join(format!("{METADATA_FILE}.tmp"));
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &final_path).await
    }

    pub fn total_size(&self) -> u64 {
        self.files.values().map(|f| f.size_bytes).sum()
    }

    /// Entries in eviction order: fewest accesses first, oldest access
    /// breaking ties.
    pub fn eviction_order(&self) -> Vec<CachedFileInfo> {
        let mut entries: Vec<CachedFileInfo> = self.files.values().cloned().collect();
        entries.sort_by_key(|e| e.eviction_key());
        entries
    }

    /// Whether `path` is used, or about to be, by a different remote id.
    pub fn path_taken_by_other(&self, path: &Path, remote_id: &str) -> bool {
        self.reserved
            .get(path)
            .is_some_and(|owner| owner != remote_id)
            || self
                .files
                .values()
                .any(|f| f.local_path == path && f.remote_id != remote_id)
    }

    /// Claim `path` for an in-flight write of `remote_id`.
    pub fn reserve(&mut self, path: PathBuf, remote_id: &str) {
        self.reserved.insert(path, remote_id.to_owned());
    }

    pub fn release(&mut self, path: &Path) {
        self.reserved.remove(path);
    }
}
