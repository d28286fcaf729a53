use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend-specific details attached to a [`RemoteFile`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderMetadata {
    #[default]
    None,
    GoogleDrive {
        md5: Option<String>,
        /// Set for Google-native documents that must be exported rather
        /// than downloaded.
        export_mime_type: Option<String>,
    },
    OneDrive {
        drive_id: Option<String>,
        c_tag: Option<String>,
    },
    WebDav {
        href: String,
    },
    Delegated {
        stream: String,
        records_synced: u64,
        job_id: Option<String>,
    },
    Other(BTreeMap<String, serde_json::Value>),
}

/// One remote document as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    /// Always uses `/` separators.
    pub path: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub checksum: Option<String>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub parent_id: Option<String>,
    pub web_view_url: Option<String>,
    #[serde(default)]
    pub provider_metadata: ProviderMetadata,
}

impl RemoteFile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl AsRef<str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: normalize_path(path.as_ref()),
            mime_type: None,
            size_bytes: 0,
            modified_at: None,
            created_at: None,
            checksum: None,
            etag: None,
            version_id: None,
            parent_id: None,
            web_view_url: None,
            provider_metadata: ProviderMetadata::None,
        }
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.modified_at = Some(at);
        self
    }

    /// Lower-cased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }

    /// True when change-detection fields differ from `other`.
    pub fn differs_from(&self, other: &RemoteFile) -> bool {
        self.checksum != other.checksum
            || self.etag != other.etag
            || self.version_id != other.version_id
            || self.modified_at != other.modified_at
            || self.size_bytes != other.size_bytes
    }
}

/// A remote container, used for interactive browsing only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
    pub path: String,
    pub parent_id: Option<String>,
    pub has_children: bool,
    pub is_root: bool,
}

impl RemoteFolder {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl AsRef<str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: normalize_path(path.as_ref()),
            parent_id: None,
            has_children: true,
            is_root: false,
        }
    }
}

/// Normalize a remote path: backslashes become `/`, duplicate separators
/// collapse, and the result always starts with `/`.
pub fn normalize_path(path: &str) -> String {
    let joined = path
        .replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}
