use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::file::RemoteFile;

/// Per-config rules deciding which discovered files are ingested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncFilters {
    /// Allowed extensions, without the dot. Empty allows all.
    pub extensions: Vec<String>,
    /// Allowed MIME types. Empty allows all. Combined with `extensions`
    /// as an either-or allow-list.
    pub mime_types: Vec<String>,
    pub max_size_bytes: Option<u64>,
    /// Glob patterns matched against the full path and the bare file name.
    pub exclude_patterns: Vec<String>,
    pub modified_after: Option<DateTime<Utc>>,
}

/// Why a file was not handed to the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TypeNotAllowed,
    TooLarge { size: u64, max: u64 },
    Excluded(String),
    NotModifiedSince,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeNotAllowed => write!(f, "file type not allowed"),
            Self::TooLarge { size, max } => write!(f, "size {size} exceeds limit {max}"),
            Self::Excluded(pattern) => write!(f, "matches exclude pattern {pattern}"),
            Self::NotModifiedSince => write!(f, "not modified since watermark"),
        }
    }
}

impl SyncFilters {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Check a file against every rule, returning the first violation.
    pub fn check(&self, file: &RemoteFile) -> Result<(), SkipReason> {
        if !self.type_allowed(file) {
            return Err(SkipReason::TypeNotAllowed);
        }

        if let Some(max) = self.max_size_bytes
            && file.size_bytes > max
        {
            return Err(SkipReason::TooLarge {
                size: file.size_bytes,
                max,
            });
        }

        for pattern in &self.exclude_patterns {
            if glob_matches(pattern, &file.path) || glob_matches(pattern, &file.name) {
                return Err(SkipReason::Excluded(pattern.clone()));
            }
        }

        if let (Some(watermark), Some(modified)) = (self.modified_after, file.modified_at)
            && modified <= watermark
        {
            return Err(SkipReason::NotModifiedSince);
        }

        Ok(())
    }

    fn type_allowed(&self, file: &RemoteFile) -> bool {
        if self.extensions.is_empty() && self.mime_types.is_empty() {
            return true;
        }

        let extension_ok = file.extension().is_some_and(|ext| {
            self.extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        });

        let mime_ok = file.mime_type.as_deref().is_some_and(|mime| {
            self.mime_types
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(mime))
        });

        extension_ok || mime_ok
    }
}

fn glob_matches(pattern: &str, candidate: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(compiled) => compiled.matches(candidate),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "ignoring invalid exclude pattern");
            false
        }
    }
}
