use chrono::{DateTime, Utc};
use cloud_sync::{AuthType, ProviderType, SyncFilters};
use serde::Serialize;

/// A configured account on one backend. Credentials are stored only in
/// their vault-encrypted form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub name: String,
    pub provider_type: ProviderType,
    pub auth_type: AuthType,
    #[serde(skip)]
    pub encrypted_credentials: String,
    /// Cache budget for this connection; `None` uses the cache default.
    pub cache_limit_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn new(
        name: impl Into<String>,
        provider_type: ProviderType,
        auth_type: AuthType,
        encrypted_credentials: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            provider_type,
            auth_type,
            encrypted_credentials: encrypted_credentials.into(),
            cache_limit_bytes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What to sync from a connection and where it goes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncConfigRecord {
    pub id: String,
    pub connection_id: String,
    pub name: String,
    /// Folders to list. Empty means the provider root.
    pub folder_ids: Vec<String>,
    pub filters: SyncFilters,
    /// Remove local documents whose remote file disappeared.
    pub delete_removed: bool,
    pub profile_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SyncConfigRecord {
    pub fn new(connection_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            connection_id: connection_id.into(),
            name: name.into(),
            folder_ids: Vec::new(),
            filters: SyncFilters::default(),
            delete_removed: false,
            profile_id: None,
            created_at: Utc::now(),
        }
    }
}

/// How far a sync config has synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor {
    pub sync_config_id: String,
    pub delta_token: Option<String>,
    pub last_sync_at: DateTime<Utc>,
}

/// A document held by the local library.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    pub id: String,
    pub file_name: String,
    pub local_path: String,
    pub size_bytes: u64,
    pub ingested_at: DateTime<Utc>,
    pub provider_type: Option<ProviderType>,
    pub connection_id: Option<String>,
    pub remote_id: Option<String>,
    pub remote_path: Option<String>,
    pub web_view_url: Option<String>,
    pub profile_id: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}
