use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use cloud_sync::ProviderType;
use cloud_sync_providers::{EtlSettings, ProviderSettings};
use cloud_sync_worker::WorkerSettings;
use serde::{Deserialize, Serialize};

const DEFAULT_CACHE_BYTES: u64 = 500 * 1024 * 1024;

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Holds the SQLite database and the document library.
    pub data_dir: PathBuf,
    pub cache_root: PathBuf,
    /// Cache budget for connections without their own limit.
    pub default_cache_bytes: u64,
    /// Environment variable holding the vault passphrase.
    pub vault_key_env: String,
    pub worker: WorkerConfig,
    pub etl: Option<EtlConfig>,
    /// Base URL per provider type, e.g. `google-drive = "http://localhost:9000"`.
    pub api_overrides: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_dir(dirs::data_dir()),
            cache_root: default_dir(dirs::cache_dir()),
            default_cache_bytes: DEFAULT_CACHE_BYTES,
            vault_key_env: "CLOUD_SYNC_VAULT_KEY".into(),
            worker: WorkerConfig::default(),
            etl: None,
            api_overrides: BTreeMap::new(),
        }
    }
}

fn default_dir(base: Option<PathBuf>) -> PathBuf {
    base.map(|d| d.join("cloud-sync"))
        .unwrap_or_else(|| PathBuf::from(".cloud-sync"))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_errors: usize,
    pub rate_limit_retry_cap_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_errors: 50,
            rate_limit_retry_cap_secs: 300,
        }
    }
}

/// Connection to the ETL backend behind the SaaS providers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EtlConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    pub workspace_id: String,
    /// Host directory the backend's local-JSON destination writes into.
    pub sink_root: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_job_timeout_secs() -> u64 {
    3600
}

impl AppConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("cloud-sync.db")
    }

    pub fn library_dir(&self) -> PathBuf {
        self.data_dir.join("library")
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            max_errors: self.worker.max_errors,
            rate_limit_retry_cap: Duration::from_secs(self.worker.rate_limit_retry_cap_secs),
        }
    }

    /// Provider wiring. Unknown keys in `api_overrides` are skipped with a
    /// warning.
    pub fn provider_settings(&self) -> ProviderSettings {
        let mut api_overrides = BTreeMap::new();
        for (key, url) in &self.api_overrides {
            match key.parse::<ProviderType>() {
                Ok(provider_type) => {
                    api_overrides.insert(provider_type, url.clone());
                }
                Err(e) => tracing::warn!(key, error = %e, "ignoring api override"),
            }
        }

        ProviderSettings {
            api_overrides,
            etl: self.etl.as_ref().map(EtlConfig::settings),
        }
    }
}

impl EtlConfig {
    fn settings(&self) -> EtlSettings {
        let mut settings = EtlSettings::new(&self.base_url, &self.workspace_id, &self.sink_root);
        settings.api_token = self.api_token.clone();
        settings.max_attempts = self.max_attempts;
        settings.initial_backoff = Duration::from_millis(self.initial_backoff_ms);
        settings.poll_interval = Duration::from_secs(self.poll_interval_secs);
        settings.job_timeout = Duration::from_secs(self.job_timeout_secs);
        settings
    }
}

/// Config file path: `~/.config/cloud-sync/config.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cloud-sync").join("config.toml"))
}

/// Load config from file, falling back to defaults if missing or invalid.
pub fn load_config() -> AppConfig {
    if let Some(path) = config_path()
        && let Ok(contents) = std::fs::read_to_string(&path)
    {
        match toml::from_str::<AppConfig>(&contents) {
            Ok(config) => return config,
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config, using defaults"
            ),
        }
    }

    AppConfig::default()
}
