use std::sync::Arc;

use anyhow::{Context, Result};
use cloud_sync::{CloudProvider, ConnectionCredentials, ProviderRegistry, Vault};
use cloud_sync_cache::FileCache;
use cloud_sync_store::{AesGcmVault, ConnectionRecord, DocumentLibrary, SyncStore};
use cloud_sync_worker::SyncWorker;

use crate::config::AppConfig;

/// Everything the commands share, built once per invocation.
pub struct App {
    pub config: AppConfig,
    pub store: Arc<SyncStore>,
    pub registry: Arc<ProviderRegistry>,
    pub library: Arc<DocumentLibrary>,
    pub cache: FileCache,
}

impl App {
    pub fn open(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data directory: {}", config.data_dir.display())
        })?;

        let store = Arc::new(
            SyncStore::open(&config.database_path())
                .with_context(|| format!("failed to open {}", config.database_path().display()))?,
        );

        let mut registry = ProviderRegistry::new();
        cloud_sync_providers::register_all(&mut registry, &config.provider_settings())
            .context("failed to register providers")?;

        let library = Arc::new(DocumentLibrary::new(config.library_dir(), store.clone()));
        let cache = FileCache::new(&config.cache_root, config.default_cache_bytes);

        Ok(Self {
            config,
            store,
            registry: Arc::new(registry),
            library,
            cache,
        })
    }

    /// The credential vault. Only commands that touch secrets need the key.
    pub fn vault(&self) -> Result<AesGcmVault> {
        AesGcmVault::from_env(&self.config.vault_key_env).with_context(|| {
            format!(
                "set {} to the vault passphrase",
                self.config.vault_key_env
            )
        })
    }

    pub fn credentials(&self, connection: &ConnectionRecord) -> Result<ConnectionCredentials> {
        let plaintext = self
            .vault()?
            .decrypt(&connection.encrypted_credentials)
            .with_context(|| format!("failed to decrypt credentials for {}", connection.name))?;
        Ok(ConnectionCredentials::from_map(plaintext)?)
    }

    /// An authenticated provider for a stored connection.
    pub async fn provider(&self, connection: &ConnectionRecord) -> Result<Box<dyn CloudProvider>> {
        let credentials = self.credentials(connection)?;
        self.registry
            .create_provider(connection.provider_type, Some(credentials))
            .await
            .with_context(|| format!("failed to connect to {}", connection.name))
    }

    pub fn worker(&self) -> Result<SyncWorker> {
        Ok(SyncWorker::new(
            self.registry.clone(),
            self.store.clone(),
            Arc::new(self.vault()?),
            self.library.clone(),
            self.config.worker_settings(),
        ))
    }
}
