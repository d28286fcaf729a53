use std::collections::BTreeMap;

use crate::credentials::ConnectionCredentials;
use crate::error::ProviderError;
use crate::provider::{CloudProvider, ProviderType};

/// Constructor for a provider instance.
pub type ProviderFactory = Box<dyn Fn() -> Box<dyn CloudProvider> + Send + Sync>;

/// Maps provider types to their constructors.
///
/// Built once at startup and shared read-only (usually behind an `Arc`)
/// with the sync worker and the cache download path.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<ProviderType, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any earlier one for the same type.
    pub fn register(
        &mut self,
        provider_type: ProviderType,
        factory: impl Fn() -> Box<dyn CloudProvider> + Send + Sync + 'static,
    ) {
        if self
            .factories
            .insert(provider_type, Box::new(factory))
            .is_some()
        {
            tracing::debug!(%provider_type, "replaced provider registration");
        }
    }

    pub fn is_registered(&self, provider_type: ProviderType) -> bool {
        self.factories.contains_key(&provider_type)
    }

    pub fn registered_types(&self) -> Vec<ProviderType> {
        self.factories.keys().copied().collect()
    }

    /// Instantiate a provider, authenticating it when credentials are given.
    pub async fn create_provider(
        &self,
        provider_type: ProviderType,
        credentials: Option<ConnectionCredentials>,
    ) -> Result<Box<dyn CloudProvider>, ProviderError> {
        let factory = self.factories.get(&provider_type).ok_or_else(|| {
            ProviderError::Configuration(format!(
                "provider type {provider_type} is not registered"
            ))
        })?;

        let mut provider = factory();

        if let Some(credentials) = credentials {
            provider.authenticate(credentials).await?;
        }

        Ok(provider)
    }
}
