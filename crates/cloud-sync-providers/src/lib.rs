//! Concrete [`CloudProvider`] implementations and their registration.
//!
//! Google Drive, OneDrive and WebDAV talk to their backends directly.
//! Confluence, Jira, Notion, Slack and Gmail go through the ETL backend in
//! [`etl`].

use std::collections::BTreeMap;
use std::sync::Arc;

use cloud_sync::{
    CloudProvider, ConnectionCredentials, ProviderCapabilities, ProviderError, ProviderFamily,
    ProviderRegistry, ProviderType,
};

mod dav;
pub mod etl;
pub mod google_drive;
mod http;
mod oauth;
pub mod onedrive;
mod walk;
pub mod webdav;

pub use etl::{DelegatedProvider, EtlClient, EtlSettings};
pub use google_drive::GoogleDriveProvider;
pub use onedrive::OneDriveProvider;
pub use webdav::WebDavProvider;

/// Reject credentials whose auth type the provider does not accept.
pub(crate) fn require_auth_type(
    capabilities: &ProviderCapabilities,
    credentials: &ConnectionCredentials,
) -> Result<(), ProviderError> {
    let auth_type = credentials.auth.auth_type();
    if capabilities.supports_auth(auth_type) {
        Ok(())
    } else {
        Err(ProviderError::Configuration(format!(
            "{auth_type} credentials are not supported here"
        )))
    }
}

/// Settings for [`register_all`].
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    /// API base URL per direct provider, replacing the public endpoint.
    pub api_overrides: BTreeMap<ProviderType, String>,
    /// Delegated providers are only registered when this is set.
    pub etl: Option<EtlSettings>,
}

/// Register every available provider.
pub fn register_all(
    registry: &mut ProviderRegistry,
    settings: &ProviderSettings,
) -> Result<(), ProviderError> {
    let drive_api = settings.api_overrides.get(&ProviderType::GoogleDrive).cloned();
    registry.register(ProviderType::GoogleDrive, move || {
        Box::new(GoogleDriveProvider::new(drive_api.clone())) as Box<dyn CloudProvider>
    });

    let graph_api = settings.api_overrides.get(&ProviderType::OneDrive).cloned();
    registry.register(ProviderType::OneDrive, move || {
        Box::new(OneDriveProvider::new(graph_api.clone())) as Box<dyn CloudProvider>
    });

    registry.register(ProviderType::WebDav, || {
        Box::new(WebDavProvider::new()) as Box<dyn CloudProvider>
    });

    let Some(etl) = &settings.etl else {
        tracing::debug!("no ETL backend configured; delegated providers unavailable");
        return Ok(());
    };

    let client = Arc::new(EtlClient::new(etl.clone())?);
    for provider_type in ProviderType::ALL {
        if provider_type.family() != ProviderFamily::Delegated {
            continue;
        }
        let client = Arc::clone(&client);
        registry.register(provider_type, move || {
            Box::new(DelegatedProvider::new(provider_type, Arc::clone(&client))) as Box<dyn CloudProvider>
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use cloud_sync::{AuthCredentials, AuthType};

    use super::*;

    #[test]
    fn direct_providers_are_always_registered() {
        let mut registry = ProviderRegistry::new();
        register_all(&mut registry, &ProviderSettings::default()).unwrap();

        assert_eq!(
            registry.registered_types(),
            vec![ProviderType::GoogleDrive, ProviderType::OneDrive, ProviderType::WebDav]
        );
    }

    #[test]
    fn delegated_providers_need_an_etl_backend() {
        let mut registry = ProviderRegistry::new();
        let settings = ProviderSettings {
            etl: Some(EtlSettings::new("http://localhost:8006", "ws", "/tmp/sink")),
            ..Default::default()
        };
        register_all(&mut registry, &settings).unwrap();

        assert_eq!(registry.registered_types().len(), ProviderType::ALL.len());
        assert!(registry.is_registered(ProviderType::Slack));
    }

    #[test]
    fn unsupported_auth_type_is_a_configuration_error() {
        let capabilities = ProviderCapabilities {
            auth_types: vec![AuthType::Basic],
            delta_sync: false,
            attachments: false,
            folders: true,
            file_download: true,
            max_page_size: 0,
        };
        let creds = ConnectionCredentials::new(AuthCredentials::AppToken { token: "t".into() });

        assert!(matches!(
            require_auth_type(&capabilities, &creds),
            Err(ProviderError::Configuration(_))
        ));
    }
}
