use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use cloud_sync::{ConnectionCredentials, ProviderType, Vault};
use cloud_sync_store::ConnectionRecord;

use super::format;
use crate::app::App;

/// Store a new connection. The credentials file is a JSON object such as
/// `{"auth_type": "app_token", "token": "..."}`; it is verified against the
/// provider unless `verify` is false, then encrypted with the vault.
pub async fn add(
    app: &App,
    name: &str,
    provider_type: ProviderType,
    credentials_file: &Path,
    cache_limit: Option<u64>,
    verify: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(credentials_file)
        .with_context(|| format!("failed to read {}", credentials_file.display()))?;
    let map: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&raw).context("credentials file must be a JSON object")?;
    let credentials = ConnectionCredentials::from_map(map)?;

    if verify {
        app.registry
            .create_provider(provider_type, Some(credentials.clone()))
            .await
            .with_context(|| format!("{provider_type} rejected the credentials"))?;
    }

    let sealed = app.vault()?.encrypt(&credentials.to_map()?)?;
    let mut record = ConnectionRecord::new(name, provider_type, credentials.auth.auth_type(), sealed);
    record.cache_limit_bytes = cache_limit;
    app.store.insert_connection(&record)?;

    println!("{}", record.id);
    Ok(())
}

pub fn list(app: &App) -> Result<()> {
    let connections = app.store.list_connections()?;
    if connections.is_empty() {
        println!("No connections.");
        return Ok(());
    }

    for c in &connections {
        let limit = c
            .cache_limit_bytes
            .map(format::human_bytes)
            .unwrap_or_else(|| "default".to_owned());
        println!(
            "{}  {:<24} {:<12} {:<10} cache={}",
            c.id,
            format::truncate(&c.name, 24),
            c.provider_type.as_str(),
            c.auth_type.to_string(),
            limit
        );
    }
    Ok(())
}

/// Delete a connection with its configs, cursors and jobs, and drop its cache.
pub async fn remove(app: &App, connection_id: &str) -> Result<()> {
    if !app.store.delete_connection(connection_id)? {
        anyhow::bail!("no connection with id {connection_id}");
    }
    app.cache.clear_cache(connection_id).await?;
    println!("Removed connection {connection_id}.");
    Ok(())
}
