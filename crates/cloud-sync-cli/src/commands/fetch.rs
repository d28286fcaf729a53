use anyhow::Result;

use super::format;
use crate::app::App;

/// Read a remote file through the connection's cache and print where it
/// landed on disk.
pub async fn run(app: &App, connection_id: &str, remote_id: &str) -> Result<()> {
    let connection = app.store.get_connection(connection_id)?;
    if let Some(limit) = connection.cache_limit_bytes {
        app.cache.set_limit(&connection.id, limit);
    }

    let credentials = app.credentials(&connection)?;
    let info = app
        .cache
        .get_or_download(
            &connection.id,
            remote_id,
            &app.registry,
            connection.provider_type,
            credentials,
        )
        .await?;

    eprintln!(
        "{} ({}, accessed {} times)",
        info.file_name,
        format::human_bytes(info.size_bytes),
        info.access_count
    );
    println!("{}", info.local_path.display());
    Ok(())
}
