use anyhow::Result;

use super::format;
use crate::app::App;

pub async fn stats(app: &App, connection_id: &str) -> Result<()> {
    let connection = app.store.get_connection(connection_id)?;
    if let Some(limit) = connection.cache_limit_bytes {
        app.cache.set_limit(&connection.id, limit);
    }

    let stats = app.cache.stats(&connection.id).await?;
    println!(
        "{} files, {} of {} used",
        stats.file_count,
        format::human_bytes(stats.total_bytes),
        format::human_bytes(stats.limit_bytes)
    );
    Ok(())
}

pub async fn clear(app: &App, connection_id: &str) -> Result<()> {
    app.cache.clear_cache(connection_id).await?;
    println!("Cleared cache for {connection_id}.");
    Ok(())
}
