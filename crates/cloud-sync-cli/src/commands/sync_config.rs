use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cloud_sync::SyncFilters;
use cloud_sync_store::SyncConfigRecord;

use crate::app::App;

/// What to sync from a connection, as given on the command line.
pub struct NewSyncConfig {
    pub connection_id: String,
    pub name: String,
    pub folders: Vec<String>,
    pub extensions: Vec<String>,
    pub mime_types: Vec<String>,
    pub max_size: Option<u64>,
    pub exclude: Vec<String>,
    pub modified_after: Option<String>,
    pub delete_removed: bool,
    pub profile: Option<String>,
}

pub fn add(app: &App, new: NewSyncConfig) -> Result<()> {
    let connection = app.store.get_connection(&new.connection_id)?;

    let modified_after = new
        .modified_after
        .as_deref()
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .with_context(|| format!("invalid --modified-after timestamp: {s}"))
        })
        .transpose()?;

    let mut record = SyncConfigRecord::new(&connection.id, new.name);
    record.folder_ids = new.folders;
    record.filters = SyncFilters {
        extensions: new.extensions,
        mime_types: new.mime_types,
        max_size_bytes: new.max_size,
        exclude_patterns: new.exclude,
        modified_after,
    };
    record.delete_removed = new.delete_removed;
    record.profile_id = new.profile;
    app.store.insert_sync_config(&record)?;

    println!("{}", record.id);
    Ok(())
}

pub fn list(app: &App, connection_id: Option<&str>) -> Result<()> {
    let configs = app.store.list_sync_configs(connection_id)?;
    if configs.is_empty() {
        println!("No sync configs.");
        return Ok(());
    }

    for config in &configs {
        let cursor = app.store.load_cursor(&config.id)?;
        let last_sync = cursor
            .as_ref()
            .map(|c| super::format::timestamp(&c.last_sync_at))
            .unwrap_or_else(|| "never".to_owned());
        let folders = if config.folder_ids.is_empty() {
            "root".to_owned()
        } else {
            config.folder_ids.join(",")
        };

        println!(
            "{}  {:<20} connection={} folders={} filtered={} delete_removed={} last_sync={}",
            config.id,
            config.name,
            config.connection_id,
            folders,
            !config.filters.is_empty(),
            config.delete_removed,
            last_sync
        );
    }
    Ok(())
}
