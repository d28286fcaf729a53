use anyhow::Result;

use super::format;
use crate::app::App;

/// List the root folders of a connection, or the contents of one folder.
pub async fn run(app: &App, connection_id: &str, folder_id: Option<&str>) -> Result<()> {
    let connection = app.store.get_connection(connection_id)?;
    let provider = app.provider(&connection).await?;

    let Some(folder_id) = folder_id else {
        for folder in provider.list_root_folders().await? {
            println!("{}/  [{}]", folder.path.trim_end_matches('/'), folder.id);
        }
        return Ok(());
    };

    let (folders, files) = provider.list_folder_contents(folder_id).await?;
    for folder in &folders {
        println!("{}/  [{}]", folder.name, folder.id);
    }
    for file in &files {
        println!(
            "{:<40} {:>10}  [{}]",
            format::truncate(&file.name, 40),
            format::human_bytes(file.size_bytes),
            file.id
        );
    }
    Ok(())
}
