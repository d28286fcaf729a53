use anyhow::Result;

use super::format;
use crate::app::App;

/// List documents in the local library.
pub fn run(app: &App, connection_id: Option<&str>) -> Result<()> {
    let documents = app.library.documents(connection_id)?;
    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    for doc in &documents {
        println!(
            "{}  {:<40} {:>10}  {}",
            doc.id,
            format::truncate(doc.remote_path.as_deref().unwrap_or(&doc.file_name), 40),
            format::human_bytes(doc.size_bytes),
            format::optional_timestamp(doc.synced_at.as_ref())
        );
    }
    Ok(())
}
