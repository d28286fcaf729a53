use anyhow::Result;

use super::format;
use crate::app::App;

pub fn run(app: &App, sync_config_id: Option<&str>, limit: usize) -> Result<()> {
    let jobs = app.store.list_jobs(sync_config_id, limit)?;
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    for job in &jobs {
        let p = &job.progress;
        println!(
            "{}  {:<11} {:<9} created={} finished={} processed={}/{} failed={} errors={}",
            job.id,
            job.job_type.as_str(),
            job.status.as_str(),
            format::timestamp(&job.created_at),
            format::optional_timestamp(job.finished_at.as_ref()),
            p.processed,
            p.discovered,
            p.failed,
            job.errors.len()
        );
    }
    Ok(())
}
