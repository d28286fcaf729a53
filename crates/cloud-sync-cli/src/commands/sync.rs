use anyhow::Result;
use cloud_sync::{JobStatus, JobType};
use tokio_util::sync::CancellationToken;

use crate::app::App;

/// Schedule and run one sync job in the foreground. Ctrl-C stops it after
/// the file in flight.
pub async fn run(app: &App, sync_config_id: &str, full: bool) -> Result<()> {
    let worker = app.worker()?;
    let job_type = if full { JobType::Full } else { JobType::Incremental };
    let job = worker.schedule(sync_config_id, job_type)?;
    println!("Running {} sync (job {})...", job_type.as_str(), job.id);

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling after the current file...");
                cancel.cancel();
            }
        })
    };

    let job = worker.run(&job.id, &cancel).await;
    watcher.abort();
    let job = job?;

    let p = &job.progress;
    println!(
        "{}: {} discovered, {} processed, {} skipped, {} failed, {} deleted",
        job.status, p.discovered, p.processed, p.skipped, p.failed, p.deleted
    );
    for error in &job.errors {
        match &error.remote_id {
            Some(remote_id) => eprintln!("  {remote_id}: {}", error.message),
            None => eprintln!("  {}", error.message),
        }
    }

    if job.status == JobStatus::Failed {
        anyhow::bail!("sync job {} failed", job.id);
    }
    Ok(())
}
