use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cloud_sync::{
    CloudProvider, ConnectionCredentials, IngestError, Ingestor, JobStatus, JobType, ListOptions,
    Provenance, ProviderRegistry, RemoteFile, SyncJob, Vault,
};
use cloud_sync_store::{ConnectionRecord, SyncConfigRecord, SyncStore};
use futures::StreamExt;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::strategy::{self, Plan, Scope};
use crate::transfer;

/// Tunables for [`SyncWorker`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Errors kept on a job record; older ones are dropped.
    pub max_errors: usize,
    /// Longest rate-limit back-off honoured before the single retry.
    pub rate_limit_retry_cap: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_errors: 50,
            rate_limit_retry_cap: Duration::from_secs(300),
        }
    }
}

/// Runs sync jobs against the persisted configs in a [`SyncStore`].
pub struct SyncWorker {
    registry: Arc<ProviderRegistry>,
    store: Arc<SyncStore>,
    vault: Arc<dyn Vault>,
    ingestor: Arc<dyn Ingestor>,
    settings: WorkerSettings,
}

/// How a job ended when nothing went wrong at job level.
enum Outcome {
    Completed,
    Cancelled,
}

/// Final state of one file.
enum FileOutcome {
    Processed,
    Skipped,
    Failed(String),
}

/// Everything one run needs besides the provider.
struct Run<'a> {
    job: &'a mut SyncJob,
    config: SyncConfigRecord,
    connection: ConnectionRecord,
    scratch: TempDir,
}

impl SyncWorker {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<SyncStore>,
        vault: Arc<dyn Vault>,
        ingestor: Arc<dyn Ingestor>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            registry,
            store,
            vault,
            ingestor,
            settings,
        }
    }

    /// Record a pending job for a sync config.
    pub fn schedule(&self, sync_config_id: &str, job_type: JobType) -> Result<SyncJob, WorkerError> {
        let config = self.store.get_sync_config(sync_config_id)?;
        let job = SyncJob::new(uuid::Uuid::new_v4().to_string(), &config.id, job_type);
        self.store.create_job(&job)?;
        tracing::debug!(job_id = %job.id, sync_config_id = %config.id, job_type = job_type.as_str(), "scheduled sync job");
        Ok(job)
    }

    /// Run a pending job to a terminal state.
    ///
    /// Job-level failures are recorded on the returned job as `failed`.
    /// An `Err` means the job record itself could not be loaded or saved.
    /// Cancelling `cancel` stops the job between files and leaves the
    /// sync cursor untouched.
    pub async fn run(&self, job_id: &str, cancel: &CancellationToken) -> Result<SyncJob, WorkerError> {
        let mut job = self.store.get_job(job_id)?;
        if job.status != JobStatus::Pending {
            return Err(WorkerError::NotPending {
                id: job.id,
                status: job.status,
            });
        }

        job.start();
        self.store.update_job(&job)?;
        tracing::info!(job_id = %job.id, sync_config_id = %job.sync_config_id, "sync job started");

        match self.execute(&mut job, cancel).await {
            Ok(Outcome::Completed) => {
                job.finish(JobStatus::Completed);
                tracing::info!(
                    job_id = %job.id,
                    discovered = job.progress.discovered,
                    processed = job.progress.processed,
                    skipped = job.progress.skipped,
                    failed = job.progress.failed,
                    deleted = job.progress.deleted,
                    "sync job completed"
                );
            }
            Ok(Outcome::Cancelled) => {
                job.finish(JobStatus::Cancelled);
                tracing::info!(job_id = %job.id, processed = job.progress.processed, "sync job cancelled");
            }
            Err(e) => {
                job.push_error(None, e.to_string(), self.settings.max_errors);
                job.finish(JobStatus::Failed);
                tracing::warn!(job_id = %job.id, error = %e, "sync job failed");
            }
        }

        self.store.update_job(&job)?;
        Ok(job)
    }

    async fn execute(&self, job: &mut SyncJob, cancel: &CancellationToken) -> Result<Outcome, WorkerError> {
        let config = self.store.get_sync_config(&job.sync_config_id)?;
        let connection = self.store.get_connection(&config.connection_id)?;
        let provider = self.connect(&connection).await?;

        let cursor = self.store.load_cursor(&config.id)?;
        let stored_token = cursor.as_ref().and_then(|c| c.delta_token.as_deref());
        let plan = strategy::choose(provider.as_ref(), job.job_type, stored_token).await;
        tracing::info!(job_id = %job.id, strategy = plan.label(), "sync strategy chosen");

        let mut run = Run {
            job,
            config,
            connection,
            scratch: TempDir::new()?,
        };

        let (outcome, next_token) = match plan {
            Plan::Full { next_token } => (self.run_full(provider.as_ref(), &mut run, cancel).await?, next_token),
            Plan::Incremental(delta) => {
                let next_token = delta.next_delta_token().map(str::to_owned);
                let (added, modified, deleted, _, _) = delta.into_parts();
                let files: Vec<RemoteFile> = added.into_iter().chain(modified).collect();
                (
                    self.run_incremental(provider.as_ref(), &mut run, files, deleted, cancel)
                        .await?,
                    next_token,
                )
            }
        };

        if let Outcome::Completed = outcome {
            self.store.save_cursor(&run.config.id, next_token.as_deref())?;
            tracing::debug!(sync_config_id = %run.config.id, cursor = ?next_token, "saved sync cursor");
        }
        Ok(outcome)
    }

    /// Decrypt the connection's credentials and authenticate a provider.
    async fn connect(&self, connection: &ConnectionRecord) -> Result<Box<dyn CloudProvider>, WorkerError> {
        let plaintext = self.vault.decrypt(&connection.encrypted_credentials)?;
        let credentials = ConnectionCredentials::from_map(plaintext)?;
        let provider = self
            .registry
            .create_provider(connection.provider_type, Some(credentials))
            .await?;
        Ok(provider)
    }

    async fn run_full(
        &self,
        provider: &dyn CloudProvider,
        run: &mut Run<'_>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, WorkerError> {
        let options = ListOptions::recursive(run.config.folder_ids.clone());
        let mut seen = HashSet::new();

        {
            let mut files = provider.list_all_files(&options);
            loop {
                if cancel.is_cancelled() {
                    return Ok(Outcome::Cancelled);
                }
                let Some(item) = files.next().await else {
                    break;
                };
                match item {
                    Ok(file) => {
                        seen.insert(file.id.clone());
                        run.job.progress.discovered += 1;
                        self.settle(provider, run, &file).await?;
                    }
                    Err(e) if e.is_per_file() => {
                        run.job.progress.discovered += 1;
                        run.job.progress.failed += 1;
                        run.job.push_error(None, e.to_string(), self.settings.max_errors);
                        self.store.update_job(run.job)?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if run.config.delete_removed {
            let known = self.ingestor.known_remote_ids(&run.connection.id).await?;
            let gone: Vec<String> = known.into_iter().filter(|id| !seen.contains(id)).collect();
            return self.remove(run, &gone, cancel).await;
        }
        Ok(Outcome::Completed)
    }

    async fn run_incremental(
        &self,
        provider: &dyn CloudProvider,
        run: &mut Run<'_>,
        files: Vec<RemoteFile>,
        deleted: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, WorkerError> {
        let files = if files.is_empty() {
            files
        } else {
            let scope = Scope::resolve(provider, &run.config.folder_ids).await?;
            let (inside, outside): (Vec<RemoteFile>, Vec<RemoteFile>) =
                files.into_iter().partition(|f| scope.contains(f));
            if !outside.is_empty() {
                tracing::debug!(count = outside.len(), "ignoring changes outside the configured folders");
            }
            inside
        };

        run.job.progress.discovered = files.len() as u64;
        self.store.update_job(run.job)?;

        for file in &files {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            self.settle(provider, run, file).await?;
        }

        if run.config.delete_removed {
            return self.remove(run, &deleted, cancel).await;
        }
        if !deleted.is_empty() {
            tracing::debug!(count = deleted.len(), "ignoring remote deletions, config keeps removed files");
        }
        Ok(Outcome::Completed)
    }

    /// Bring one file to a final outcome and persist progress.
    async fn settle(
        &self,
        provider: &dyn CloudProvider,
        run: &mut Run<'_>,
        file: &RemoteFile,
    ) -> Result<(), WorkerError> {
        run.job.progress.current_file = Some(file.path.clone());

        match self.process_file(provider, run, file).await? {
            FileOutcome::Processed => run.job.progress.processed += 1,
            FileOutcome::Skipped => run.job.progress.skipped += 1,
            FileOutcome::Failed(message) => {
                tracing::warn!(remote_id = %file.id, path = %file.path, error = %message, "file failed");
                run.job.progress.failed += 1;
                run.job
                    .push_error(Some(&file.id), message, self.settings.max_errors);
            }
        }

        self.store.update_job(run.job)?;
        Ok(())
    }

    async fn process_file(
        &self,
        provider: &dyn CloudProvider,
        run: &Run<'_>,
        file: &RemoteFile,
    ) -> Result<FileOutcome, WorkerError> {
        if let Err(reason) = run.config.filters.check(file) {
            tracing::debug!(remote_id = %file.id, path = %file.path, %reason, "skipping file");
            return Ok(FileOutcome::Skipped);
        }

        // One directory per file keeps same-named files apart.
        let dir = run.scratch.path().join(run.job.progress.settled().to_string());
        let outcome = self.ingest(provider, run, file, &dir).await;
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::debug!(path = %dir.display(), error = %e, "failed to clean scratch directory");
        }
        outcome
    }

    async fn ingest(
        &self,
        provider: &dyn CloudProvider,
        run: &Run<'_>,
        file: &RemoteFile,
        dir: &Path,
    ) -> Result<FileOutcome, WorkerError> {
        let local = match transfer::download_with_retry(
            provider,
            file,
            dir,
            self.settings.rate_limit_retry_cap,
        )
        .await
        {
            Ok(path) => path,
            Err(WorkerError::Provider(e)) if e.is_per_file() || e.retry_after().is_some() => {
                return Ok(FileOutcome::Failed(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let document_id = match self.ingestor.ingest_file(&local).await {
            Ok(id) => id,
            Err(e @ (IngestError::Unsupported(_) | IngestError::Io(_))) => {
                return Ok(FileOutcome::Failed(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let provenance = Provenance {
            provider: run.connection.provider_type,
            connection_id: run.connection.id.clone(),
            remote_id: file.id.clone(),
            remote_path: file.path.clone(),
            web_view_url: file.web_view_url.clone(),
            synced_at: Utc::now(),
            profile_id: run.config.profile_id.clone(),
        };
        self.ingestor
            .attach_provenance(&document_id, &provenance)
            .await?;

        tracing::debug!(remote_id = %file.id, %document_id, "ingested file");
        Ok(FileOutcome::Processed)
    }

    /// Drop the local documents of remote files that no longer exist.
    async fn remove(
        &self,
        run: &mut Run<'_>,
        remote_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Outcome, WorkerError> {
        for remote_id in remote_ids {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            if self
                .ingestor
                .remove_by_remote_id(&run.connection.id, remote_id)
                .await?
            {
                tracing::debug!(%remote_id, "removed document for deleted remote file");
                run.job.progress.deleted += 1;
            }
        }
        if !remote_ids.is_empty() {
            self.store.update_job(run.job)?;
        }
        Ok(Outcome::Completed)
    }
}
