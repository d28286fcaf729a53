use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a sync job: `pending → running → {completed | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested strategy. `Incremental` still falls back to a full listing
/// when no cursor exists or the provider rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Full,
    Incremental,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub discovered: u64,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub current_file: Option<String>,
}

impl JobProgress {
    /// Files that have reached a final per-file outcome.
    pub fn settled(&self) -> u64 {
        self.processed + self.failed + self.skipped
    }
}

/// One error recorded against a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub at: DateTime<Utc>,
    pub remote_id: Option<String>,
    pub message: String,
}

/// Persisted record of one sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub sync_config_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: JobProgress,
    /// Oldest first, capped by [`SyncJob::push_error`].
    pub errors: Vec<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    pub fn new(id: impl Into<String>, sync_config_id: impl Into<String>, job_type: JobType) -> Self {
        Self {
            id: id.into(),
            sync_config_id: sync_config_id.into(),
            job_type,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            errors: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Record an error, dropping the oldest ones beyond `cap`.
    pub fn push_error(&mut self, remote_id: Option<&str>, message: impl Into<String>, cap: usize) {
        let mut errors: VecDeque<JobError> = std::mem::take(&mut self.errors).into();
        errors.push_back(JobError {
            at: Utc::now(),
            remote_id: remote_id.map(str::to_owned),
            message: message.into(),
        });
        while errors.len() > cap {
            errors.pop_front();
        }
        self.errors = errors.into();
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.progress.current_file = None;
        self.finished_at = Some(Utc::now());
    }
}
