use std::time::Duration;

/// Errors that can occur when talking to a remote data source.
///
/// The variants describe what the caller should do next: refresh
/// credentials, back off, skip a single file, or fail the whole job.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("delta sync is not supported by this provider")]
    DeltaSyncUnsupported,

    #[error("sync cursor expired or rejected: {0}")]
    ExpiredCursor(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Errors scoped to a single file. The file is recorded as failed and
    /// the job moves on.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::PermissionDenied(_) | Self::Parse(_)
        )
    }

    /// Errors that downgrade an incremental run to a full listing.
    pub fn falls_back_to_full(&self) -> bool {
        matches!(self, Self::DeltaSyncUnsupported | Self::ExpiredCursor(_))
    }

    /// The server-provided back-off interval, if this is a rate-limit signal.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Map an HTTP status to the error taxonomy. Providers call this for
    /// responses they do not handle specially.
    pub fn from_status(status: u16, context: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let context = context.into();
        match status {
            401 => Self::Authentication(context),
            403 => Self::PermissionDenied(context),
            404 => Self::NotFound(context),
            429 => Self::RateLimited {
                retry_after: retry_after.unwrap_or(Duration::from_secs(60)),
            },
            408 | 500..=599 => Self::Connectivity(format!("HTTP {status}: {context}")),
            _ => Self::Other(format!("HTTP {status}: {context}")),
        }
    }
}
