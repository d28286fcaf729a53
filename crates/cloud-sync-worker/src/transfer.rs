use std::path::{Path, PathBuf};
use std::time::Duration;

use cloud_sync::{CloudProvider, ProviderError, RemoteFile};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::WorkerError;

/// Stream a remote file to `<dir>/<file name>`.
///
/// Provider errors (including ones raised mid-stream) come back as
/// [`WorkerError::Provider`] so the caller can classify them; local disk
/// failures come back as [`WorkerError::Io`].
pub(crate) async fn download_to(
    provider: &dyn CloudProvider,
    file: &RemoteFile,
    dir: &Path,
) -> Result<PathBuf, WorkerError> {
    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(local_file_name(&file.name));

    let mut stream = provider.download_file(&file.id).await?;
    let mut out = tokio::fs::File::create(&target).await?;
    while let Some(chunk) = stream.next().await {
        out.write_all(&chunk?).await?;
    }
    out.flush().await?;

    Ok(target)
}

/// Like [`download_to`], retrying once after the provider's back-off when
/// rate limited. The wait is capped at `retry_cap`.
pub(crate) async fn download_with_retry(
    provider: &dyn CloudProvider,
    file: &RemoteFile,
    dir: &Path,
    retry_cap: Duration,
) -> Result<PathBuf, WorkerError> {
    match download_to(provider, file, dir).await {
        Err(WorkerError::Provider(ProviderError::RateLimited { retry_after })) => {
            let wait = retry_after.min(retry_cap);
            tracing::info!(
                remote_id = %file.id,
                wait_ms = wait.as_millis() as u64,
                "rate limited, retrying once"
            );
            tokio::time::sleep(wait).await;
            download_to(provider, file, dir).await
        }
        other => other,
    }
}

/// A remote name reduced to a single path component.
fn local_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "file".to_owned(),
        trimmed => trimmed.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use cloud_sync::ProviderType;
    use cloud_sync::test_support::InMemoryProvider;

    use super::*;

    #[test]
    fn names_cannot_escape_the_directory() {
        assert_eq!(local_file_name("../secret"), ".._secret");
        assert_eq!(local_file_name(".."), "file");
        assert_eq!(local_file_name("Q1 report.pdf"), "Q1 report.pdf");
        assert_eq!(local_file_name("a/b\\c"), "a_b_c");
    }

    #[tokio::test]
    async fn second_rate_limit_is_surfaced() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut provider = InMemoryProvider::new(ProviderType::GoogleDrive);
        let file = RemoteFile::new("f1", "a.txt", "/a.txt");
        provider.add_file(file.clone(), "alpha");
        provider.rate_limit("f1", 2);

        let result = download_with_retry(&provider, &file, dir.path(), Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(WorkerError::Provider(ProviderError::RateLimited { .. }))
        ));
        assert_eq!(provider.download_count(), 0);
    }

    #[tokio::test]
    async fn single_rate_limit_recovers() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut provider = InMemoryProvider::new(ProviderType::GoogleDrive);
        let file = RemoteFile::new("f1", "a.txt", "/a.txt");
        provider.add_file(file.clone(), "alpha");
        provider.rate_limit("f1", 1);

        let path = download_with_retry(&provider, &file, dir.path(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "alpha");
    }
}
