use std::collections::HashSet;

use cloud_sync::{CloudProvider, JobType, ProviderError, RemoteFile, SyncDelta};

/// Depth limit when expanding configured folders into their subfolders.
const MAX_SCOPE_DEPTH: usize = 64;

/// How a job discovers its files.
#[derive(Debug)]
pub(crate) enum Plan {
    /// Walk every configured folder. `next_token` is the cursor fetched
    /// before the walk began, when the provider has a change feed.
    Full { next_token: Option<String> },
    /// Apply the changes reported since the stored cursor.
    Incremental(SyncDelta),
}

impl Plan {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Full { .. } => "full",
            Self::Incremental(_) => "incremental",
        }
    }
}

/// Pick the strategy for one run.
///
/// Incremental needs the request, a stored token and a provider with a
/// change feed. A change feed that fails for any reason downgrades this
/// run to a full walk; the stored cursor is left alone either way.
pub(crate) async fn choose(
    provider: &dyn CloudProvider,
    requested: JobType,
    stored_token: Option<&str>,
) -> Plan {
    let token = match (requested, stored_token) {
        (JobType::Incremental, Some(token)) if provider.capabilities().delta_sync => token,
        (JobType::Incremental, _) => {
            tracing::info!(
                provider = %provider.provider_type(),
                "no usable sync cursor, running a full sync"
            );
            return full(provider).await;
        }
        (JobType::Full, _) => return full(provider).await,
    };

    match collect_changes(provider, token).await {
        Ok(delta) => Plan::Incremental(delta),
        Err(e) if e.falls_back_to_full() => {
            tracing::info!(provider = %provider.provider_type(), error = %e, "cursor rejected, falling back to full sync");
            full(provider).await
        }
        Err(e) => {
            tracing::warn!(provider = %provider.provider_type(), error = %e, "change feed failed, falling back to full sync");
            full(provider).await
        }
    }
}

async fn full(provider: &dyn CloudProvider) -> Plan {
    Plan::Full {
        next_token: seed_token(provider).await,
    }
}

/// Fetch a starting cursor for the next incremental run. Taken before the
/// walk so changes made during it are picked up next time.
async fn seed_token(provider: &dyn CloudProvider) -> Option<String> {
    if !provider.capabilities().delta_sync {
        return None;
    }
    match provider.get_changes(None).await {
        Ok(delta) => delta.next_delta_token().map(str::to_owned),
        Err(e) => {
            tracing::warn!(provider = %provider.provider_type(), error = %e, "could not seed sync cursor");
            None
        }
    }
}

/// Follow the change feed from `token` until the provider reports no more
/// pages, merging the pages into one delta.
async fn collect_changes(provider: &dyn CloudProvider, token: &str) -> Result<SyncDelta, ProviderError> {
    let mut delta = provider.get_changes(Some(token)).await?;

    while delta.has_more() {
        let Some(next) = delta.next_delta_token().map(str::to_owned) else {
            return Err(ProviderError::Parse(
                "change page has more results but no cursor".into(),
            ));
        };
        let page = provider.get_changes(Some(&next)).await?;
        if page.has_more() && page.next_delta_token() == Some(next.as_str()) {
            return Err(ProviderError::Other(format!(
                "change feed did not advance past {next}"
            )));
        }
        delta = delta.merge(page);
    }

    Ok(delta.deduplicated())
}

/// Folders an incremental run may ingest from.
///
/// Change feeds cover the whole account while full runs only walk the
/// configured folders, so delta entries are held to the same subtrees.
#[derive(Debug)]
pub(crate) enum Scope {
    Everything,
    Folders(HashSet<String>),
}

impl Scope {
    /// Expand the configured folder ids into every folder below them. An
    /// empty list, or one naming a root folder, covers everything.
    pub(crate) async fn resolve(
        provider: &dyn CloudProvider,
        folder_ids: &[String],
    ) -> Result<Self, ProviderError> {
        if folder_ids.is_empty() {
            return Ok(Self::Everything);
        }

        let roots = provider.list_root_folders().await?;
        if folder_ids.iter().any(|id| roots.iter().any(|root| &root.id == id)) {
            return Ok(Self::Everything);
        }

        let mut ids: HashSet<String> = folder_ids.iter().cloned().collect();
        for folder_id in folder_ids {
            let below = provider
                .list_folders_recursive(folder_id, MAX_SCOPE_DEPTH)
                .await?;
            ids.extend(below.into_iter().map(|folder| folder.id));
        }
        Ok(Self::Folders(ids))
    }

    pub(crate) fn contains(&self, file: &RemoteFile) -> bool {
        match self {
            Self::Everything => true,
            Self::Folders(ids) => file.parent_id.as_ref().is_some_and(|p| ids.contains(p)),
        }
    }
}
