use std::collections::{HashSet, VecDeque};

use async_stream::stream;
use cloud_sync::{CloudProvider, ListOptions, RemoteFileStream};

/// Breadth-first listing built on `list_folder_contents`, for providers
/// without a native recursive listing.
///
/// Folders reachable through more than one parent are visited once. A
/// listing error is yielded and ends the walk.
pub(crate) fn walk_folders<'a, P>(
    provider: &'a P,
    options: &'a ListOptions,
    root_id: &'a str,
) -> RemoteFileStream<'a>
where
    P: CloudProvider + ?Sized,
{
    let mut queue: VecDeque<String> = if options.folder_ids.is_empty() {
        VecDeque::from([root_id.to_owned()])
    } else {
        options.folder_ids.iter().cloned().collect()
    };
    let mut seen = HashSet::new();

    Box::pin(stream! {
        while let Some(folder_id) = queue.pop_front() {
            if !seen.insert(folder_id.clone()) {
                continue;
            }

            let (folders, files) = match provider.list_folder_contents(&folder_id).await {
                Ok(contents) => contents,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for file in files {
                yield Ok(file);
            }

            if options.recursive {
                queue.extend(folders.into_iter().map(|f| f.id));
            }
        }
    })
}
