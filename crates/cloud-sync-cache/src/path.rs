use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Length of the remote-id prefix used as the per-file directory name.
const ID_PREFIX_LEN: usize = 8;

/// Replace anything outside `[A-Za-z0-9._-]` so remote names and ids can't
/// escape the cache directory.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "_".to_owned(),
        trimmed => trimmed.to_owned(),
    }
}

/// `<connection_dir>/<first 8 chars of id>/<file name>`.
pub fn short_file_path(connection_dir: &Path, remote_id: &str, file_name: &str) -> PathBuf {
    let id = sanitize_component(remote_id);
    let prefix: String = id.chars().take(ID_PREFIX_LEN).collect();
    connection_dir
        .join(prefix)
        .join(sanitize_component(file_name))
}

/// Fallback when the short path is already taken by a different remote id:
/// `<connection_dir>/<sha256 of id>/<file name>`. Distinct ids never share
/// this directory, whatever sanitising does to them.
pub fn full_file_path(connection_dir: &Path, remote_id: &str, file_name: &str) -> PathBuf {
    connection_dir
        .join(id_digest(remote_id))
        .join(sanitize_component(file_name))
}

fn id_digest(remote_id: &str) -> String {
    Sha256::digest(remote_id.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
