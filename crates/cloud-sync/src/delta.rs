use std::collections::HashSet;

use serde::Serialize;

use crate::file::RemoteFile;

/// Result of one incremental-sync call.
///
/// The lists are private so that `total_changes` always matches them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncDelta {
    added: Vec<RemoteFile>,
    modified: Vec<RemoteFile>,
    deleted: Vec<String>,
    next_delta_token: Option<String>,
    has_more: bool,
    total_changes: usize,
}

impl SyncDelta {
    pub fn new(
        added: Vec<RemoteFile>,
        modified: Vec<RemoteFile>,
        deleted: Vec<String>,
        next_delta_token: Option<String>,
        has_more: bool,
    ) -> Self {
        let total_changes = added.len() + modified.len() + deleted.len();
        Self {
            added,
            modified,
            deleted,
            next_delta_token,
            has_more,
            total_changes,
        }
    }

    /// An empty delta that only carries a cursor forward.
    pub fn unchanged(next_delta_token: impl Into<String>) -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new(), Some(next_delta_token.into()), false)
    }

    pub fn added(&self) -> &[RemoteFile] {
        &self.added
    }

    pub fn modified(&self) -> &[RemoteFile] {
        &self.modified
    }

    pub fn deleted(&self) -> &[String] {
        &self.deleted
    }

    pub fn next_delta_token(&self) -> Option<&str> {
        self.next_delta_token.as_deref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn total_changes(&self) -> usize {
        self.total_changes
    }

    pub fn is_empty(&self) -> bool {
        self.total_changes == 0
    }

    /// Append a follow-up page, taking its cursor and `has_more` flag.
    ///
    /// The later page wins for any id it reports: earlier entries for that
    /// id are dropped, whichever bucket they were in.
    pub fn merge(self, next: SyncDelta) -> SyncDelta {
        let (mut added, mut modified, mut deleted, _, _) = self.into_parts();
        let (next_added, next_modified, next_deleted, token, has_more) = next.into_parts();

        let reported: HashSet<String> = next_added
            .iter()
            .chain(&next_modified)
            .map(|f| f.id.clone())
            .chain(next_deleted.iter().cloned())
            .collect();
        added.retain(|f| !reported.contains(&f.id));
        modified.retain(|f| !reported.contains(&f.id));
        deleted.retain(|id| !reported.contains(id));

        added.extend(next_added);
        modified.extend(next_modified);
        deleted.extend(next_deleted);
        SyncDelta::new(added, modified, deleted, token, has_more).deduplicated()
    }

    /// Report each id once. The last report of a file wins, and a file that
    /// is also listed as deleted is only deleted.
    pub fn deduplicated(self) -> SyncDelta {
        let (added, modified, deleted, token, has_more) = self.into_parts();

        let mut seen: HashSet<String> = deleted.iter().cloned().collect();
        let mut kept: Vec<(bool, RemoteFile)> = Vec::new();
        let tagged = added
            .into_iter()
            .map(|f| (true, f))
            .chain(modified.into_iter().map(|f| (false, f)));
        for (is_added, file) in tagged.rev() {
            if seen.insert(file.id.clone()) {
                kept.push((is_added, file));
            }
        }
        kept.reverse();
        let (added, modified): (Vec<_>, Vec<_>) = kept.into_iter().partition(|(is_added, _)| *is_added);

        let mut unique = HashSet::new();
        let deleted = deleted.into_iter().filter(|id| unique.insert(id.clone())).collect();

        SyncDelta::new(
            added.into_iter().map(|(_, f)| f).collect(),
            modified.into_iter().map(|(_, f)| f).collect(),
            deleted,
            token,
            has_more,
        )
    }

    /// Consume into `(added, modified, deleted, next_delta_token, has_more)`.
    pub fn into_parts(
        self,
    ) -> (
        Vec<RemoteFile>,
        Vec<RemoteFile>,
        Vec<String>,
        Option<String>,
        bool,
    ) {
        (
            self.added,
            self.modified,
            self.deleted,
            self.next_delta_token,
            self.has_more,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str) -> RemoteFile {
        RemoteFile::new(id, format!("{id}.txt"), format!("/{id}.txt"))
    }

    #[test]
    fn total_changes_counts_every_bucket() {
        let delta = SyncDelta::new(
            vec![file("a")],
            vec![file("b"), file("c")],
            vec!["d".into()],
            Some("T1".into()),
            false,
        );
        assert_eq!(delta.total_changes(), 4);
        assert_eq!(delta.next_delta_token(), Some("T1"));
    }

    #[test]
    fn unchanged_delta_is_empty() {
        let delta = SyncDelta::unchanged("T9");
        assert!(delta.is_empty());
        assert_eq!(delta.total_changes(), 0);
        assert!(!delta.has_more());
    }

    #[test]
    fn merge_recomputes_total_and_keeps_latest_cursor() {
        let first = SyncDelta::new(vec![file("a")], vec![], vec![], Some("p2".into()), true);
        let second = SyncDelta::new(vec![], vec![file("b")], vec!["c".into()], Some("T2".into()), false);

        let merged = first.merge(second);
        assert_eq!(merged.total_changes(), 3);
        assert_eq!(merged.next_delta_token(), Some("T2"));
        assert!(!merged.has_more());
    }

    #[test]
    fn later_pages_replace_earlier_reports() {
        let mut renamed = file("a");
        renamed.name = "renamed.txt".into();
        let first = SyncDelta::new(vec![file("a")], vec![file("b")], vec!["c".into()], Some("p2".into()), true);
        let second = SyncDelta::new(vec![file("c")], vec![renamed], vec!["b".into()], Some("T2".into()), false);

        let (added, modified, deleted, _, _) = first.merge(second).into_parts();
        let ids = |files: &[RemoteFile]| files.iter().map(|f| f.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&added), vec!["c"]);
        assert_eq!(ids(&modified), vec!["a"]);
        assert_eq!(modified[0].name, "renamed.txt");
        assert_eq!(deleted, vec!["b"]);
    }

    #[test]
    fn deletion_in_the_same_page_wins() {
        let delta = SyncDelta::new(
            vec![file("a")],
            vec![file("b"), file("a")],
            vec!["b".into(), "b".into()],
            None,
            false,
        )
        .deduplicated();

        assert!(delta.added().is_empty());
        assert_eq!(delta.modified().len(), 1);
        assert_eq!(delta.modified()[0].id, "a");
        assert_eq!(delta.deleted(), ["b".to_string()]);
        assert_eq!(delta.total_changes(), 2);
    }
}
