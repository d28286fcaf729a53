use std::sync::Arc;

use chrono::Utc;
use cloud_sync::{Ingestor, Provenance, ProviderType};
use cloud_sync_store::{DocumentLibrary, SyncStore};
use tempfile::TempDir;

fn provenance(remote_id: &str) -> Provenance {
    Provenance {
        provider: ProviderType::OneDrive,
        connection_id: "conn-1".into(),
        remote_id: remote_id.into(),
        remote_path: format!("/{remote_id}.txt"),
        web_view_url: None,
        synced_at: Utc::now(),
        profile_id: Some("p1".into()),
    }
}

struct Fixture {
    _dirs: (TempDir, TempDir),
    incoming: std::path::PathBuf,
    library: DocumentLibrary,
}

fn fixture() -> Fixture {
    let library_dir = TempDir::new().unwrap();
    let incoming = TempDir::new().unwrap();
    let store = Arc::new(SyncStore::open_in_memory().unwrap());
    Fixture {
        incoming: incoming.path().to_path_buf(),
        library: DocumentLibrary::new(library_dir.path(), store),
        _dirs: (library_dir, incoming),
    }
}

impl Fixture {
    fn write(&self, name: &str, content: &str) -> std::path::PathBuf {
        let path = self.incoming.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

#[tokio::test]
async fn ingest_copies_the_file_into_the_library() {
    let f = fixture();
    let source = f.write("notes.txt", "hello");

    let id = f.library.ingest_file(&source).await.unwrap();
    let copied = f.library.root().join(id.as_str()).join("notes.txt");
    assert_eq!(std::fs::read_to_string(copied).unwrap(), "hello");

    let documents = f.library.documents(None).unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].size_bytes, 5);
    assert_eq!(documents[0].remote_id, None);
}

#[tokio::test]
async fn provenance_upserts_by_remote_id() {
    let f = fixture();

    let first = f
        .library
        .ingest_file(&f.write("a.txt", "v1"))
        .await
        .unwrap();
    f.library
        .attach_provenance(&first, &provenance("r1"))
        .await
        .unwrap();

    let second = f
        .library
        .ingest_file(&f.write("a.txt", "v2"))
        .await
        .unwrap();
    f.library
        .attach_provenance(&second, &provenance("r1"))
        .await
        .unwrap();

    let documents = f.library.documents(Some("conn-1")).unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].id, second.as_str());
    assert_eq!(documents[0].provider_type, Some(ProviderType::OneDrive));
    assert_eq!(documents[0].profile_id.as_deref(), Some("p1"));
    assert!(!f.library.root().join(first.as_str()).exists());
    assert_eq!(
        f.library.known_remote_ids("conn-1").await.unwrap(),
        vec!["r1".to_owned()]
    );
}

#[tokio::test]
async fn remove_by_remote_id_deletes_rows_and_files() {
    let f = fixture();
    let id = f
        .library
        .ingest_file(&f.write("b.txt", "bravo"))
        .await
        .unwrap();
    f.library
        .attach_provenance(&id, &provenance("r2"))
        .await
        .unwrap();

    assert!(f.library.remove_by_remote_id("conn-1", "r2").await.unwrap());
    assert!(!f.library.remove_by_remote_id("conn-1", "r2").await.unwrap());
    assert!(!f.library.root().join(id.as_str()).exists());
    assert!(f.library.known_remote_ids("conn-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn directories_are_not_ingestible() {
    let f = fixture();
    let result = f.library.ingest_file(&f.incoming).await;
    assert!(matches!(result, Err(cloud_sync::IngestError::Unsupported(_))));
}
