use cloud_sync::{AuthType, JobStatus, JobType, ProviderType, SyncFilters, SyncJob};
use cloud_sync_store::{ConnectionRecord, StoreError, SyncConfigRecord, SyncStore};

fn create_store() -> SyncStore {
    SyncStore::open_in_memory().unwrap()
}

fn connection(store: &SyncStore, name: &str) -> ConnectionRecord {
    let record = ConnectionRecord::new(name, ProviderType::GoogleDrive, AuthType::OAuth2, "sealed");
    store.insert_connection(&record).unwrap();
    record
}

fn sync_config(store: &SyncStore, connection_id: &str) -> SyncConfigRecord {
    let mut record = SyncConfigRecord::new(connection_id, "docs");
    record.folder_ids = vec!["root".into()];
    record.filters = SyncFilters {
        extensions: vec!["pdf".into()],
        max_size_bytes: Some(1024),
        ..Default::default()
    };
    record.delete_removed = true;
    record.profile_id = Some("profile-1".into());
    store.insert_sync_config(&record).unwrap();
    record
}

#[test]
fn connections_round_trip_through_sqlite() {
    let store = create_store();
    let record = connection(&store, "work drive");

    let loaded = store.get_connection(&record.id).unwrap();
    assert_eq!(loaded.name, "work drive");
    assert_eq!(loaded.provider_type, ProviderType::GoogleDrive);
    assert_eq!(loaded.auth_type, AuthType::OAuth2);
    assert_eq!(loaded.encrypted_credentials, "sealed");
    assert_eq!(loaded.cache_limit_bytes, None);

    store.set_connection_cache_limit(&record.id, Some(4096)).unwrap();
    store.update_connection_credentials(&record.id, "resealed").unwrap();
    let updated = store.get_connection(&record.id).unwrap();
    assert_eq!(updated.cache_limit_bytes, Some(4096));
    assert_eq!(updated.encrypted_credentials, "resealed");
}

#[test]
fn missing_connection_is_not_found() {
    let store = create_store();
    assert!(matches!(
        store.get_connection("nope"),
        Err(StoreError::NotFound { kind: "connection", .. })
    ));
    assert!(matches!(
        store.update_connection_credentials("nope", "x"),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn connections_list_by_name() {
    let store = create_store();
    connection(&store, "zeta");
    connection(&store, "alpha");

    let names: Vec<String> = store
        .list_connections()
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[test]
fn sync_configs_keep_filters_and_policy() {
    let store = create_store();
    let conn = connection(&store, "drive");
    let config = sync_config(&store, &conn.id);

    let loaded = store.get_sync_config(&config.id).unwrap();
    assert_eq!(loaded.folder_ids, vec!["root".to_owned()]);
    assert_eq!(loaded.filters, config.filters);
    assert!(loaded.delete_removed);
    assert_eq!(loaded.profile_id.as_deref(), Some("profile-1"));

    let other = connection(&store, "other");
    sync_config(&store, &other.id);
    assert_eq!(store.list_sync_configs(Some(&conn.id)).unwrap().len(), 1);
    assert_eq!(store.list_sync_configs(None).unwrap().len(), 2);
}

#[test]
fn sync_config_needs_an_existing_connection() {
    let store = create_store();
    let orphan = SyncConfigRecord::new("missing-connection", "docs");
    assert!(matches!(
        store.insert_sync_config(&orphan),
        Err(StoreError::Database(_))
    ));
}

#[test]
fn cursor_is_absent_until_saved_and_then_replaced() {
    let store = create_store();
    let conn = connection(&store, "drive");
    let config = sync_config(&store, &conn.id);

    assert!(store.load_cursor(&config.id).unwrap().is_none());

    store.save_cursor(&config.id, Some("T1")).unwrap();
    let first = store.load_cursor(&config.id).unwrap().unwrap();
    assert_eq!(first.delta_token.as_deref(), Some("T1"));

    store.save_cursor(&config.id, Some("T2")).unwrap();
    let second = store.load_cursor(&config.id).unwrap().unwrap();
    assert_eq!(second.delta_token.as_deref(), Some("T2"));
    assert!(second.last_sync_at >= first.last_sync_at);

    store.save_cursor(&config.id, None).unwrap();
    assert_eq!(store.load_cursor(&config.id).unwrap().unwrap().delta_token, None);
}

#[test]
fn jobs_persist_progress_and_errors() {
    let store = create_store();
    let conn = connection(&store, "drive");
    let config = sync_config(&store, &conn.id);

    let mut job = SyncJob::new("job-1", &config.id, JobType::Incremental);
    store.create_job(&job).unwrap();
    assert_eq!(store.get_job("job-1").unwrap().status, JobStatus::Pending);

    job.start();
    job.progress.discovered = 3;
    job.progress.processed = 2;
    job.progress.current_file = Some("/a.pdf".into());
    job.push_error(Some("f3"), "permission denied", 50);
    store.update_job(&job).unwrap();

    let loaded = store.get_job("job-1").unwrap();
    assert_eq!(loaded.status, JobStatus::Running);
    assert_eq!(loaded.job_type, JobType::Incremental);
    assert_eq!(loaded.progress, job.progress);
    assert_eq!(loaded.errors.len(), 1);
    assert_eq!(loaded.errors[0].remote_id.as_deref(), Some("f3"));
    assert!(loaded.started_at.is_some());
    assert!(loaded.finished_at.is_none());
}

#[test]
fn updating_an_unknown_job_fails() {
    let store = create_store();
    let job = SyncJob::new("ghost", "cfg", JobType::Full);
    assert!(matches!(store.update_job(&job), Err(StoreError::NotFound { .. })));
}

#[test]
fn list_jobs_is_newest_first_and_limited() {
    let store = create_store();
    let conn = connection(&store, "drive");
    let config = sync_config(&store, &conn.id);

    for i in 0..3 {
        store
            .create_job(&SyncJob::new(format!("job-{i}"), &config.id, JobType::Full))
            .unwrap();
    }

    let ids: Vec<String> = store
        .list_jobs(Some(&config.id), 2)
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(ids, vec!["job-2", "job-1"]);
    assert!(store.list_jobs(Some("other"), 10).unwrap().is_empty());
}

#[test]
fn deleting_a_connection_cascades() {
    let store = create_store();
    let conn = connection(&store, "drive");
    let config = sync_config(&store, &conn.id);
    store.save_cursor(&config.id, Some("T1")).unwrap();
    store
        .create_job(&SyncJob::new("job-1", &config.id, JobType::Full))
        .unwrap();

    assert!(store.delete_connection(&conn.id).unwrap());
    assert!(!store.delete_connection(&conn.id).unwrap());
    assert!(store.list_sync_configs(None).unwrap().is_empty());
    assert!(store.load_cursor(&config.id).unwrap().is_none());
    assert!(matches!(store.get_job("job-1"), Err(StoreError::NotFound { .. })));
}

#[test]
fn file_backed_store_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("sync.db");

    let id = {
        let store = SyncStore::open(&path).unwrap();
        connection(&store, "persisted").id
    };

    let reopened = SyncStore::open(&path).unwrap();
    assert_eq!(reopened.get_connection(&id).unwrap().name, "persisted");
}
