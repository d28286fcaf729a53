use std::sync::Arc;
use std::time::Duration;

use cloud_sync::{
    AuthCredentials, CloudProvider, ConnectionCredentials, ListOptions, ProviderError,
    ProviderMetadata, ProviderType, RemoteFile,
};
use cloud_sync_providers::{DelegatedProvider, EtlClient, EtlSettings};
use futures::TryStreamExt;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer, sink: &TempDir) -> EtlSettings {
    let mut settings = EtlSettings::new(server.uri(), "ws-1", sink.path());
    settings.initial_backoff = Duration::from_millis(1);
    settings.poll_interval = Duration::from_millis(1);
    settings.max_attempts = 3;
    settings
}

fn jira_credentials() -> ConnectionCredentials {
    ConnectionCredentials::new(AuthCredentials::ApiKey {
        api_key: "key".into(),
        email: Some("ada@example.com".into()),
    })
    .with_server_url("https://acme.atlassian.net")
}

fn no_connections() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": [] }))
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/connections"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/connections"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/connections"))
        .and(query_param("workspaceIds", "ws-1"))
        .respond_with(no_connections())
        .expect(1)
        .mount(&server)
        .await;

    let client = EtlClient::new(settings(&server, &sink)).unwrap();
    let started = std::time::Instant::now();
    assert!(client.list_connections().await.unwrap().is_empty());
    // The server's Retry-After wins over the millisecond backoff.
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn ambiguous_create_failures_are_not_retried() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/sources"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let client = EtlClient::new(settings(&server, &sink)).unwrap();
    let result = client.create_source("cloud-sync-jira", &json!({})).await;
    assert!(matches!(result, Err(ProviderError::Connectivity(_))));
}

#[tokio::test]
async fn throttled_creates_are_retried() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/sources"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/sources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sourceId": "src-1",
            "name": "cloud-sync-jira",
            "sourceType": "jira",
            "workspaceId": "ws-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = EtlClient::new(settings(&server, &sink)).unwrap();
    let source = client.create_source("cloud-sync-jira", &json!({})).await.unwrap();
    assert_eq!(source.source_id, "src-1");
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/destinations"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = EtlClient::new(settings(&server, &sink)).unwrap();
    let result = client.list_destinations().await;
    assert!(matches!(result, Err(ProviderError::Connectivity(_))));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/sources/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such source"))
        .expect(1)
        .mount(&server)
        .await;

    let client = EtlClient::new(settings(&server, &sink)).unwrap();
    assert!(matches!(
        client.get_source("missing").await,
        Err(ProviderError::NotFound(_))
    ));
}

#[tokio::test]
async fn wait_for_job_polls_until_terminal() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/jobs/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobId": 9, "status": "running" })))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/jobs/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": 9, "status": "failed", "rowsSynced": 0
        })))
        .mount(&server)
        .await;

    let client = EtlClient::new(settings(&server, &sink)).unwrap();
    let job = client.wait_for_job(9).await.unwrap();
    assert_eq!(job.status, cloud_sync_providers::etl::types::EtlJobStatus::Failed);
}

async fn mount_fresh_setup(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/connections"))
        .respond_with(no_connections())
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/sources"))
        .and(body_partial_json(json!({
            "name": "cloud-sync-jira",
            "workspaceId": "ws-1",
            "configuration": { "sourceType": "jira", "domain": "acme.atlassian.net" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sourceId": "s1", "name": "cloud-sync-jira"
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/destinations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/destinations"))
        .and(body_partial_json(json!({ "name": "cloud-sync-sink" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "destinationId": "d1", "name": "cloud-sync-sink"
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/streams"))
        .and(query_param("sourceId", "s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "streamName": "issues", "syncModes": ["full_refresh_overwrite", "incremental_append"] },
            { "streamName": "projects", "syncModes": ["full_refresh_overwrite"] }
        ])))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/connections"))
        .and(body_partial_json(json!({
            "name": "cloud-sync-jira",
            "sourceId": "s1",
            "destinationId": "d1",
            "prefix": "jira_",
            "configurations": { "streams": [
                { "name": "issues", "syncMode": "incremental_append" },
                { "name": "projects", "syncMode": "full_refresh_overwrite" }
            ]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "connectionId": "c1",
            "name": "cloud-sync-jira",
            "sourceId": "s1",
            "destinationId": "d1",
            "prefix": "jira_",
            "configurations": { "streams": [{ "name": "issues" }, { "name": "projects" }] }
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_successful_job(server: &MockServer, rows: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/jobs"))
        .and(body_partial_json(json!({ "connectionId": "c1", "jobType": "sync" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobId": 7, "status": "running" })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/jobs/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": 7, "status": "succeeded", "rowsSynced": rows
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn delegated_sync_reports_stream_output_as_files() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();
    mount_fresh_setup(&server).await;
    mount_successful_job(&server, 3).await;

    let issues = "{\"key\":\"A-1\"}\n{\"key\":\"A-2\"}\n{\"key\":\"A-3\"}\n";
    std::fs::write(sink.path().join("_airbyte_raw_jira_issues.jsonl"), issues).unwrap();

    let client = Arc::new(EtlClient::new(settings(&server, &sink)).unwrap());
    let mut provider = DelegatedProvider::new(ProviderType::Jira, client);
    assert!(provider.authenticate(jira_credentials()).await.unwrap());

    let seed = provider.get_changes(None).await.unwrap();
    assert!(seed.is_empty());
    assert_eq!(seed.next_delta_token(), Some("initial"));

    let delta = provider.get_changes(Some("initial")).await.unwrap();
    assert_eq!(delta.next_delta_token(), Some("7"));
    assert!(delta.added().is_empty());
    assert_eq!(delta.modified().len(), 1);

    let file = &delta.modified()[0];
    assert_eq!(file.id, "issues");
    assert_eq!(file.name, "issues.jsonl");
    assert_eq!(file.size_bytes, issues.len() as u64);
    assert_eq!(
        file.provider_metadata,
        ProviderMetadata::Delegated {
            stream: "issues".into(),
            records_synced: 3,
            job_id: Some("7".into()),
        }
    );

    let chunks: Vec<bytes::Bytes> = provider
        .download_file("issues")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(chunks.concat(), issues.as_bytes());

    assert!(matches!(
        provider.download_file("projects").await,
        Err(ProviderError::NotFound(_))
    ));
}

#[tokio::test]
async fn full_listing_runs_a_job_and_filters_streams() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();
    mount_fresh_setup(&server).await;
    mount_successful_job(&server, 2).await;

    std::fs::write(sink.path().join("_airbyte_raw_jira_issues.jsonl"), "{}\n").unwrap();
    std::fs::write(sink.path().join("_airbyte_raw_jira_projects.jsonl"), "{}\n").unwrap();

    let client = Arc::new(EtlClient::new(settings(&server, &sink)).unwrap());
    let mut provider = DelegatedProvider::new(ProviderType::Jira, client);
    provider.authenticate(jira_credentials()).await.unwrap();

    let options = ListOptions::recursive(vec!["projects".into()]);
    let files: Vec<RemoteFile> = provider.list_all_files(&options).try_collect().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].id, "projects");

    let (streams, none) = provider.list_folder_contents("root").await.unwrap();
    assert!(none.is_empty());
    let names: Vec<&str> = streams.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["issues", "projects"]);
}

#[tokio::test]
async fn existing_connection_is_reused() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/connections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [{
            "connectionId": "c1",
            "name": "cloud-sync-jira",
            "sourceId": "s1",
            "destinationId": "d1",
            "prefix": "jira_",
            "configurations": { "streams": [{ "name": "issues" }] }
        }]})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/sources"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    mount_successful_job(&server, 0).await;

    let client = Arc::new(EtlClient::new(settings(&server, &sink)).unwrap());
    let mut provider = DelegatedProvider::new(ProviderType::Jira, client);
    provider.authenticate(jira_credentials()).await.unwrap();

    let delta = provider.get_changes(Some("initial")).await.unwrap();
    assert!(delta.is_empty());
    assert_eq!(delta.next_delta_token(), Some("7"));
}

#[tokio::test]
async fn failed_setup_removes_the_new_source() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/connections"))
        .respond_with(no_connections())
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/sources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sourceId": "s1", "name": "cloud-sync-jira"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/destinations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [{
            "destinationId": "d1", "name": "cloud-sync-sink"
        }]})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/streams"))
        .respond_with(ResponseTemplate::new(400).set_body_string("source check failed"))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/v1/sources/s1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = Arc::new(EtlClient::new(settings(&server, &sink)).unwrap());
    let mut provider = DelegatedProvider::new(ProviderType::Jira, client);
    provider.authenticate(jira_credentials()).await.unwrap();

    let result = provider.get_changes(Some("initial")).await;
    assert!(matches!(result, Err(ProviderError::Other(_))));
}

#[tokio::test]
async fn delegated_providers_reject_unsupported_credentials() {
    let server = MockServer::start().await;
    let sink = TempDir::new().unwrap();
    let client = Arc::new(EtlClient::new(settings(&server, &sink)).unwrap());

    let mut provider = DelegatedProvider::new(ProviderType::Jira, client);
    let result = provider
        .authenticate(ConnectionCredentials::new(AuthCredentials::Basic {
            username: "ada".into(),
            password: "pw".into(),
        }))
        .await;
    assert!(matches!(result, Err(ProviderError::Configuration(_))));
}
