use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use cloud_sync::{
    AuthCredentials, CloudProvider, ConnectionCredentials, ListOptions, ProviderError,
    ProviderMetadata, RemoteFile,
};
use cloud_sync_providers::GoogleDriveProvider;
use futures::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROOT_QUERY: &str = "'root' in parents and trashed = false";

fn token(value: &str) -> ConnectionCredentials {
    ConnectionCredentials::new(AuthCredentials::AppToken {
        token: value.into(),
    })
}

async fn mount_about(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": {} })))
        .mount(server)
        .await;
}

async fn authenticated(server: &MockServer) -> GoogleDriveProvider {
    mount_about(server).await;
    let mut provider = GoogleDriveProvider::new(Some(server.uri()));
    provider.authenticate(token("valid")).await.unwrap();
    provider
}

async fn read_all(stream: cloud_sync::ByteStream) -> Vec<u8> {
    let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
    chunks.concat()
}

#[tokio::test]
async fn list_all_files_walks_folders_and_exports_natives() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("q", ROOT_QUERY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                { "id": "F1", "name": "Work", "mimeType": "application/vnd.google-apps.folder", "parents": ["root"] },
                { "id": "A", "name": "a.pdf", "mimeType": "application/pdf", "size": "3", "md5Checksum": "m1", "parents": ["root"] },
                { "id": "X", "name": "Survey", "mimeType": "application/vnd.google-apps.form", "parents": ["root"] }
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("q", "'F1' in parents and trashed = false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                { "id": "D", "name": "Plan", "mimeType": "application/vnd.google-apps.document", "parents": ["F1"] }
            ]
        })))
        .mount(&server)
        .await;

    let options = ListOptions::recursive(Vec::new());
    let files: Vec<RemoteFile> = provider.list_all_files(&options).try_collect().await.unwrap();

    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["/a.pdf", "/Work/Plan.docx"]);
    assert_eq!(files[0].size_bytes, 3);
    assert_eq!(files[0].checksum.as_deref(), Some("m1"));
    assert!(matches!(
        &files[1].provider_metadata,
        ProviderMetadata::GoogleDrive { export_mime_type: Some(_), .. }
    ));
}

#[tokio::test]
async fn list_files_follows_page_tokens() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [{ "id": "B", "name": "b.txt", "mimeType": "text/plain", "parents": ["root"] }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [{ "id": "A", "name": "a.txt", "mimeType": "text/plain", "parents": ["root"] }],
            "nextPageToken": "p2"
        })))
        .mount(&server)
        .await;

    let (_, files) = provider.list_folder_contents("root").await.unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn native_documents_download_through_export() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    Mock::given(method("GET"))
        .and(path("/files/D"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "D", "name": "Plan", "mimeType": "application/vnd.google-apps.document", "parents": ["root"]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/D/export"))
        .and(query_param(
            "mimeType",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"docx-bytes".to_vec()))
        .mount(&server)
        .await;

    let bytes = read_all(provider.download_file("D").await.unwrap()).await;
    assert_eq!(bytes, b"docx-bytes");
}

#[tokio::test]
async fn binary_files_download_as_media() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    Mock::given(method("GET"))
        .and(path("/files/A"))
        .and(query_param("alt", "media"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "A", "name": "a.pdf", "mimeType": "application/pdf", "parents": ["root"]
        })))
        .mount(&server)
        .await;

    let bytes = read_all(provider.download_file("A").await.unwrap()).await;
    assert_eq!(bytes, b"%PDF");
}

#[tokio::test]
async fn changes_seed_a_cursor_then_page_to_the_new_start_token() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    Mock::given(method("GET"))
        .and(path("/changes/startPageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "startPageToken": "100" })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/changes"))
        .and(query_param("pageToken", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "changes": [
                { "fileId": "gone", "removed": true },
                { "fileId": "B", "file": {
                    "id": "B", "name": "b.txt", "mimeType": "text/plain", "parents": ["root"],
                    "createdTime": "2024-10-01T10:00:00Z", "modifiedTime": "2024-10-01T10:00:00Z"
                }},
                { "fileId": "C", "file": {
                    "id": "C", "name": "c.txt", "mimeType": "text/plain", "parents": ["root"],
                    "createdTime": "2024-09-01T10:00:00Z", "modifiedTime": "2024-10-01T10:00:00Z"
                }},
                { "fileId": "T", "file": {
                    "id": "T", "name": "t.txt", "mimeType": "text/plain", "parents": ["root"], "trashed": true
                }}
            ],
            "nextPageToken": "101"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/changes"))
        .and(query_param("pageToken", "101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "changes": [],
            "newStartPageToken": "200"
        })))
        .mount(&server)
        .await;

    let seed = provider.get_changes(None).await.unwrap();
    assert!(seed.is_empty());
    assert_eq!(seed.next_delta_token(), Some("100"));

    let first = provider.get_changes(Some("100")).await.unwrap();
    assert_eq!(first.added().len(), 1);
    assert_eq!(first.added()[0].id, "B");
    assert_eq!(first.modified()[0].id, "C");
    assert_eq!(first.deleted(), ["gone".to_owned(), "T".to_owned()]);
    assert_eq!(first.total_changes(), 4);
    assert!(first.has_more());
    assert_eq!(first.next_delta_token(), Some("101"));

    let last = provider.get_changes(Some("101")).await.unwrap();
    assert!(last.is_empty());
    assert!(!last.has_more());
    assert_eq!(last.next_delta_token(), Some("200"));
}

#[tokio::test]
async fn rejected_page_token_is_an_expired_cursor() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    Mock::given(method("GET"))
        .and(path("/changes"))
        .respond_with(ResponseTemplate::new(410).set_body_string("gone"))
        .mount(&server)
        .await;

    let result = provider.get_changes(Some("stale")).await;
    assert!(matches!(result, Err(ProviderError::ExpiredCursor(_))));
}

#[tokio::test]
async fn quota_errors_become_rate_limits() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    Mock::given(method("GET"))
        .and(path("/files/A"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("Retry-After", "7")
                .set_body_json(json!({ "error": { "errors": [{ "reason": "rateLimitExceeded" }] } })),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/B"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(json!({ "error": { "errors": [{ "reason": "insufficientFilePermissions" }] } })),
        )
        .mount(&server)
        .await;

    match provider.get_file_metadata("A").await {
        Err(ProviderError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Duration::from_secs(7));
        }
        other => panic!("expected a rate limit, got {other:?}"),
    }
    assert!(matches!(
        provider.get_file_metadata("B").await,
        Err(ProviderError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn expired_token_is_refreshed_before_probing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/about"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": {} })))
        .mount(&server)
        .await;

    let credentials = ConnectionCredentials::new(AuthCredentials::OAuth2 {
        access_token: "stale".into(),
        refresh_token: Some("r1".into()),
        expires_at: Some(Utc::now() - ChronoDuration::minutes(5)),
        client_id: Some("cid".into()),
        client_secret: None,
        token_url: Some(format!("{}/token", server.uri())),
    });

    let mut provider = GoogleDriveProvider::new(Some(server.uri()));
    assert!(provider.authenticate(credentials).await.unwrap());
    assert!(provider.validate_credentials().await);
}

#[tokio::test]
async fn revoked_token_without_refresh_fails_authentication() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .mount(&server)
        .await;

    let mut provider = GoogleDriveProvider::new(Some(server.uri()));
    let result = provider.authenticate(token("revoked")).await;
    assert!(matches!(result, Err(ProviderError::Authentication(_))));
}
