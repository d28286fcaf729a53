use cloud_sync::{
    AuthCredentials, CloudProvider, ConnectionCredentials, ListOptions, ProviderError, RemoteFile,
};
use cloud_sync_providers::WebDavProvider;
use futures::TryStreamExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROOT_SELF: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

const ROOT_LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/Docs/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/a.txt</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getcontenttype>text/plain</d:getcontenttype>
        <d:getcontentlength>5</d:getcontentlength>
        <d:getetag>"e-a"</d:getetag>
      </d:prop>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

const DOCS_LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/Docs/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/Docs/Q1%20report.pdf</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getcontentlength>2048</d:getcontentlength>
      </d:prop>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

fn credentials(server: &MockServer, password: &str) -> ConnectionCredentials {
    ConnectionCredentials::new(AuthCredentials::Basic {
        username: "ada".into(),
        password: password.into(),
    })
    .with_server_url(format!("{}/dav", server.uri()))
}

fn multistatus(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(207).set_body_raw(body, "application/xml; charset=utf-8")
}

async fn authenticated(server: &MockServer) -> WebDavProvider {
    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("Depth", "0"))
        .respond_with(multistatus(ROOT_SELF))
        .mount(server)
        .await;

    let mut provider = WebDavProvider::new();
    provider.authenticate(credentials(server, "pw")).await.unwrap();
    provider
}

#[tokio::test]
async fn propfind_listing_walks_collections() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("Depth", "1"))
        .respond_with(multistatus(ROOT_LISTING))
        .mount(&server)
        .await;

    Mock::given(method("PROPFIND"))
        .and(path("/dav/Docs/"))
        .and(header("Depth", "1"))
        .respond_with(multistatus(DOCS_LISTING))
        .mount(&server)
        .await;

    let options = ListOptions::recursive(Vec::new());
    let files: Vec<RemoteFile> = provider.list_all_files(&options).try_collect().await.unwrap();

    let ids: Vec<&str> = files.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["/a.txt", "/Docs/Q1 report.pdf"]);
    assert_eq!(files[0].etag.as_deref(), Some("e-a"));
    assert_eq!(files[0].size_bytes, 5);
    assert_eq!(files[1].name, "Q1 report.pdf");
    assert_eq!(files[1].parent_id.as_deref(), Some("/Docs"));
}

#[tokio::test]
async fn folder_contents_exclude_the_folder_itself() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("Depth", "1"))
        .respond_with(multistatus(ROOT_LISTING))
        .mount(&server)
        .await;

    let (folders, files) = provider.list_folder_contents("/").await.unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].id, "/Docs");
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn download_uses_encoded_paths() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    Mock::given(method("GET"))
        .and(path("/dav/Docs/Q1%20report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
        .mount(&server)
        .await;

    let chunks: Vec<bytes::Bytes> = provider
        .download_file("/Docs/Q1 report.pdf")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(chunks.concat(), b"%PDF-1.7");
}

#[tokio::test]
async fn wrong_password_fails_authentication() {
    let server = MockServer::start().await;

    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut provider = WebDavProvider::new();
    let result = provider.authenticate(credentials(&server, "wrong")).await;
    assert!(matches!(result, Err(ProviderError::Authentication(_))));
    assert!(!provider.validate_credentials().await);
}

#[tokio::test]
async fn webdav_has_no_change_feed() {
    let server = MockServer::start().await;
    let provider = authenticated(&server).await;

    assert!(matches!(
        provider.get_changes(None).await,
        Err(ProviderError::DeltaSyncUnsupported)
    ));
}

#[tokio::test]
async fn server_url_is_required() {
    let mut provider = WebDavProvider::new();
    let result = provider
        .authenticate(ConnectionCredentials::new(AuthCredentials::Basic {
            username: "ada".into(),
            password: "pw".into(),
        }))
        .await;
    assert!(matches!(result, Err(ProviderError::Configuration(_))));
}
