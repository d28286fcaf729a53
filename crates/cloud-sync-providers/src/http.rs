//! Response handling shared by the HTTP-backed providers.

use std::time::Duration;

use cloud_sync::{ByteStream, ProviderError};
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;

pub(crate) const USER_AGENT: &str = "cloud-sync";

/// Longest error body carried into an error message.
const MAX_ERROR_BODY: usize = 300;

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Connectivity(format!("request timed out: {e}"))
    } else {
        ProviderError::Connectivity(e.to_string())
    }
}

/// Body text for error messages, cut to a readable length.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

/// Pass successful responses through and map everything else onto the
/// provider error taxonomy.
pub(crate) async fn check(
    response: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry = retry_after(response.headers());
    let body = error_body(response).await;
    Err(ProviderError::from_status(
        status.as_u16(),
        format!("{context}: {body}"),
        retry,
    ))
}

pub(crate) async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
    response
        .json()
        .await
        .map_err(|e| ProviderError::Parse(e.to_string()))
}

pub(crate) fn byte_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map_err(|e| ProviderError::Connectivity(format!("download interrupted: {e}"))),
    )
}

/// `<base>/<path>`, tolerating a trailing slash on the base.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
