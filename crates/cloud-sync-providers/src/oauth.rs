use chrono::Utc;
use cloud_sync::{AuthCredentials, ConnectionCredentials, ProviderError};
use serde::Deserialize;

use crate::http;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Run the OAuth2 refresh-token grant and update `credentials` in place.
///
/// The token endpoint comes from the credentials when set, otherwise
/// `default_token_url`.
pub(crate) async fn refresh(
    client: &reqwest::Client,
    credentials: &mut ConnectionCredentials,
    default_token_url: &str,
) -> Result<(), ProviderError> {
    let (token_url, form) = match &credentials.auth {
        AuthCredentials::OAuth2 {
            refresh_token: Some(refresh_token),
            client_id,
            client_secret,
            token_url,
            ..
        } => {
            let mut form = vec![
                ("grant_type", "refresh_token".to_owned()),
                ("refresh_token", refresh_token.clone()),
            ];
            if let Some(id) = client_id {
                form.push(("client_id", id.clone()));
            }
            if let Some(secret) = client_secret {
                form.push(("client_secret", secret.clone()));
            }
            let url = token_url
                .clone()
                .unwrap_or_else(|| default_token_url.to_owned());
            (url, form)
        }
        _ => {
            return Err(ProviderError::Authentication(
                "credentials carry no refresh token".into(),
            ));
        }
    };

    let response = client
        .post(&token_url)
        .header("User-Agent", http::USER_AGENT)
        .form(&form)
        .send()
        .await
        .map_err(http::transport_error)?;

    let status = response.status();
    if status.as_u16() == 400 || status.as_u16() == 401 {
        let body = http::error_body(response).await;
        return Err(ProviderError::Authentication(format!(
            "token refresh rejected: {body}"
        )));
    }
    let response = http::check(response, "token refresh").await?;
    let token: TokenResponse = http::json(response).await?;

    if let AuthCredentials::OAuth2 {
        access_token,
        refresh_token,
        expires_at,
        ..
    } = &mut credentials.auth
    {
        *access_token = token.access_token;
        if let Some(rotated) = token.refresh_token {
            *refresh_token = Some(rotated);
        }
        *expires_at = token
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
    }

    tracing::debug!("refreshed OAuth2 access token");
    Ok(())
}
