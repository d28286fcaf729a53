//! Source configurations for the delegated provider types.

use cloud_sync::{AuthCredentials, ConnectionCredentials, ProviderError, ProviderType};
use serde_json::{Value, json};

fn site_domain(credentials: &ConnectionCredentials, provider: ProviderType) -> Result<String, ProviderError> {
    let url = credentials.server_url.as_deref().ok_or_else(|| {
        ProviderError::Configuration(format!("{provider} needs a server_url"))
    })?;
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    Ok(host.to_owned())
}

fn api_key_with_email(
    credentials: &ConnectionCredentials,
    provider: ProviderType,
) -> Result<(String, String), ProviderError> {
    match &credentials.auth {
        AuthCredentials::ApiKey {
            api_key,
            email: Some(email),
        } => Ok((api_key.clone(), email.clone())),
        _ => Err(ProviderError::Configuration(format!(
            "{provider} needs an API key with an account e-mail"
        ))),
    }
}

fn bearer(credentials: &ConnectionCredentials, provider: ProviderType) -> Result<String, ProviderError> {
    credentials
        .auth
        .bearer_token()
        .map(str::to_owned)
        .ok_or_else(|| ProviderError::Configuration(format!("{provider} needs a token")))
}

/// The backend's source configuration for `provider`, built from the
/// connection's credentials.
pub(crate) fn source_configuration(
    provider: ProviderType,
    credentials: &ConnectionCredentials,
) -> Result<Value, ProviderError> {
    match provider {
        ProviderType::Confluence => {
            let (api_token, email) = api_key_with_email(credentials, provider)?;
            Ok(json!({
                "sourceType": "confluence",
                "domain_name": site_domain(credentials, provider)?,
                "email": email,
                "api_token": api_token,
            }))
        }
        ProviderType::Jira => {
            let (api_token, email) = api_key_with_email(credentials, provider)?;
            Ok(json!({
                "sourceType": "jira",
                "domain": site_domain(credentials, provider)?,
                "email": email,
                "api_token": api_token,
            }))
        }
        ProviderType::Notion => Ok(json!({
            "sourceType": "notion",
            "credentials": { "auth_type": "token", "token": bearer(credentials, provider)? },
        })),
        ProviderType::Slack => Ok(json!({
            "sourceType": "slack",
            "join_channels": false,
            "credentials": {
                "option_title": "API Token Credentials",
                "api_token": bearer(credentials, provider)?,
            },
        })),
        ProviderType::Gmail => match &credentials.auth {
            AuthCredentials::OAuth2 {
                refresh_token: Some(refresh_token),
                client_id: Some(client_id),
                client_secret: Some(client_secret),
                ..
            } => Ok(json!({
                "sourceType": "gmail",
                "credentials": {
                    "auth_type": "Client",
                    "client_id": client_id,
                    "client_secret": client_secret,
                    "refresh_token": refresh_token,
                },
            })),
            _ => Err(ProviderError::Configuration(
                "gmail needs OAuth2 credentials with a refresh token and client id/secret".into(),
            )),
        },
        ProviderType::GoogleDrive | ProviderType::OneDrive | ProviderType::WebDav => {
            Err(ProviderError::Configuration(format!(
                "{provider} is not served by the ETL backend"
            )))
        }
    }
}
