use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Authentication mechanism a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[serde(rename = "oauth2")]
    OAuth2,
    ApiKey,
    Basic,
    AppToken,
    Certificate,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OAuth2 => write!(f, "oauth2"),
            Self::ApiKey => write!(f, "api_key"),
            Self::Basic => write!(f, "basic"),
            Self::AppToken => write!(f, "app_token"),
            Self::Certificate => write!(f, "certificate"),
        }
    }
}

impl AuthType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oauth2" => Some(Self::OAuth2),
            "api_key" => Some(Self::ApiKey),
            "basic" => Some(Self::Basic),
            "app_token" => Some(Self::AppToken),
            "certificate" => Some(Self::Certificate),
            _ => None,
        }
    }
}

/// Secret material for one of the supported auth mechanisms.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "auth_type", rename_all = "snake_case")]
pub enum AuthCredentials {
    #[serde(rename = "oauth2")]
    OAuth2 {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        client_secret: Option<String>,
        #[serde(default)]
        token_url: Option<String>,
    },
    ApiKey {
        api_key: String,
        /// Some SaaS APIs pair the key with an account e-mail.
        #[serde(default)]
        email: Option<String>,
    },
    Basic {
        username: String,
        password: String,
    },
    AppToken {
        token: String,
    },
    Certificate {
        certificate_pem: String,
        private_key_pem: String,
    },
}

impl AuthCredentials {
    pub fn auth_type(&self) -> AuthType {
        match self {
            Self::OAuth2 { .. } => AuthType::OAuth2,
            Self::ApiKey { .. } => AuthType::ApiKey,
            Self::Basic { .. } => AuthType::Basic,
            Self::AppToken { .. } => AuthType::AppToken,
            Self::Certificate { .. } => AuthType::Certificate,
        }
    }

    /// Token usable as an HTTP bearer credential, when the mechanism has one.
    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            Self::OAuth2 { access_token, .. } => Some(access_token),
            Self::AppToken { token } => Some(token),
            Self::ApiKey { api_key, .. } => Some(api_key),
            Self::Basic { .. } | Self::Certificate { .. } => None,
        }
    }

    /// True when an OAuth2 access token is past its expiry time.
    pub fn is_expired(&self) -> bool {
        match self {
            Self::OAuth2 {
                expires_at: Some(at),
                ..
            } => *at <= Utc::now(),
            _ => false,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        matches!(
            self,
            Self::OAuth2 {
                refresh_token: Some(_),
                ..
            }
        )
    }
}

// Secrets stay out of logs.
impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OAuth2 { expires_at, .. } => f
                .debug_struct("OAuth2")
                .field("access_token", &"<redacted>")
                .field("expires_at", expires_at)
                .finish_non_exhaustive(),
            Self::ApiKey { email, .. } => f
                .debug_struct("ApiKey")
                .field("email", email)
                .finish_non_exhaustive(),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::AppToken { .. } => f.debug_struct("AppToken").finish_non_exhaustive(),
            Self::Certificate { .. } => f.debug_struct("Certificate").finish_non_exhaustive(),
        }
    }
}

/// Everything a provider needs to connect: the secret, an optional server
/// URL for self-hosted backends, and provider-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionCredentials {
    #[serde(flatten)]
    pub auth: AuthCredentials,
    #[serde(default)]
    pub server_url: Option<String>,
    /// Provider-defined options. Providers decode the keys they understand
    /// into a typed struct with [`ConnectionCredentials::options`].
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ConnectionCredentials {
    pub fn new(auth: AuthCredentials) -> Self {
        Self {
            auth,
            server_url: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Decode the `extra` map into a provider's typed option struct.
    /// Unknown keys are ignored; missing keys take the struct's defaults.
    pub fn options<T: DeserializeOwned + Default>(&self) -> Result<T, ProviderError> {
        if self.extra.is_empty() {
            return Ok(T::default());
        }
        let map: serde_json::Map<String, serde_json::Value> = self
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| ProviderError::Configuration(format!("invalid provider options: {e}")))
    }

    /// Build from the plaintext map a vault returns.
    pub fn from_map(map: BTreeMap<String, serde_json::Value>) -> Result<Self, ProviderError> {
        let object: serde_json::Map<String, serde_json::Value> = map.into_iter().collect();
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| ProviderError::Configuration(format!("invalid credentials: {e}")))
    }

    /// Flatten into the plaintext map handed to a vault for encryption.
    pub fn to_map(&self) -> Result<BTreeMap<String, serde_json::Value>, ProviderError> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(object)) => Ok(object.into_iter().collect()),
            Ok(_) => Err(ProviderError::Configuration(
                "credentials did not serialize to an object".into(),
            )),
            Err(e) => Err(ProviderError::Configuration(e.to_string())),
        }
    }
}
