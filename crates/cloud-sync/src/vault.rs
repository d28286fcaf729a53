use std::collections::BTreeMap;

/// Errors from the credential vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// Encrypts connection credentials at rest.
///
/// The ciphertext format belongs to the implementation; callers treat it
/// as an opaque string.
pub trait Vault: Send + Sync {
    fn encrypt(&self, plaintext: &BTreeMap<String, serde_json::Value>) -> Result<String, VaultError>;

    fn decrypt(&self, ciphertext: &str) -> Result<BTreeMap<String, serde_json::Value>, VaultError>;
}
