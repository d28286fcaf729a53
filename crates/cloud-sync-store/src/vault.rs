use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cloud_sync::{Vault, VaultError};
use sha2::{Digest, Sha256};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// AES-256-GCM credential vault.
///
/// The key is the SHA-256 digest of a passphrase. Ciphertexts are
/// `base64(nonce || ciphertext+tag)` with a fresh random nonce each time.
pub struct AesGcmVault {
    cipher: Aes256Gcm,
}

impl AesGcmVault {
    pub fn from_passphrase(passphrase: &str) -> Result<Self, VaultError> {
        if passphrase.is_empty() {
            return Err(VaultError::KeyUnavailable("empty passphrase".into()));
        }
        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::KeyUnavailable(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Read the passphrase from an environment variable.
    pub fn from_env(var: &str) -> Result<Self, VaultError> {
        let passphrase = std::env::var(var)
            .map_err(|_| VaultError::KeyUnavailable(format!("{var} is not set")))?;
        Self::from_passphrase(&passphrase)
    }
}

impl Vault for AesGcmVault {
    fn encrypt(&self, plaintext: &BTreeMap<String, serde_json::Value>) -> Result<String, VaultError> {
        let json = serde_json::to_vec(plaintext).map_err(|e| VaultError::Encrypt(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, json.as_slice())
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<BTreeMap<String, serde_json::Value>, VaultError> {
        let sealed = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| VaultError::Decrypt(format!("bad base64: {e}")))?;
        if sealed.len() <= NONCE_LEN {
            return Err(VaultError::Decrypt("ciphertext too short".into()));
        }

        let (nonce, body) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| VaultError::Decrypt("authentication tag mismatch".into()))?;
        serde_json::from_slice(&plaintext).map_err(|e| VaultError::Decrypt(e.to_string()))
    }
}
