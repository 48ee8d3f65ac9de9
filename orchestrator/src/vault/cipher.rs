//! At-rest sealing of remembered secrets
//!
//! AES-256-GCM with a random 96-bit nonce per secret. A sealed value is
//! `base64(nonce || ciphertext)`. The key lives next to the data in an
//! owner-only file and is created on first use.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::SecretString;
use tracing::info;

use crate::errors::DeployError;
use crate::filesys::file::File;

const NONCE_LEN: usize = 12;

pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(key: &[u8]) -> Result<Self, DeployError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| {
            DeployError::ConfigError(format!("vault key must be 32 bytes, got {}", key.len()))
        })?;
        Ok(Self { cipher })
    }

    /// Read the key from `file`, or generate one and write it owner-only
    pub async fn load_or_create(file: &File) -> Result<Self, DeployError> {
        if file.exists().await {
            let encoded = file.read_string().await?;
            let key = STANDARD.decode(encoded.trim()).map_err(|e| {
                DeployError::ConfigError(format!("invalid vault key {}: {}", file.path().display(), e))
            })?;
            return Self::new(&key);
        }

        let key = Aes256Gcm::generate_key(OsRng);
        file.write_private(STANDARD.encode(key).as_bytes()).await?;
        info!("Created vault key {}", file.path().display());
        Self::new(&key)
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, DeployError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| DeployError::Internal("failed to seal secret".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<SecretString, DeployError> {
        let bytes = STANDARD
            .decode(sealed.trim())
            .map_err(|e| DeployError::AuthError(format!("malformed sealed secret: {}", e)))?;
        if bytes.len() <= NONCE_LEN {
            return Err(DeployError::AuthError("sealed secret is truncated".to_string()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DeployError::AuthError("secret does not open with this vault key".to_string()))?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| DeployError::AuthError("sealed secret is not UTF-8".to_string()))?;
        Ok(SecretString::from(text))
    }
}
