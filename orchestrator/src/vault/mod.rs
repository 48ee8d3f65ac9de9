//! Credential vault
//!
//! Secrets are keyed by `(subject_id, username)` where the subject is a node
//! or an SVN resource. Key passphrases are keyed by subject alone.
//! Remembered secrets are sealed with [`cipher::SecretCipher`] before they
//! reach disk.

pub mod cipher;

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::vault::cipher::SecretCipher;

/// Secret material resolved for one subject
#[derive(Debug)]
pub struct Credential {
    pub username: String,
    pub password: Option<SecretString>,
    pub passphrase: Option<SecretString>,
}

impl Credential {
    pub fn with_password(username: impl Into<String>, password: &str) -> Self {
        Self {
            username: username.into(),
            password: Some(SecretString::from(password.to_string())),
            passphrase: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.passphrase.is_none()
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self {
            username: self.username.clone(),
            password: self.password.as_ref().map(copy_secret),
            passphrase: self.passphrase.as_ref().map(copy_secret),
        }
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

/// Lookup of stored secrets; absence is `Ok(None)`, never an error
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn resolve(&self, subject_id: &str, username: &str) -> Result<Option<Credential>, DeployError>;
}

fn password_account(subject_id: &str, username: &str) -> String {
    format!("password-{}-{}", subject_id, username)
}

fn passphrase_account(subject_id: &str) -> String {
    format!("passphrase-{}", subject_id)
}

/// One remembered secret; `sealed` is the output of [`SecretCipher::seal`]
#[derive(Debug, Serialize, Deserialize)]
struct CredEntry {
    account: String,
    sealed: String,
}

struct VaultFile {
    file: File,
    cipher: SecretCipher,
}

/// Vault with a remembered tier (`credentials.json`, sealed, mode 0600)
/// and a session tier that lives only as long as the process
pub struct FileVault {
    backing: Option<VaultFile>,
    session: RwLock<HashMap<String, SecretString>>,
    persisted: RwLock<HashMap<String, SecretString>>,
}

impl FileVault {
    /// Open the vault, creating `key_file` when it does not exist yet.
    /// Entries that do not open with the key are dropped with a warning.
    pub async fn load(file: File, key_file: File) -> Result<Self, DeployError> {
        let cipher = SecretCipher::load_or_create(&key_file).await?;
        let entries: Vec<CredEntry> = file.read_json_or_default().await?;

        let mut persisted = HashMap::with_capacity(entries.len());
        for entry in entries {
            match cipher.open(&entry.sealed) {
                Ok(secret) => {
                    persisted.insert(entry.account, secret);
                }
                Err(e) => warn!("Dropping credential {}: {}", entry.account, e),
            }
        }

        Ok(Self {
            backing: Some(VaultFile { file, cipher }),
            session: RwLock::new(HashMap::new()),
            persisted: RwLock::new(persisted),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backing: None,
            session: RwLock::new(HashMap::new()),
            persisted: RwLock::new(HashMap::new()),
        }
    }

    async fn save(&self, persisted: &HashMap<String, SecretString>) -> Result<(), DeployError> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        let mut entries = Vec::with_capacity(persisted.len());
        for (account, secret) in persisted {
            entries.push(CredEntry {
                account: account.clone(),
                sealed: backing.cipher.seal(secret.expose_secret())?,
            });
        }
        entries.sort_by(|a, b| a.account.cmp(&b.account));
        backing.file.write_json_private(&entries).await
    }

    async fn set(&self, account: String, secret: &str, remember: bool) -> Result<(), DeployError> {
        let secret = SecretString::from(secret.to_string());
        if remember {
            self.session.write().await.remove(&account);
            let mut persisted = self.persisted.write().await;
            persisted.insert(account, secret);
            self.save(&persisted).await
        } else {
            self.session.write().await.insert(account, secret);
            Ok(())
        }
    }

    async fn get(&self, account: &str) -> Option<SecretString> {
        if let Some(secret) = self.session.read().await.get(account) {
            return Some(copy_secret(secret));
        }
        self.persisted.read().await.get(account).map(copy_secret)
    }

    async fn remove(&self, account: &str) -> Result<(), DeployError> {
        self.session.write().await.remove(account);
        let mut persisted = self.persisted.write().await;
        if persisted.remove(account).is_some() {
            self.save(&persisted).await?;
        }
        Ok(())
    }

    pub async fn save_password(
        &self,
        subject_id: &str,
        username: &str,
        password: &str,
        remember: bool,
    ) -> Result<(), DeployError> {
        debug!(subject = subject_id, remember, "Storing password");
        self.set(password_account(subject_id, username), password, remember)
            .await
    }

    pub async fn save_passphrase(
        &self,
        subject_id: &str,
        passphrase: &str,
        remember: bool,
    ) -> Result<(), DeployError> {
        debug!(subject = subject_id, remember, "Storing key passphrase");
        self.set(passphrase_account(subject_id), passphrase, remember)
            .await
    }

    pub async fn has_password(&self, subject_id: &str, username: &str) -> bool {
        self.get(&password_account(subject_id, username)).await.is_some()
    }

    pub async fn has_passphrase(&self, subject_id: &str) -> bool {
        self.get(&passphrase_account(subject_id)).await.is_some()
    }

    /// Drop every secret held for a subject
    pub async fn delete_all(&self, subject_id: &str, username: &str) -> Result<(), DeployError> {
        self.remove(&password_account(subject_id, username)).await?;
        self.remove(&passphrase_account(subject_id)).await
    }
}

#[async_trait]
impl CredentialVault for FileVault {
    async fn resolve(&self, subject_id: &str, username: &str) -> Result<Option<Credential>, DeployError> {
        let credential = Credential {
            username: username.to_string(),
            password: self.get(&password_account(subject_id, username)).await,
            passphrase: self.get(&passphrase_account(subject_id)).await,
        };
        if credential.is_empty() {
            Ok(None)
        } else {
            Ok(Some(credential))
        }
    }
}
