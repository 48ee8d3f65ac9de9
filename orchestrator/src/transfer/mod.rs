//! Transfer driver: moves staged content to nodes and runs remote commands

pub mod ssh;

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use secrecy::SecretString;

use crate::errors::DeployError;
use crate::models::node::{AuthMethod, Node};
use crate::vault::{Credential, CredentialVault};

pub use ssh::OpenSshDriver;

/// One item of a remote command's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    Stdout(String),
    Stderr(String),
    /// Always the last event of a stream that completed normally
    Exit(i32),
}

/// Lazy, finite, non-restartable output of one remote command.
///
/// A stream that ends without an [`CommandEvent::Exit`] lost its session.
pub type CommandStream = BoxStream<'static, Result<CommandEvent, DeployError>>;

/// Authentication material for one remote session
#[derive(Debug, Clone, Default)]
pub struct SessionAuth {
    pub username: String,
    pub method: AuthMethod,
    pub key_path: String,
    pub credential: Option<Credential>,
}

impl SessionAuth {
    pub fn for_node(node: &Node, credential: Option<Credential>) -> Self {
        Self {
            username: node.login().to_string(),
            method: node.auth_method,
            key_path: node.key_path.trim().to_string(),
            credential,
        }
    }

    /// Look up the node's stored secret. Agent auth never consults the vault.
    pub async fn resolve(node: &Node, vault: &dyn CredentialVault) -> Result<Self, DeployError> {
        let credential = match node.auth_method {
            AuthMethod::Agent => None,
            _ => vault.resolve(&node.id, node.login()).await?,
        };
        Ok(Self::for_node(node, credential))
    }

    /// Secret handed to `sshpass`: the password for password auth, the key
    /// passphrase for key auth, nothing for agent auth.
    pub fn prompt_secret(&self) -> Option<&SecretString> {
        let credential = self.credential.as_ref()?;
        match self.method {
            AuthMethod::Password => credential.password.as_ref(),
            AuthMethod::Key => credential.passphrase.as_ref(),
            AuthMethod::Agent => None,
        }
    }
}

#[async_trait]
pub trait TransferDriver: Send + Sync {
    /// Copy the file or tree at `local` to `remote` on `node`. A file lands
    /// at exactly `remote`; a directory's contents land inside `remote`.
    async fn push(&self, node: &Node, local: &Path, remote: &str, auth: &SessionAuth) -> Result<(), DeployError>;

    /// Start `command` on `node` with `workdir` as working directory
    async fn exec(&self, node: &Node, workdir: &str, command: &str, auth: &SessionAuth)
        -> Result<CommandStream, DeployError>;
}
