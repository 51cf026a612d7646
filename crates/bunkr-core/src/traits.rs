//! Trait interfaces for the wallet's remote collaborators.
//!
//! - [`Vault`]: secret custody and signing (bunkr-rpc `BunkrClient` implements)
//! - [`Explorer`]: address history and broadcast (bunkr-rpc `BlockCypherClient` implements)
//!
//! Both are asynchronous and object safe so the wallet can hold them as
//! `Arc<dyn Vault>` / `Arc<dyn Explorer>` and fan requests out across tasks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::Signature;
use crate::error::{ExplorerError, VaultError};
use crate::types::{SpentOutput, Utxo};

/// Kind of secret the vault should create.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretKind {
    EcdsaSecp256k1,
}

impl SecretKind {
    /// Name the vault uses for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::EcdsaSecp256k1 => "ECDSA-SECP256k1",
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One command sent to the vault.
#[derive(Clone, PartialEq, Eq)]
pub enum VaultRequest {
    CreateSecret { id: String, kind: SecretKind },
    /// `content` is the base64 secret material; never logged.
    WriteSecret { id: String, content: String },
    GrantCapability { target: String, id: String, admin: bool },
    SignHash { id: String, hash: [u8; 32] },
    DeleteSecret { id: String },
    NewGroup { name: String },
}

impl VaultRequest {
    /// Short command name for logs.
    pub fn command(&self) -> &'static str {
        match self {
            VaultRequest::CreateSecret { .. } => "create",
            VaultRequest::WriteSecret { .. } => "write",
            VaultRequest::GrantCapability { .. } => "grant",
            VaultRequest::SignHash { .. } => "sign-ecdsa",
            VaultRequest::DeleteSecret { .. } => "delete",
            VaultRequest::NewGroup { .. } => "new-group",
        }
    }
}

impl fmt::Debug for VaultRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultRequest::WriteSecret { id, .. } => f
                .debug_struct("WriteSecret")
                .field("id", id)
                .finish_non_exhaustive(),
            VaultRequest::CreateSecret { id, kind } => f
                .debug_struct("CreateSecret")
                .field("id", id)
                .field("kind", kind)
                .finish(),
            VaultRequest::GrantCapability { target, id, admin } => f
                .debug_struct("GrantCapability")
                .field("target", target)
                .field("id", id)
                .field("admin", admin)
                .finish(),
            VaultRequest::SignHash { id, hash } => f
                .debug_struct("SignHash")
                .field("id", id)
                .field("hash", &hex::encode(hash))
                .finish(),
            VaultRequest::DeleteSecret { id } => {
                f.debug_struct("DeleteSecret").field("id", id).finish()
            }
            VaultRequest::NewGroup { name } => {
                f.debug_struct("NewGroup").field("name", name).finish()
            }
        }
    }
}

/// The vault's answer to a [`VaultRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VaultResponse {
    /// Command accepted; carries the vault's informational message.
    Ack(String),
    Signature(Signature),
}

/// Remote secret custody.
///
/// Implementors execute one request per call and never retry on their own;
/// the caller decides whether a [`VaultError::Transport`] is worth repeating.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn execute(&self, request: VaultRequest) -> Result<VaultResponse, VaultError>;

    async fn create_secret(&self, id: &str, kind: SecretKind) -> Result<(), VaultError> {
        self.execute(VaultRequest::CreateSecret {
            id: id.to_string(),
            kind,
        })
        .await
        .map(drop)
    }

    async fn write_secret(&self, id: &str, content: &str) -> Result<(), VaultError> {
        self.execute(VaultRequest::WriteSecret {
            id: id.to_string(),
            content: content.to_string(),
        })
        .await
        .map(drop)
    }

    async fn grant_capability(&self, target: &str, id: &str, admin: bool) -> Result<(), VaultError> {
        self.execute(VaultRequest::GrantCapability {
            target: target.to_string(),
            id: id.to_string(),
            admin,
        })
        .await
        .map(drop)
    }

    /// Sign a 32-byte digest with the secret `id`.
    async fn sign_hash(&self, id: &str, hash: [u8; 32]) -> Result<Signature, VaultError> {
        match self
            .execute(VaultRequest::SignHash {
                id: id.to_string(),
                hash,
            })
            .await?
        {
            VaultResponse::Signature(sig) => Ok(sig),
            VaultResponse::Ack(msg) => Err(VaultError::MalformedResponse(format!(
                "expected signature, got acknowledgement: {msg}"
            ))),
        }
    }

    async fn delete_secret(&self, id: &str) -> Result<(), VaultError> {
        self.execute(VaultRequest::DeleteSecret { id: id.to_string() })
            .await
            .map(drop)
    }

    async fn new_group(&self, name: &str) -> Result<(), VaultError> {
        self.execute(VaultRequest::NewGroup {
            name: name.to_string(),
        })
        .await
        .map(drop)
    }
}

/// Result of a successful broadcast.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BroadcastReceipt {
    /// Transaction id as reported by the explorer (display hex).
    pub txid: String,
}

/// Read-only chain data plus transaction relay.
#[async_trait]
pub trait Explorer: Send + Sync {
    /// Unspent outputs paying `address`, in explorer order.
    async fn get_unspent(&self, address: &str) -> Result<Vec<Utxo>, ExplorerError>;

    /// Outputs once paid to `address` that have since been spent.
    async fn get_spent(&self, address: &str) -> Result<Vec<SpentOutput>, ExplorerError>;

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<BroadcastReceipt, ExplorerError>;
}
