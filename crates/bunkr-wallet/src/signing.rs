//! Remote signing through the vault.
//!
//! One `sign-ecdsa` request per input, at most `max_concurrent` in flight.
//! Every request is sent exactly once; a failure anywhere fails the batch and
//! no signatures are returned. Results come back low-s normalized and in
//! input order.

use std::sync::Arc;
use tracing::{debug, warn};

use bunkr_core::crypto::Signature;
use bunkr_core::traits::Vault;

use crate::error::WalletError;
use crate::fanout::{self, FanOutError};

/// Default number of sign requests in flight.
pub const DEFAULT_MAX_CONCURRENT_SIGNS: usize = 4;

pub struct SigningCoordinator {
    vault: Arc<dyn Vault>,
    max_concurrent: usize,
}

impl SigningCoordinator {
    pub fn new(vault: Arc<dyn Vault>, max_concurrent: usize) -> Self {
        Self {
            vault,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Sign `hashes[i]` with secret `secret_references[i]` for every `i`.
    pub async fn sign_batch(
        &self,
        secret_references: &[String],
        hashes: &[[u8; 32]],
    ) -> Result<Vec<Signature>, WalletError> {
        if secret_references.len() != hashes.len() {
            return Err(WalletError::ProtocolMismatch(format!(
                "{} secret references for {} hashes",
                secret_references.len(),
                hashes.len()
            )));
        }
        let requests: Vec<(String, [u8; 32])> = secret_references
            .iter()
            .cloned()
            .zip(hashes.iter().copied())
            .collect();
        debug!(inputs = requests.len(), limit = self.max_concurrent, "signing: batch start");

        let signatures = fanout::indexed(requests, self.max_concurrent, |(id, hash)| {
            let vault = Arc::clone(&self.vault);
            async move { vault.sign_hash(&id, hash).await }
        })
        .await
        .map_err(|e| match e {
            FanOutError::Failed(index, cause) => {
                warn!(index, error = %cause, "signing: vault refused input");
                WalletError::SigningFailed { index, cause }
            }
            FanOutError::Lost(index) => {
                WalletError::ProtocolMismatch(format!("sign request {index} did not complete"))
            }
        })?;

        Ok(signatures.into_iter().map(Self::normalize).collect())
    }

    /// Low-s form of `sig`.
    pub fn normalize(sig: Signature) -> Signature {
        sig.normalize()
    }

    /// Strict DER encoding of `sig`.
    pub fn to_der(sig: &Signature) -> Vec<u8> {
        sig.to_der()
    }

    /// Inverse of [`SigningCoordinator::to_der`].
    pub fn parse_der(der: &[u8]) -> Result<Signature, WalletError> {
        Ok(Signature::from_der(der)?)
    }
}
