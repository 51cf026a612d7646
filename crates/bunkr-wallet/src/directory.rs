//! Multi-wallet manager.
//!
//! A [`WalletDirectory`] owns the store and the vault connection and hands
//! out [`Wallet`]s by value. The explorer is supplied per call because it is
//! network specific.

use std::sync::Arc;

use tracing::{info, warn};

use bunkr_core::address::Network;
use bunkr_core::traits::{Explorer, Vault};

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::store::WalletStore;
use crate::wallet::{Backends, Wallet};

pub struct WalletDirectory {
    store: Arc<dyn WalletStore>,
    vault: Arc<dyn Vault>,
    config: WalletConfig,
}

impl WalletDirectory {
    pub fn new(store: Arc<dyn WalletStore>, vault: Arc<dyn Vault>, config: WalletConfig) -> Self {
        Self { store, vault, config }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    fn backends(&self, explorer: Arc<dyn Explorer>) -> Backends {
        Backends {
            vault: Arc::clone(&self.vault),
            explorer,
            store: Arc::clone(&self.store),
        }
    }

    /// Names of every stored wallet, sorted.
    pub fn list(&self) -> Result<Vec<String>, WalletError> {
        self.store.list()
    }

    /// Network of a stored wallet, read without contacting anything remote.
    pub fn network_of(&self, name: &str) -> Result<Network, WalletError> {
        self.store
            .load(name)?
            .map(|record| record.network)
            .ok_or_else(|| WalletError::WalletNotFound(name.to_string()))
    }

    /// Create a new wallet. `WalletExists` if the name is taken.
    pub async fn create(
        &self,
        name: &str,
        network: Network,
        explorer: Arc<dyn Explorer>,
    ) -> Result<Wallet, WalletError> {
        Wallet::create(name, network, self.backends(explorer), &self.config).await
    }

    /// Open a stored wallet. `WalletNotFound` if there is none.
    pub async fn open(&self, name: &str, explorer: Arc<dyn Explorer>) -> Result<Wallet, WalletError> {
        Wallet::load(name, self.backends(explorer), &self.config).await
    }

    /// Delete every account secret and the wallet group from the vault, then
    /// the wallet file.
    ///
    /// Secrets the vault refuses to delete are logged and skipped. If the
    /// vault cannot be reached the file is kept so the deletion can be rerun.
    pub async fn delete(&self, name: &str) -> Result<(), WalletError> {
        let record = self
            .store
            .load(name)?
            .ok_or_else(|| WalletError::WalletNotFound(name.to_string()))?;

        let secrets = record
            .accounts
            .iter()
            .map(|a| a.secret_reference.as_str())
            .chain(std::iter::once(record.name.as_str()));
        for secret in secrets {
            match self.vault.delete_secret(secret).await {
                Ok(()) => {}
                Err(e) if e.is_retryable() => return Err(WalletError::VaultOperationFailed(e)),
                Err(e) => warn!(wallet = %name, %secret, error = %e, "directory: vault delete failed"),
            }
        }

        self.store.remove(name)?;
        info!(wallet = %name, accounts = record.accounts.len(), "directory: wallet deleted");
        Ok(())
    }
}
