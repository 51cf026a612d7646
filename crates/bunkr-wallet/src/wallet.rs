//! Wallet data model and high-level operations.
//!
//! [`WalletRecord`] is what gets persisted: a name, a network, the time of
//! the last status refresh, and the ordered accounts. [`Wallet`] pairs a
//! record with the vault, explorer and store it talks to and exposes the
//! user-facing operations: account creation, balances, receive addresses,
//! and the send pipeline
//!
//! ```text
//! validate → select funding → select change → build unsigned
//!          → sighashes → vault sign batch → verify + assemble → (broadcast)
//! ```
//!
//! Every local check runs before the first remote call.

use std::fmt;
use std::sync::Arc;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bunkr_core::address::{Address, Network};
use bunkr_core::crypto::PublicKey;
use bunkr_core::traits::{BroadcastReceipt, Explorer, SecretKind, Vault};

use crate::builder::{SignedTransaction, TransactionBuilder, assemble_signed, compute_sighashes};
use crate::coin_selection::{SelectorConfig, UtxoSelector};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::keys::{GeneratedKey, KeyManager};
use crate::signing::SigningCoordinator;
use crate::store::{WalletStore, validate_wallet_name};

/// Lifecycle of an account. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Never received anything.
    #[serde(rename = "fresh")]
    Fresh,
    /// Holds unspent outputs, or spent them less than six confirmations ago.
    #[serde(rename = "in use")]
    InUse,
    /// Everything it received was spent at least six confirmations deep.
    #[serde(rename = "used")]
    Used,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Fresh => "fresh",
            AccountStatus::InUse => "in use",
            AccountStatus::Used => "used",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One single-key P2PKH account whose secret lives in the vault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    #[serde(rename = "pubkey_hex")]
    pub public_key_hex: String,
    /// Vault secret name; equal to the address.
    #[serde(rename = "secret_name")]
    pub secret_reference: String,
    pub status: AccountStatus,
}

impl Account {
    /// A fresh account for a newly generated key.
    pub fn fresh(key: &GeneratedKey) -> Self {
        Self {
            address: key.address().to_string(),
            public_key_hex: key.public_key_hex(),
            secret_reference: key.address().to_string(),
            status: AccountStatus::Fresh,
        }
    }

    pub fn public_key(&self) -> Result<PublicKey, WalletError> {
        Ok(PublicKey::from_hex(&self.public_key_hex)?)
    }
}

/// Persisted wallet state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletRecord {
    pub name: String,
    pub network: Network,
    /// Unix seconds of the last status refresh.
    pub last_update_time: i64,
    pub accounts: Vec<Account>,
}

impl WalletRecord {
    pub fn new(name: impl Into<String>, network: Network, last_update_time: i64) -> Self {
        Self {
            name: name.into(),
            network,
            last_update_time,
            accounts: Vec::new(),
        }
    }

    pub fn account(&self, address: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.address == address)
    }

    fn account_mut(&mut self, address: &str) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.address == address)
    }
}

/// The remote collaborators and storage a wallet runs against.
#[derive(Clone)]
pub struct Backends {
    pub vault: Arc<dyn Vault>,
    pub explorer: Arc<dyn Explorer>,
    pub store: Arc<dyn WalletStore>,
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// An open wallet.
pub struct Wallet {
    record: WalletRecord,
    vault: Arc<dyn Vault>,
    store: Arc<dyn WalletStore>,
    keys: KeyManager,
    selector: UtxoSelector,
    signer: SigningCoordinator,
    refresh_interval_secs: u64,
}

impl Wallet {
    fn from_record(record: WalletRecord, backends: Backends, config: &WalletConfig) -> Self {
        let keys = if config.compressed_keys {
            KeyManager::new(record.network)
        } else {
            KeyManager::uncompressed(record.network)
        };
        let selector = UtxoSelector::new(
            backends.explorer,
            SelectorConfig {
                max_concurrent_queries: config.max_concurrent_requests,
            },
        );
        Self {
            record,
            signer: SigningCoordinator::new(Arc::clone(&backends.vault), config.max_concurrent_requests),
            vault: backends.vault,
            store: backends.store,
            keys,
            selector,
            refresh_interval_secs: config.refresh_interval_secs,
        }
    }

    /// Create wallet `name` with `config.initial_accounts` accounts, each
    /// registered with the vault and granted to the wallet group.
    pub async fn create(
        name: &str,
        network: Network,
        backends: Backends,
        config: &WalletConfig,
    ) -> Result<Self, WalletError> {
        validate_wallet_name(name)?;
        if backends.store.load(name)?.is_some() {
            return Err(WalletError::WalletExists(name.to_string()));
        }
        if let Err(e) = backends.vault.new_group(name).await {
            // An existing group is fine; an unreachable vault fails on the first account.
            warn!(wallet = %name, error = %e, "wallet: new-group failed");
        }

        let record = WalletRecord::new(name, network, now_secs());
        let mut wallet = Self::from_record(record, backends, config);
        // Nothing is stored until the first account is registered.
        wallet.append_accounts(config.initial_accounts).await?;
        info!(wallet = %name, %network, accounts = wallet.record.accounts.len(), "wallet: created");
        Ok(wallet)
    }

    /// Load an existing wallet, refreshing account statuses when stale.
    pub async fn load(name: &str, backends: Backends, config: &WalletConfig) -> Result<Self, WalletError> {
        let record = backends
            .store
            .load(name)?
            .ok_or_else(|| WalletError::WalletNotFound(name.to_string()))?;
        let mut wallet = Self::from_record(record, backends, config);
        wallet.refresh_if_stale(now_secs()).await;
        Ok(wallet)
    }

    /// Load wallet `name`, creating it on `network` if it does not exist.
    pub async fn open(
        name: &str,
        network: Network,
        backends: Backends,
        config: &WalletConfig,
    ) -> Result<Self, WalletError> {
        match backends.store.load(name)? {
            Some(record) if record.network != network => Err(WalletError::NetworkMismatch {
                wallet: name.to_string(),
                stored: record.network,
                requested: network,
            }),
            Some(_) => Self::load(name, backends, config).await,
            None => Self::create(name, network, backends, config).await,
        }
    }

    /// Replace the shuffle RNG, e.g. with a seeded `StdRng` in tests.
    pub fn with_rng<R: RngCore + Send + Sync + 'static>(mut self, rng: R) -> Self {
        self.selector.set_rng(rng);
        self
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn network(&self) -> Network {
        self.record.network
    }

    pub fn record(&self) -> &WalletRecord {
        &self.record
    }

    pub fn accounts(&self) -> &[Account] {
        &self.record.accounts
    }

    pub fn persist(&self) -> Result<(), WalletError> {
        self.store.persist(&self.record)
    }

    /// Generate `n` keys, register each with the vault, and persist.
    ///
    /// Per key: `create`, `write` the scalar, `grant` it to the wallet group.
    /// If the vault fails partway, the accounts registered so far are kept
    /// and persisted before the error is returned. Returns the new addresses.
    pub async fn append_accounts(&mut self, n: usize) -> Result<Vec<String>, WalletError> {
        let mut added = Vec::with_capacity(n);
        for _ in 0..n {
            let outcome = match self.keys.generate_keypair() {
                Ok(key) => self.register(&key).await.map(|()| key),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(key) => {
                    let account = Account::fresh(&key);
                    debug!(wallet = %self.record.name, address = %account.address, "wallet: account registered");
                    added.push(account.address.clone());
                    self.record.accounts.push(account);
                }
                Err(e) => {
                    if !added.is_empty() {
                        self.persist()?;
                    }
                    return Err(e);
                }
            }
        }
        self.persist()?;
        Ok(added)
    }

    async fn register(&self, key: &GeneratedKey) -> Result<(), WalletError> {
        let id = key.address();
        self.vault
            .create_secret(id, SecretKind::EcdsaSecp256k1)
            .await
            .map_err(WalletError::VaultOperationFailed)?;
        let content = key.secret_content();
        let written = async {
            self.vault.write_secret(id, &content).await?;
            self.vault.grant_capability(&self.record.name, id, false).await
        }
        .await;
        if let Err(e) = written {
            if let Err(cleanup) = self.vault.delete_secret(id).await {
                warn!(address = %id, error = %cleanup, "wallet: could not delete half-registered secret");
            }
            return Err(WalletError::VaultOperationFailed(e));
        }
        Ok(())
    }

    /// Drop an account: delete its vault secret, then remove it locally.
    ///
    /// A vault failure is logged and the local removal still happens.
    pub async fn delete_account(&mut self, address: &str) -> Result<Account, WalletError> {
        let index = self
            .record
            .accounts
            .iter()
            .position(|a| a.address == address)
            .ok_or_else(|| WalletError::UnknownAccount(address.to_string()))?;
        let secret = self.record.accounts[index].secret_reference.clone();
        if let Err(e) = self.vault.delete_secret(&secret).await {
            warn!(wallet = %self.record.name, %address, error = %e, "wallet: vault delete failed, removing locally");
        }
        let removed = self.record.accounts.remove(index);
        self.persist()?;
        info!(wallet = %self.record.name, %address, "wallet: account deleted");
        Ok(removed)
    }

    async fn refresh_if_stale(&mut self, now: i64) {
        let age = now.saturating_sub(self.record.last_update_time);
        if age <= i64::try_from(self.refresh_interval_secs).unwrap_or(i64::MAX) {
            return;
        }
        debug!(wallet = %self.record.name, age, "wallet: statuses stale");
        if let Err(e) = self.refresh_status_at(now).await {
            warn!(wallet = %self.record.name, error = %e, "wallet: status refresh failed, keeping stored statuses");
        }
    }

    /// Re-derive every account status from the explorer and persist.
    pub async fn refresh_status(&mut self) -> Result<(), WalletError> {
        self.refresh_status_at(now_secs()).await
    }

    async fn refresh_status_at(&mut self, now: i64) -> Result<(), WalletError> {
        self.selector.refresh_status(&mut self.record, now).await?;
        self.persist()
    }

    /// Total unspent balance in satoshis.
    pub async fn balance(&self) -> Result<u64, WalletError> {
        let balances = self.selector.balances(&self.record.accounts).await?;
        Ok(balances.iter().fold(0u64, |acc, (_, v)| acc.saturating_add(*v)))
    }

    /// Unspent balance of every account that has one, in wallet order.
    pub async fn address_balances(&self) -> Result<Vec<(String, u64)>, WalletError> {
        let balances = self.selector.balances(&self.record.accounts).await?;
        Ok(balances.into_iter().filter(|(_, v)| *v > 0).collect())
    }

    /// A randomly chosen address that has never received anything.
    pub async fn fresh_address(&mut self) -> Result<String, WalletError> {
        let account = self.selector.select_change_account(&self.record.accounts).await?;
        Ok(account.address)
    }

    fn builder_for(&self, recipients: &[(String, u64)], fee: u64) -> Result<TransactionBuilder, WalletError> {
        let mut builder = TransactionBuilder::new();
        for (address, amount) in recipients {
            let parsed = Address::decode(address)?;
            if parsed.network() != self.record.network {
                return Err(WalletError::InvalidAddress(format!(
                    "{address} is a {} address, wallet is on {}",
                    parsed.network(),
                    self.record.network
                )));
            }
            builder.add_recipient(parsed, *amount);
        }
        builder.set_fee(fee);
        builder.target()?;
        Ok(builder)
    }

    /// Build and vault-sign a transaction paying `recipients` with `fee`.
    ///
    /// Returns the signed transaction without broadcasting it. Nothing is
    /// persisted.
    pub async fn send(&mut self, recipients: &[(String, u64)], fee: u64) -> Result<SignedTransaction, WalletError> {
        self.prepare(recipients, fee).await.map(|(signed, _)| signed)
    }

    async fn prepare(
        &mut self,
        recipients: &[(String, u64)],
        fee: u64,
    ) -> Result<(SignedTransaction, Vec<String>), WalletError> {
        let builder = self.builder_for(recipients, fee)?;
        let target = builder.target()?;

        let funding = self
            .selector
            .select_funding_accounts(&self.record.accounts, target)
            .await?;
        let change = self.selector.select_change_account(&self.record.accounts).await?;
        let unsigned = builder.build_unsigned(&funding, &change)?;

        let mut public_keys = Vec::with_capacity(unsigned.input_addresses.len());
        let mut secret_references = Vec::with_capacity(unsigned.input_addresses.len());
        for address in &unsigned.input_addresses {
            let account = self
                .record
                .account(address)
                .ok_or_else(|| WalletError::UnknownAccount(address.clone()))?;
            public_keys.push(account.public_key()?);
            secret_references.push(account.secret_reference.clone());
        }

        let hashes = compute_sighashes(&unsigned, &public_keys)?;
        let signatures = self.signer.sign_batch(&secret_references, &hashes).await?;
        let signed = assemble_signed(&unsigned, &public_keys, &signatures)?;
        info!(
            wallet = %self.record.name,
            txid = %signed.txid(),
            inputs = unsigned.tx.inputs.len(),
            outputs = unsigned.tx.outputs.len(),
            fee,
            change = unsigned.change,
            "wallet: transaction signed"
        );

        let mut touched: Vec<String> = funding.into_iter().map(|f| f.account.address).collect();
        if unsigned.change > 0 {
            touched.push(change.address);
        }
        Ok((signed, touched))
    }

    /// [`Wallet::send`], then push the transaction through the explorer.
    ///
    /// On success the spending and change accounts are marked in use and the
    /// wallet is persisted.
    pub async fn send_and_broadcast(
        &mut self,
        recipients: &[(String, u64)],
        fee: u64,
    ) -> Result<BroadcastReceipt, WalletError> {
        let (signed, touched) = self.prepare(recipients, fee).await?;
        let receipt = self.selector.explorer().broadcast(&signed.to_hex()).await?;
        let txid = signed.txid().to_string();
        if receipt.txid != txid {
            warn!(ours = %txid, theirs = %receipt.txid, "wallet: explorer reported a different txid");
        }
        for address in &touched {
            if let Some(account) = self.record.account_mut(address) {
                account.status = account.status.max(AccountStatus::InUse);
            }
        }
        self.persist()?;
        info!(wallet = %self.record.name, %txid, "wallet: transaction broadcast");
        Ok(receipt)
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("name", &self.record.name)
            .field("network", &self.record.network)
            .field("accounts", &self.record.accounts.len())
            .finish()
    }
}
