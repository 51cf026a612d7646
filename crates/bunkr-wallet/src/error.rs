//! Wallet error types.

use bunkr_core::address::Network;
use bunkr_core::error::{AddressError, CryptoError, ExplorerError, TransactionError, VaultError};
use thiserror::Error;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// A Base58Check string failed its checksum.
    #[error("invalid checksum")]
    InvalidChecksum,

    /// Address string is not a P2PKH address this wallet understands.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid monetary amount (zero output, overflow).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The funding scan ran out of accounts before reaching the target.
    #[error("insufficient funds: need {needed}, available {available}")]
    InsufficientFunds {
        /// Outputs plus fee, in satoshis.
        needed: u64,
        /// Sum of every unspent output seen during the scan.
        available: u64,
    },

    /// No account without history is left to receive change.
    #[error("no unused account left for change")]
    AccountExhausted,

    /// The vault failed to sign input `index`; nothing was assembled.
    #[error("signing input {index} failed: {cause}")]
    SigningFailed { index: usize, cause: VaultError },

    /// Two pieces of data that must line up did not.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Any vault command other than signing failed.
    #[error("vault operation failed: {0}")]
    VaultOperationFailed(VaultError),

    /// Reading or writing the wallet file failed.
    #[error("persistence: {0}")]
    PersistenceError(String),

    #[error("explorer: {0}")]
    Explorer(#[from] ExplorerError),

    /// Address is not one of this wallet's accounts.
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("wallet already exists: {0}")]
    WalletExists(String),

    /// An existing wallet was opened for the other network.
    #[error("wallet {wallet} is a {stored} wallet, not {requested}")]
    NetworkMismatch {
        wallet: String,
        stored: Network,
        requested: Network,
    },

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    /// Wallet names become file names and vault group names.
    #[error("invalid wallet name: {0}")]
    InvalidWalletName(String),

    /// Key generation never produced an address that decodes back to itself.
    #[error("key generation: {0}")]
    KeyGeneration(String),

    #[error("config: {0}")]
    Config(String),

    /// Cryptographic error from bunkr-core.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Transaction encoding error from bunkr-core.
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl WalletError {
    /// True only for transport-level failures that happened before the remote
    /// side acted on the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            WalletError::Explorer(e) => e.is_retryable(),
            WalletError::VaultOperationFailed(e) => e.is_retryable(),
            WalletError::SigningFailed { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }
}

impl From<AddressError> for WalletError {
    fn from(e: AddressError) -> Self {
        match e {
            AddressError::InvalidChecksum => WalletError::InvalidChecksum,
            other => WalletError::InvalidAddress(other.to_string()),
        }
    }
}

impl From<VaultError> for WalletError {
    fn from(e: VaultError) -> Self {
        WalletError::VaultOperationFailed(e)
    }
}
