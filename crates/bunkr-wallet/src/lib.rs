//! # bunkr-wallet — vault-backed P2PKH wallet logic.
//!
//! Private keys exist here only between generation and the `write` that
//! hands them to the vault. Everything else (coin selection, transaction
//! assembly, sighashes) works from public data, and signatures come back
//! from the vault one input at a time.
//!
//! # Modules
//!
//! - [`error`] — `WalletError` enum
//! - [`config`] — `WalletConfig` defaults and environment overrides
//! - [`keys`] — transient key generation and address derivation
//! - [`coin_selection`] — randomized account-level funding and change selection
//! - [`builder`] — unsigned transactions, sighashes, signature assembly
//! - [`signing`] — bounded concurrent vault signing
//! - [`store`] — wallet file format and stores
//! - [`wallet`] — data model and high-level operations
//! - [`directory`] — multi-wallet manager

pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod directory;
pub mod error;
mod fanout;
pub mod keys;
pub mod signing;
pub mod store;
pub mod wallet;

// Re-exports for convenient access
pub use builder::{Recipient, SignedTransaction, TransactionBuilder, UnsignedTransaction};
pub use coin_selection::{FundingAccount, SelectorConfig, UtxoSelector};
pub use config::WalletConfig;
pub use directory::WalletDirectory;
pub use error::WalletError;
pub use keys::{GeneratedKey, KeyManager};
pub use signing::SigningCoordinator;
pub use store::{JsonFileStore, MemoryStore, WalletStore};
pub use wallet::{Account, AccountStatus, Backends, Wallet, WalletRecord};
