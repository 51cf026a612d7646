//! # bunkr-rpc — Remote collaborators of the wallet.
//!
//! - [`vault::BunkrClient`] — JSON-RPC 1.0 client for the Bunkr daemon over its
//!   Unix socket, implementing [`bunkr_core::traits::Vault`]
//! - [`explorer::BlockCypherClient`] — HTTP client for the BlockCypher v1 API,
//!   implementing [`bunkr_core::traits::Explorer`]

pub mod explorer;
pub mod vault;

pub use explorer::BlockCypherClient;
pub use vault::BunkrClient;
