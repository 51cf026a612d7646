//! # bunkr-core
//! Bitcoin primitives and collaborator traits for the Bunkr wallet.
//!
//! Nothing in this crate touches a private key after it has been generated:
//! signatures arrive from a [`traits::Vault`], chain data from a
//! [`traits::Explorer`].

pub mod address;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod traits;
pub mod types;
