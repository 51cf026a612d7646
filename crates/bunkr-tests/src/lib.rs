//! Shared test doubles and end-to-end tests for the Bunkr wallet.
//!
//! [`helpers::FakeVault`] keeps the secrets it is given and signs with real
//! secp256k1, so transactions produced against it verify. It can also speak
//! the daemon's JSON-RPC protocol on a Unix socket, which lets the tests run
//! the real `BunkrClient` end to end.

pub mod helpers;
