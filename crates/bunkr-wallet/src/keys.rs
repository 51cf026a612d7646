//! Transient key generation.
//!
//! Keys are created here, handed to the vault once, and dropped. Nothing in
//! this module persists a private scalar: [`GeneratedKey`] zeroizes on drop
//! and redacts itself in `Debug`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fmt;
use tracing::warn;
use zeroize::Zeroizing;

use bunkr_core::address::{Address, Network};
use bunkr_core::crypto::{KeyPair, PublicKey};

use crate::error::WalletError;

/// Generation is retried this many times if the derived address fails to
/// decode back to the same key hash.
pub const MAX_KEYGEN_ATTEMPTS: usize = 8;

/// A freshly generated keypair together with its address.
pub struct GeneratedKey {
    keypair: KeyPair,
    address: String,
}

impl GeneratedKey {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public_key()
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key().to_hex()
    }

    /// Base64 of the big-endian scalar with leading zeros stripped, the
    /// content written into the vault secret.
    pub fn secret_content(&self) -> Zeroizing<String> {
        Zeroizing::new(BASE64.encode(self.keypair.secret_bytes_minimal().as_slice()))
    }
}

impl fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("address", &self.address)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Generates P2PKH keys for one network.
#[derive(Clone, Copy, Debug)]
pub struct KeyManager {
    network: Network,
    compressed: bool,
}

impl KeyManager {
    /// Compressed public keys.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            compressed: true,
        }
    }

    /// Uncompressed (`04 ‖ x ‖ y`) public keys, for compatibility with older wallets.
    pub fn uncompressed(network: Network) -> Self {
        Self {
            network,
            compressed: false,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Draw a key from the OS RNG and check its address decodes back to it.
    pub fn generate_keypair(&self) -> Result<GeneratedKey, WalletError> {
        for attempt in 1..=MAX_KEYGEN_ATTEMPTS {
            let keypair = KeyPair::generate(self.compressed);
            let address = derive_address(keypair.public_key().as_bytes(), self.network)?;
            match Address::decode(&address) {
                Ok(decoded)
                    if decoded.network() == self.network
                        && decoded.pubkey_hash() == &keypair.public_key().pubkey_hash() =>
                {
                    return Ok(GeneratedKey { keypair, address });
                }
                Ok(_) => warn!(attempt, "keys: derived address decodes to a different key hash"),
                Err(e) => warn!(attempt, error = %e, "keys: derived address does not decode"),
            }
        }
        Err(WalletError::KeyGeneration(format!(
            "no valid address after {MAX_KEYGEN_ATTEMPTS} attempts"
        )))
    }
}

/// P2PKH address of a serialized public key.
pub fn derive_address(public_key: &[u8], network: Network) -> Result<String, WalletError> {
    let public_key = PublicKey::from_bytes(public_key)?;
    Ok(Address::from_public_key(&public_key, network).encode())
}
