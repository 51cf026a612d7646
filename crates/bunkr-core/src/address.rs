//! Base58Check and P2PKH addresses.
//!
//! An address is `Base58Check(version ‖ HASH160(pubkey))`:
//! - Mainnet: version `0x00`, addresses start with `1`
//! - Testnet: version `0x6F`, addresses start with `m` or `n`
//!
//! The 4-byte checksum is the head of `SHA256(SHA256(version ‖ hash))`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{P2PKH_VERSION_MAINNET, P2PKH_VERSION_TESTNET};
use crate::crypto::{PublicKey, double_sha256};
use crate::error::AddressError;
use crate::types::p2pkh_script;

const CHECKSUM_LEN: usize = 4;

/// Bitcoin network, selecting the address version byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// P2PKH version byte for this network.
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            Network::Mainnet => P2PKH_VERSION_MAINNET,
            Network::Testnet => P2PKH_VERSION_TESTNET,
        }
    }

    pub fn from_p2pkh_version(version: u8) -> Result<Self, AddressError> {
        match version {
            P2PKH_VERSION_MAINNET => Ok(Network::Mainnet),
            P2PKH_VERSION_TESTNET => Ok(Network::Testnet),
            other => Err(AddressError::InvalidVersion(other)),
        }
    }

    /// Tag stored in the wallet file header.
    pub fn wallet_tag(&self) -> &'static str {
        match self {
            Network::Mainnet => "BTC",
            Network::Testnet => "BTCTEST",
        }
    }

    pub fn from_wallet_tag(tag: &str) -> Result<Self, AddressError> {
        match tag {
            "BTC" => Ok(Network::Mainnet),
            "BTCTEST" => Ok(Network::Testnet),
            _ => Err(AddressError::UnknownNetwork(tag.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        })
    }
}

impl FromStr for Network {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" | "btc" => Ok(Network::Mainnet),
            "test" | "testnet" | "btctest" => Ok(Network::Testnet),
            _ => Err(AddressError::UnknownNetwork(s.to_string())),
        }
    }
}

/// Append the double-SHA-256 checksum and encode in base 58.
///
/// Each leading zero byte of `payload` becomes a leading `'1'`.
pub fn base58check_encode(payload: &[u8]) -> String {
    let checksum = double_sha256(payload);
    let mut data = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    bs58::encode(data).into_string()
}

/// Decode a Base58Check string and verify its checksum, returning the payload.
pub fn base58check_decode(s: &str) -> Result<Vec<u8>, AddressError> {
    let mut data = bs58::decode(s).into_vec().map_err(|e| match e {
        bs58::decode::Error::InvalidCharacter { character, .. } => {
            AddressError::InvalidCharacter(character)
        }
        bs58::decode::Error::NonAsciiCharacter { index } => {
            AddressError::InvalidCharacter(
                s.get(index..).and_then(|t| t.chars().next()).unwrap_or('?'),
            )
        }
        _ => AddressError::InvalidLength,
    })?;
    if data.len() < CHECKSUM_LEN {
        return Err(AddressError::InvalidLength);
    }
    let checksum = data.split_off(data.len() - CHECKSUM_LEN);
    if double_sha256(&data)[..CHECKSUM_LEN] != checksum[..] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(data)
}

/// A pay-to-pubkey-hash address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    pubkey_hash: [u8; 20],
}

impl Address {
    pub fn from_pubkey_hash(pubkey_hash: [u8; 20], network: Network) -> Self {
        Self {
            network,
            pubkey_hash,
        }
    }

    pub fn from_public_key(public_key: &PublicKey, network: Network) -> Self {
        Self::from_pubkey_hash(public_key.pubkey_hash(), network)
    }

    pub fn pubkey_hash(&self) -> &[u8; 20] {
        &self.pubkey_hash
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`.
    pub fn script_pubkey(&self) -> Vec<u8> {
        p2pkh_script(&self.pubkey_hash)
    }

    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(21);
        payload.push(self.network.p2pkh_version());
        payload.extend_from_slice(&self.pubkey_hash);
        base58check_encode(&payload)
    }

    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let payload = base58check_decode(s)?;
        let (&version, hash) = payload.split_first().ok_or(AddressError::InvalidLength)?;
        let network = Network::from_p2pkh_version(version)?;
        let pubkey_hash: [u8; 20] = hash.try_into().map_err(|_| AddressError::InvalidLength)?;
        Ok(Self {
            network,
            pubkey_hash,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}
