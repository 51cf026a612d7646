//! Protocol constants. All monetary values in satoshis (1 BTC = 10^8 satoshis).

pub const COIN: u64 = 100_000_000;

/// Transaction version written into every transaction this wallet builds.
pub const TX_VERSION: i32 = 1;

/// Input sequence number; lock time is always zero so this disables nothing.
pub const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

/// Sign every input and every output.
pub const SIGHASH_ALL: u32 = 0x01;

/// Base58Check version byte for mainnet P2PKH addresses (`1...`).
pub const P2PKH_VERSION_MAINNET: u8 = 0x00;

/// Base58Check version byte for testnet P2PKH addresses (`m...`/`n...`).
pub const P2PKH_VERSION_TESTNET: u8 = 0x6F;

/// Confirmations a spending transaction needs before its address counts as used.
pub const USED_CONFIRMATIONS: u64 = 6;

/// Account status is refreshed on open when the last refresh is older than this.
pub const STATUS_REFRESH_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Accounts generated for a brand new wallet.
pub const INITIAL_ACCOUNTS: usize = 5;

/// Order of the secp256k1 group, big-endian.
pub const CURVE_ORDER: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE,
    0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36, 0x41, 0x41,
];

/// `CURVE_ORDER / 2`, rounded down. Signatures with `s` above this are high-s.
pub const HALF_CURVE_ORDER: [u8; 32] = [
    0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46, 0x68, 0x1B, 0x20, 0xA0,
];
