//! Wallet configuration.
//!
//! [`WalletConfig`] has usable defaults for a local Bunkr daemon and the
//! public BlockCypher API. Every field can be overridden from the
//! environment with [`WalletConfig::from_env`].

use std::path::PathBuf;

use bunkr_core::constants::{INITIAL_ACCOUNTS, STATUS_REFRESH_INTERVAL_SECS};

use crate::error::WalletError;

/// Default Unix socket of the Bunkr daemon.
pub const DEFAULT_VAULT_SOCKET: &str = "/tmp/bunkr_daemon.sock";

/// Default explorer API root.
pub const DEFAULT_EXPLORER_URL: &str = "https://api.blockcypher.com/v1";

/// Default bound on concurrent vault and explorer requests.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
    /// Directory holding one `<name>.json` per wallet.
    pub data_dir: PathBuf,
    /// Bunkr daemon socket.
    pub vault_socket: PathBuf,
    /// Explorer API root, without the network path segment.
    pub explorer_url: String,
    /// Accounts generated when a wallet is created.
    pub initial_accounts: usize,
    /// Account statuses are refreshed on open when older than this.
    pub refresh_interval_secs: u64,
    pub max_concurrent_requests: usize,
    /// Generate compressed (33-byte) public keys.
    pub compressed_keys: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bunkr")
            .join(".BunkrWallet");

        Self {
            data_dir,
            vault_socket: PathBuf::from(DEFAULT_VAULT_SOCKET),
            explorer_url: DEFAULT_EXPLORER_URL.to_string(),
            initial_accounts: INITIAL_ACCOUNTS,
            refresh_interval_secs: STATUS_REFRESH_INTERVAL_SECS,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            compressed_keys: true,
        }
    }
}

impl WalletConfig {
    /// Defaults overridden by `BUNKR_*` environment variables.
    pub fn from_env() -> Result<Self, WalletError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `BUNKR_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WalletError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup("BUNKR_WALLET_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(socket) = lookup("BUNKR_SOCKET") {
            config.vault_socket = PathBuf::from(socket);
        }
        if let Some(url) = lookup("BUNKR_EXPLORER_URL") {
            config.explorer_url = url.trim_end_matches('/').to_string();
        }
        if let Some(n) = lookup("BUNKR_INITIAL_ACCOUNTS") {
            config.initial_accounts = parse_var("BUNKR_INITIAL_ACCOUNTS", &n)?;
        }
        if let Some(secs) = lookup("BUNKR_REFRESH_INTERVAL_SECS") {
            config.refresh_interval_secs = parse_var("BUNKR_REFRESH_INTERVAL_SECS", &secs)?;
        }
        if let Some(n) = lookup("BUNKR_MAX_CONCURRENT") {
            let n: usize = parse_var("BUNKR_MAX_CONCURRENT", &n)?;
            if n == 0 {
                return Err(WalletError::Config("BUNKR_MAX_CONCURRENT must be at least 1".into()));
            }
            config.max_concurrent_requests = n;
        }
        if let Some(flag) = lookup("BUNKR_UNCOMPRESSED_KEYS") {
            config.compressed_keys = !matches!(flag.as_str(), "1" | "true" | "yes");
        }
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, WalletError> {
    value
        .trim()
        .parse()
        .map_err(|_| WalletError::Config(format!("{key} must be a non-negative integer, got {value:?}")))
}
