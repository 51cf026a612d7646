//! Wallet persistence.
//!
//! A wallet file is a JSON array whose first element is a header and whose
//! remaining elements are the accounts, in wallet order:
//!
//! ```text
//! [{"NETWORK": "BTC" | "BTCTEST", "LAST_UPDATE_TIME": "<unix secs>"},
//!  {"address": ..., "pubkey_hex": ..., "secret_name": ..., "status": "fresh" | "in use" | "used"},
//!  ...]
//! ```
//!
//! [`JsonFileStore`] keeps one `<name>.json` per wallet and replaces files
//! atomically (write to a sibling temp file, fsync, rename).

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use bunkr_core::address::Network;

use crate::error::WalletError;
use crate::wallet::{Account, WalletRecord};

const WALLET_FILE_EXTENSION: &str = "json";
const MAX_WALLET_NAME_LEN: usize = 64;

/// Durable storage for wallet records.
///
/// `persist` replaces the whole record; a reader never observes a partially
/// written wallet.
pub trait WalletStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<WalletRecord>, WalletError>;
    fn persist(&self, wallet: &WalletRecord) -> Result<(), WalletError>;
    /// `WalletNotFound` if there is nothing to remove.
    fn remove(&self, name: &str) -> Result<(), WalletError>;
    /// Stored wallet names, sorted.
    fn list(&self) -> Result<Vec<String>, WalletError>;
}

/// Wallet names end up in file names and in vault command lines, so they are
/// limited to ASCII letters, digits, `-`, `_` and `.`, and may not start
/// with a dot.
pub fn validate_wallet_name(name: &str) -> Result<(), WalletError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_WALLET_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(WalletError::InvalidWalletName(name.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct FileHeader {
    #[serde(rename = "NETWORK")]
    network: String,
    #[serde(rename = "LAST_UPDATE_TIME")]
    last_update_time: String,
}

/// Serialize `wallet` in the wallet file format.
pub fn encode_wallet(wallet: &WalletRecord) -> Result<Vec<u8>, WalletError> {
    let header = FileHeader {
        network: wallet.network.wallet_tag().to_string(),
        last_update_time: wallet.last_update_time.to_string(),
    };
    let mut entries = Vec::with_capacity(wallet.accounts.len() + 1);
    entries.push(serde_json::to_value(&header).map_err(persistence)?);
    for account in &wallet.accounts {
        entries.push(serde_json::to_value(account).map_err(persistence)?);
    }
    serde_json::to_vec(&Value::Array(entries)).map_err(persistence)
}

/// Parse a wallet file; `name` is not stored in the file itself.
pub fn decode_wallet(name: &str, bytes: &[u8]) -> Result<WalletRecord, WalletError> {
    let entries: Vec<Value> = serde_json::from_slice(bytes).map_err(persistence)?;
    let mut entries = entries.into_iter();
    let header = entries
        .next()
        .ok_or_else(|| WalletError::PersistenceError(format!("{name}: empty wallet file")))?;
    let header: FileHeader = serde_json::from_value(header).map_err(persistence)?;
    let network = Network::from_wallet_tag(&header.network)
        .map_err(|e| WalletError::PersistenceError(format!("{name}: {e}")))?;
    let last_update_time: i64 = header.last_update_time.trim().parse().map_err(|_| {
        WalletError::PersistenceError(format!(
            "{name}: bad LAST_UPDATE_TIME {:?}",
            header.last_update_time
        ))
    })?;
    let accounts = entries
        .map(serde_json::from_value::<Account>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(persistence)?;

    let mut record = WalletRecord::new(name, network, last_update_time);
    record.accounts = accounts;
    Ok(record)
}

fn persistence(e: impl std::fmt::Display) -> WalletError {
    WalletError::PersistenceError(e.to_string())
}

fn io_error(path: &Path, e: io::Error) -> WalletError {
    WalletError::PersistenceError(format!("{}: {e}", path.display()))
}

/// One JSON file per wallet in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing wallet `name`.
    pub fn path_of(&self, name: &str) -> Result<PathBuf, WalletError> {
        validate_wallet_name(name)?;
        Ok(self.dir.join(format!("{name}.{WALLET_FILE_EXTENSION}")))
    }
}

/// Write `bytes` to `tmp`, flush it to disk, then move it over `path`.
fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> Result<(), WalletError> {
    let mut file = fs::File::create(tmp).map_err(|e| io_error(tmp, e))?;
    file.write_all(bytes).map_err(|e| io_error(tmp, e))?;
    file.sync_all().map_err(|e| io_error(tmp, e))?;
    drop(file);
    fs::rename(tmp, path).map_err(|e| io_error(path, e))
}

impl WalletStore for JsonFileStore {
    fn load(&self, name: &str) -> Result<Option<WalletRecord>, WalletError> {
        let path = self.path_of(name)?;
        match fs::read(&path) {
            Ok(bytes) => decode_wallet(name, &bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn persist(&self, wallet: &WalletRecord) -> Result<(), WalletError> {
        let path = self.path_of(&wallet.name)?;
        let bytes = encode_wallet(wallet)?;
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        let tmp = self.dir.join(format!(".{}.{WALLET_FILE_EXTENSION}.tmp", wallet.name));
        if let Err(e) = write_then_rename(&tmp, &path, &bytes) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %cleanup, "store: could not remove temp file");
                }
            }
            return Err(e);
        }
        debug!(wallet = %wallet.name, accounts = wallet.accounts.len(), path = %path.display(), "store: persisted");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), WalletError> {
        let path = self.path_of(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(WalletError::WalletNotFound(name.to_string()))
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn list(&self) -> Result<Vec<String>, WalletError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(WALLET_FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_wallet_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    wallets: Mutex<BTreeMap<String, WalletRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalletStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<WalletRecord>, WalletError> {
        Ok(self.wallets.lock().get(name).cloned())
    }

    fn persist(&self, wallet: &WalletRecord) -> Result<(), WalletError> {
        validate_wallet_name(&wallet.name)?;
        self.wallets.lock().insert(wallet.name.clone(), wallet.clone());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), WalletError> {
        self.wallets
            .lock()
            .remove(name)
            .map(drop)
            .ok_or_else(|| WalletError::WalletNotFound(name.to_string()))
    }

    fn list(&self) -> Result<Vec<String>, WalletError> {
        Ok(self.wallets.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::AccountStatus;

    fn sample() -> WalletRecord {
        let mut record = WalletRecord::new("savings", Network::Testnet, 1_700_000_000);
        record.accounts = vec![
            Account {
                address: "mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r".into(),
                public_key_hex: "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798".into(),
                secret_reference: "mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r".into(),
                status: AccountStatus::InUse,
            },
            Account {
                address: "n1".into(),
                public_key_hex: "02aa".into(),
                secret_reference: "n1".into(),
                status: AccountStatus::Fresh,
            },
        ];
        record
    }

    #[test]
    fn file_layout() {
        let bytes = encode_wallet(&sample()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let entries = value.as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["NETWORK"], "BTCTEST");
        assert_eq!(entries[0]["LAST_UPDATE_TIME"], "1700000000");
        assert_eq!(entries[1]["address"], "mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r");
        assert_eq!(entries[1]["secret_name"], "mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r");
        assert_eq!(entries[1]["status"], "in use");
        assert_eq!(entries[2]["status"], "fresh");
        assert!(entries[1].get("pubkey_hex").is_some());
    }

    #[test]
    fn decodes_file_written_by_older_wallets() {
        let raw = br#"[{"NETWORK": "BTC", "LAST_UPDATE_TIME": "1546300800"},
            {"address": "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH", "pubkey_hex": "02ab", "secret_name": "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH", "status": "used"}]"#;
        let record = decode_wallet("old", raw).unwrap();
        assert_eq!(record.name, "old");
        assert_eq!(record.network, Network::Mainnet);
        assert_eq!(record.last_update_time, 1_546_300_800);
        assert_eq!(record.accounts.len(), 1);
        assert_eq!(record.accounts[0].status, AccountStatus::Used);
    }

    #[test]
    fn decode_rejects_bad_files() {
        for raw in [
            &b"[]"[..],
            b"{}",
            br#"[{"NETWORK": "DOGE", "LAST_UPDATE_TIME": "1"}]"#,
            br#"[{"NETWORK": "BTC", "LAST_UPDATE_TIME": "yesterday"}]"#,
            br#"[{"NETWORK": "BTC", "LAST_UPDATE_TIME": "1"}, {"address": "x"}]"#,
            br#"[{"NETWORK": "BTC", "LAST_UPDATE_TIME": "1"}, {"address": "x", "pubkey_hex": "", "secret_name": "x", "status": "spent"}]"#,
        ] {
            assert!(
                matches!(decode_wallet("w", raw), Err(WalletError::PersistenceError(_))),
                "accepted {}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn wallet_names() {
        for ok in ["savings", "cold-2", "a_b.c", "X"] {
            assert!(validate_wallet_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", ".hidden", "a/b", "..", "with space", "quote\"", "n".repeat(65).as_str()] {
            assert!(validate_wallet_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("wallets"));
        assert_eq!(store.load("savings").unwrap(), None);
        assert!(store.list().unwrap().is_empty());

        let record = sample();
        store.persist(&record).unwrap();
        assert_eq!(store.load("savings").unwrap(), Some(record.clone()));
        assert!(store.path_of("savings").unwrap().exists());

        let mut updated = record;
        updated.accounts.pop();
        updated.last_update_time += 60;
        store.persist(&updated).unwrap();
        assert_eq!(store.load("savings").unwrap(), Some(updated));
    }

    #[test]
    fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        // A non-empty directory where the wallet file belongs blocks the rename.
        let target = store.path_of("savings").unwrap();
        fs::create_dir_all(target.join("occupied")).unwrap();

        let err = store.persist(&sample()).unwrap_err();
        assert!(matches!(err, WalletError::PersistenceError(_)));
        assert!(!dir.path().join(".savings.json.tmp").exists());
        assert!(target.join("occupied").is_dir());
    }

    #[test]
    fn json_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.persist(&sample()).unwrap();
        store.persist(&sample()).unwrap();
        let files: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, vec!["savings.json".to_string()]);
    }

    #[test]
    fn json_store_list_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        for name in ["zeta", "alpha"] {
            let mut record = sample();
            record.name = name.to_string();
            store.persist(&record).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        assert_eq!(store.list().unwrap(), vec!["alpha", "zeta"]);

        store.remove("alpha").unwrap();
        assert_eq!(store.list().unwrap(), vec!["zeta"]);
        assert_eq!(
            store.remove("alpha").unwrap_err(),
            WalletError::WalletNotFound("alpha".into())
        );
    }

    #[test]
    fn json_store_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(matches!(
            store.load("../escape"),
            Err(WalletError::InvalidWalletName(_))
        ));
    }

    #[test]
    fn corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        fs::write(dir.path().join("broken.json"), b"[{").unwrap();
        assert!(matches!(
            store.load("broken"),
            Err(WalletError::PersistenceError(_))
        ));
    }

    #[test]
    fn memory_store() {
        let store = MemoryStore::new();
        store.persist(&sample()).unwrap();
        assert_eq!(store.list().unwrap(), vec!["savings"]);
        assert_eq!(store.load("savings").unwrap(), Some(sample()));
        store.remove("savings").unwrap();
        assert_eq!(store.load("savings").unwrap(), None);
        assert!(store.remove("savings").is_err());
    }
}
