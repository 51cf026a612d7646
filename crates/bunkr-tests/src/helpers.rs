//! Shared test helpers for E2E and integration tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use k256::ecdsa::SigningKey;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

use bunkr_core::address::{Address, Network};
use bunkr_core::constants::CURVE_ORDER;
use bunkr_core::crypto::{KeyPair, Signature};
use bunkr_core::error::{ExplorerError, VaultError};
use bunkr_core::traits::{BroadcastReceipt, Explorer, SecretKind, Vault, VaultRequest, VaultResponse};
use bunkr_core::types::{SpentOutput, Transaction, Txid, Utxo};
use bunkr_wallet::{Account, AccountStatus};

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// In-process vault holding real secp256k1 scalars.
#[derive(Default)]
pub struct FakeVault {
    secrets: Mutex<HashMap<String, [u8; 32]>>,
    groups: Mutex<Vec<String>>,
    grants: Mutex<Vec<(String, String)>>,
    log: Mutex<Vec<VaultRequest>>,
    refused_commands: Mutex<Vec<&'static str>>,
    refused_signers: Mutex<Vec<String>>,
    offline: AtomicBool,
    high_s: AtomicBool,
    signs: AtomicUsize,
}

impl FakeVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer every signature with `N - s` instead of the low `s`.
    pub fn sign_high_s(&self) {
        self.high_s.store(true, Ordering::SeqCst);
    }

    /// Refuse every request for `command` (`"create"`, `"grant"`, ...).
    pub fn refuse(&self, command: &'static str) {
        self.refused_commands.lock().push(command);
    }

    /// Refuse to sign with secret `id`.
    pub fn refuse_signing_with(&self, id: &str) {
        self.refused_signers.lock().push(id.to_string());
    }

    /// Fail every request as a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Store a secret directly, bypassing `create` / `write`.
    pub fn import(&self, id: &str, scalar: [u8; 32]) {
        self.secrets.lock().insert(id.to_string(), scalar);
    }

    pub fn holds(&self, id: &str) -> bool {
        self.secrets.lock().contains_key(id)
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.lock().len()
    }

    pub fn groups(&self) -> Vec<String> {
        self.groups.lock().clone()
    }

    /// `(target, id)` of every grant.
    pub fn grants(&self) -> Vec<(String, String)> {
        self.grants.lock().clone()
    }

    pub fn requests(&self) -> Vec<VaultRequest> {
        self.log.lock().clone()
    }

    pub fn commands(&self) -> Vec<&'static str> {
        self.log.lock().iter().map(VaultRequest::command).collect()
    }

    /// Number of signatures handed out.
    pub fn sign_count(&self) -> usize {
        self.signs.load(Ordering::SeqCst)
    }

    fn sign(&self, id: &str, hash: &[u8; 32]) -> Result<Signature, VaultError> {
        if self.refused_signers.lock().iter().any(|r| r == id) {
            return Err(VaultError::Operation(format!("capability for {id} revoked")));
        }
        let scalar = self
            .secrets
            .lock()
            .get(id)
            .copied()
            .ok_or_else(|| VaultError::Operation(format!("no secret named {id}")))?;
        let key = SigningKey::from_slice(&scalar).map_err(|e| VaultError::Operation(e.to_string()))?;
        let sig: k256::ecdsa::Signature = key
            .sign_prehash(hash)
            .map_err(|e| VaultError::Operation(e.to_string()))?;
        let (r, s) = sig.split_bytes();
        let mut r_bytes = [0u8; 32];
        let mut s_bytes = [0u8; 32];
        r_bytes.copy_from_slice(&r);
        s_bytes.copy_from_slice(&s);
        if self.high_s.load(Ordering::SeqCst) {
            s_bytes = order_minus(&s_bytes);
        }
        self.signs.fetch_add(1, Ordering::SeqCst);
        Signature::from_scalars(r_bytes, s_bytes).map_err(|e| VaultError::Operation(e.to_string()))
    }
}

#[async_trait]
impl Vault for FakeVault {
    async fn execute(&self, request: VaultRequest) -> Result<VaultResponse, VaultError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(VaultError::Transport("connection refused".into()));
        }
        self.log.lock().push(request.clone());
        let command = request.command();
        if self.refused_commands.lock().contains(&command) {
            return Err(VaultError::Operation(format!("{command}: permission denied")));
        }
        match request {
            VaultRequest::CreateSecret { id, .. } => {
                let mut secrets = self.secrets.lock();
                if secrets.contains_key(&id) {
                    return Err(VaultError::Operation(format!("secret {id} exists")));
                }
                secrets.insert(id, [0u8; 32]);
            }
            VaultRequest::WriteSecret { id, content } => {
                let minimal = BASE64
                    .decode(&content)
                    .map_err(|e| VaultError::Operation(format!("bad content: {e}")))?;
                if minimal.is_empty() || minimal.len() > 32 {
                    return Err(VaultError::Operation("bad scalar length".into()));
                }
                let mut scalar = [0u8; 32];
                scalar[32 - minimal.len()..].copy_from_slice(&minimal);
                let mut secrets = self.secrets.lock();
                let slot = secrets
                    .get_mut(&id)
                    .ok_or_else(|| VaultError::Operation(format!("no secret named {id}")))?;
                *slot = scalar;
            }
            VaultRequest::GrantCapability { target, id, .. } => {
                self.grants.lock().push((target, id));
            }
            VaultRequest::SignHash { id, hash } => {
                return self.sign(&id, &hash).map(VaultResponse::Signature);
            }
            VaultRequest::DeleteSecret { id } => {
                let removed = self.secrets.lock().remove(&id).is_some();
                let mut groups = self.groups.lock();
                let before = groups.len();
                groups.retain(|g| *g != id);
                if !removed && groups.len() == before {
                    return Err(VaultError::Operation(format!("nothing named {id}")));
                }
            }
            VaultRequest::NewGroup { name } => {
                self.groups.lock().push(name);
            }
        }
        Ok(VaultResponse::Ack("ok".into()))
    }
}

/// `N - v` for `0 < v < N`.
pub fn order_minus(v: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let mut d = i16::from(CURVE_ORDER[i]) - i16::from(v[i]) - borrow;
        borrow = if d < 0 {
            d += 256;
            1
        } else {
            0
        };
        out[i] = d as u8;
    }
    out
}

/// Decimal digits of a big-endian 256-bit value.
pub fn be32_to_decimal(v: &[u8; 32]) -> String {
    let mut n = *v;
    let mut digits = Vec::new();
    loop {
        let mut rem = 0u32;
        for byte in n.iter_mut() {
            let cur = (rem << 8) | u32::from(*byte);
            *byte = (cur / 10) as u8;
            rem = cur % 10;
        }
        digits.push(b'0' + rem as u8);
        if n.iter().all(|&b| b == 0) {
            break;
        }
    }
    digits.reverse();
    String::from_utf8(digits).expect("ascii digits")
}

// ---------------------------------------------------------------------------
// Bunkr daemon emulation
// ---------------------------------------------------------------------------

/// Serves `vault` over the daemon's JSON-RPC protocol on a Unix socket.
pub struct FakeDaemon {
    _dir: tempfile::TempDir,
    path: PathBuf,
    task: JoinHandle<()>,
}

impl FakeDaemon {
    pub fn start(vault: Arc<FakeVault>) -> Self {
        let dir = tempfile::tempdir().expect("socket dir");
        let path = dir.path().join("bunkr_daemon.sock");
        let listener = UnixListener::bind(&path).expect("bind daemon socket");
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let vault = Arc::clone(&vault);
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut line = String::new();
                    if BufReader::new(read).read_line(&mut line).await.is_err() {
                        return;
                    }
                    let reply = answer(&vault, &line).await;
                    let mut bytes = reply.to_string().into_bytes();
                    bytes.push(b'\n');
                    let _ = write.write_all(&bytes).await;
                });
            }
        });
        Self { _dir: dir, path, task }
    }

    pub fn socket(&self) -> &Path {
        &self.path
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(vault: &FakeVault, raw: &str) -> Value {
    let request: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return json!({"id": null, "result": null, "error": e.to_string()}),
    };
    let id = request["id"].clone();
    let line = request["params"][0]["Line"].as_str().unwrap_or_default();
    let (result, error) = match parse_line(line) {
        Err(e) => (String::new(), e),
        Ok(cmd) => match vault.execute(cmd).await {
            Ok(VaultResponse::Ack(_)) => ("Done".to_string(), String::new()),
            Ok(VaultResponse::Signature(sig)) => (
                format!(
                    "{} {}",
                    BASE64.encode(be32_to_decimal(sig.r())),
                    BASE64.encode(be32_to_decimal(sig.s()))
                ),
                String::new(),
            ),
            Err(e) => (String::new(), e.to_string()),
        },
    };
    json!({"id": id, "result": {"Result": result, "Error": error}, "error": null})
}

fn parse_line(line: &str) -> Result<VaultRequest, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["create", id, "ECDSA-SECP256k1"] => Ok(VaultRequest::CreateSecret {
            id: id.to_string(),
            kind: SecretKind::EcdsaSecp256k1,
        }),
        ["write", id, "b64", content] => Ok(VaultRequest::WriteSecret {
            id: id.to_string(),
            content: content.trim_matches('"').to_string(),
        }),
        ["grant", target, id] => Ok(VaultRequest::GrantCapability {
            target: target.to_string(),
            id: id.to_string(),
            admin: false,
        }),
        ["grant", target, id, "admin"] => Ok(VaultRequest::GrantCapability {
            target: target.to_string(),
            id: id.to_string(),
            admin: true,
        }),
        ["sign-ecdsa", id, hash] => {
            let bytes = BASE64.decode(hash).map_err(|e| e.to_string())?;
            let hash: [u8; 32] = bytes.try_into().map_err(|_| "hash is not 32 bytes".to_string())?;
            Ok(VaultRequest::SignHash { id: id.to_string(), hash })
        }
        ["delete", id] => Ok(VaultRequest::DeleteSecret { id: id.to_string() }),
        ["new-group", name] => Ok(VaultRequest::NewGroup { name: name.to_string() }),
        _ => Err(format!("unknown command line {line:?}")),
    }
}

// ---------------------------------------------------------------------------
// Explorer
// ---------------------------------------------------------------------------

/// In-memory address histories plus a broadcast log.
#[derive(Default)]
pub struct FakeExplorer {
    unspent: Mutex<HashMap<String, Vec<Utxo>>>,
    spent: Mutex<HashMap<String, Vec<SpentOutput>>>,
    broadcasts: Mutex<Vec<String>>,
    offline: AtomicBool,
    reject_broadcasts: AtomicBool,
    lookups: AtomicUsize,
    next_tag: AtomicUsize,
}

impl FakeExplorer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Credit `address` with one unspent output of `value`; returns its txid.
    pub fn fund(&self, address: &str, value: u64) -> Txid {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let mut id = [0u8; 32];
        id[..8].copy_from_slice(&(tag as u64 + 1).to_le_bytes());
        id[31] = 0xAB;
        let txid = Txid(id);
        self.unspent
            .lock()
            .entry(address.to_string())
            .or_default()
            .push(Utxo {
                txid,
                output_index: (tag % 3) as u32,
                value,
            });
        txid
    }

    /// Record a spent output of `value` with `confirmations`.
    pub fn add_spent(&self, address: &str, value: u64, confirmations: u64) {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) as u8;
        self.spent
            .lock()
            .entry(address.to_string())
            .or_default()
            .push(SpentOutput {
                txid: Txid([tag; 32]),
                value,
                confirmations,
            });
    }

    /// Fail every lookup and broadcast as a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn reject_broadcasts(&self) {
        self.reject_broadcasts.store(true, Ordering::SeqCst);
    }

    /// Raw hex of every accepted broadcast.
    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.lock().clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), ExplorerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ExplorerError::Transport("HTTP 503".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Explorer for FakeExplorer {
    async fn get_unspent(&self, address: &str) -> Result<Vec<Utxo>, ExplorerError> {
        self.check_online()?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.unspent.lock().get(address).cloned().unwrap_or_default())
    }

    async fn get_spent(&self, address: &str) -> Result<Vec<SpentOutput>, ExplorerError> {
        self.check_online()?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.spent.lock().get(address).cloned().unwrap_or_default())
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<BroadcastReceipt, ExplorerError> {
        self.check_online()?;
        if self.reject_broadcasts.load(Ordering::SeqCst) {
            return Err(ExplorerError::Rejected("bad-txns-inputs-missingorspent".into()));
        }
        let bytes = hex::decode(raw_tx_hex).map_err(|e| ExplorerError::Rejected(e.to_string()))?;
        let tx = Transaction::deserialize(&bytes).map_err(|e| ExplorerError::Rejected(e.to_string()))?;
        self.broadcasts.lock().push(raw_tx_hex.to_string());
        Ok(BroadcastReceipt {
            txid: tx.txid().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Deterministic key from a seed byte (`1..=0xFE`).
pub fn keypair(seed: u8) -> KeyPair {
    KeyPair::from_secret_bytes(&[seed; 32], true).expect("seed below curve order")
}

/// A fresh account for `keypair(seed)` whose secret is already in `vault`.
pub fn vault_account(vault: &FakeVault, seed: u8, network: Network) -> Account {
    let key = keypair(seed);
    let address = Address::from_public_key(key.public_key(), network).encode();
    vault.import(&address, [seed; 32]);
    Account {
        address: address.clone(),
        public_key_hex: key.public_key().to_hex(),
        secret_reference: address,
        status: AccountStatus::Fresh,
    }
}

/// An address no test wallet owns.
pub fn external_address(network: Network) -> String {
    Address::from_pubkey_hash([0xC0; 20], network).encode()
}

/// Split a P2PKH scriptSig into (DER signature with hash type, public key).
pub fn split_script_sig(script: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let sig_len = script[0] as usize;
    let sig = script[1..1 + sig_len].to_vec();
    let rest = &script[1 + sig_len..];
    let key_len = rest[0] as usize;
    (sig, rest[1..1 + key_len].to_vec())
}
