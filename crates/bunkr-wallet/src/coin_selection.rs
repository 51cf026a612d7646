//! Randomized account-level coin selection.
//!
//! Funding works on whole accounts, never individual outputs: once an
//! account is picked every one of its UTXOs is spent, so a key is never left
//! holding a remainder after its public key has been revealed on chain.
//! Accounts are visited in a random order drawn from an injectable RNG.
//!
//! Explorer lookups for a window of accounts run concurrently, but results
//! are consumed in the shuffled order, so the outcome depends only on the
//! permutation and the explorer's answers.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;
use tracing::debug;

use bunkr_core::constants::USED_CONFIRMATIONS;
use bunkr_core::error::ExplorerError;
use bunkr_core::traits::Explorer;
use bunkr_core::types::{SpentOutput, Utxo};

use crate::error::WalletError;
use crate::fanout::{self, FanOutError};
use crate::wallet::{Account, AccountStatus, WalletRecord};

/// Default number of explorer lookups in flight.
pub const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectorConfig {
    pub max_concurrent_queries: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
        }
    }
}

/// An account picked to fund a transaction, with the outputs it will spend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FundingAccount {
    pub account: Account,
    /// Unspent outputs in explorer order.
    pub utxos: Vec<Utxo>,
}

impl FundingAccount {
    pub fn value(&self) -> u64 {
        self.utxos.iter().fold(0u64, |acc, u| acc.saturating_add(u.value))
    }
}

/// Picks funding and change accounts and keeps account status current.
pub struct UtxoSelector {
    explorer: Arc<dyn Explorer>,
    rng: Box<dyn RngCore + Send + Sync>,
    config: SelectorConfig,
}

impl UtxoSelector {
    /// Selector shuffling with an entropy-seeded RNG.
    pub fn new(explorer: Arc<dyn Explorer>, config: SelectorConfig) -> Self {
        Self::with_rng(explorer, StdRng::from_entropy(), config)
    }

    /// Selector shuffling with `rng`, e.g. a seeded `StdRng` for reproducible tests.
    pub fn with_rng<R: RngCore + Send + Sync + 'static>(
        explorer: Arc<dyn Explorer>,
        rng: R,
        config: SelectorConfig,
    ) -> Self {
        Self {
            explorer,
            rng: Box::new(rng),
            config,
        }
    }

    pub fn explorer(&self) -> &Arc<dyn Explorer> {
        &self.explorer
    }

    pub fn set_rng<R: RngCore + Send + Sync + 'static>(&mut self, rng: R) {
        self.rng = Box::new(rng);
    }

    fn shuffled<'a>(&mut self, accounts: &'a [Account]) -> Vec<&'a Account> {
        let mut order: Vec<&Account> = accounts.iter().collect();
        order.shuffle(&mut *self.rng);
        order
    }

    fn window(&self) -> usize {
        self.config.max_concurrent_queries.max(1)
    }

    /// Accounts whose unspent outputs together cover `target`.
    ///
    /// Accounts are scanned in shuffled order; accounts without UTXOs are
    /// skipped and the scan stops as soon as the running total reaches the
    /// target.
    pub async fn select_funding_accounts(
        &mut self,
        accounts: &[Account],
        target: u64,
    ) -> Result<Vec<FundingAccount>, WalletError> {
        let window = self.window();
        let order = self.shuffled(accounts);
        let mut selected = Vec::new();
        let mut available = 0u64;
        if target == 0 {
            return Ok(selected);
        }

        for chunk in order.chunks(window) {
            let addresses: Vec<String> = chunk.iter().map(|a| a.address.clone()).collect();
            let fetched = fetch_unspent(&self.explorer, addresses, window).await?;
            for (account, utxos) in chunk.iter().zip(fetched) {
                if utxos.is_empty() {
                    continue;
                }
                let funding = FundingAccount {
                    account: (*account).clone(),
                    utxos,
                };
                available = available.saturating_add(funding.value());
                debug!(address = %funding.account.address, utxos = funding.utxos.len(), value = funding.value(), "selector: funding account");
                selected.push(funding);
                if available >= target {
                    debug!(accounts = selected.len(), available, target, "selector: target reached");
                    return Ok(selected);
                }
            }
        }

        Err(WalletError::InsufficientFunds {
            needed: target,
            available,
        })
    }

    /// A randomly chosen account that has never received anything.
    pub async fn select_change_account(
        &mut self,
        accounts: &[Account],
    ) -> Result<Account, WalletError> {
        let window = self.window();
        let order = self.shuffled(accounts);
        for chunk in order.chunks(window) {
            let addresses: Vec<String> = chunk.iter().map(|a| a.address.clone()).collect();
            let histories = fetch_history(&self.explorer, addresses, window).await?;
            for (account, (unspent, spent)) in chunk.iter().zip(histories) {
                if unspent.is_empty() && spent.is_empty() {
                    debug!(address = %account.address, "selector: change account");
                    return Ok((*account).clone());
                }
            }
        }
        Err(WalletError::AccountExhausted)
    }

    /// Re-derive every account's status from the explorer and stamp `now`.
    ///
    /// All lookups complete before anything is written, so a failed refresh
    /// leaves the wallet untouched. Statuses only ever move forward.
    pub async fn refresh_status(&self, wallet: &mut WalletRecord, now: i64) -> Result<(), WalletError> {
        let addresses: Vec<String> = wallet.accounts.iter().map(|a| a.address.clone()).collect();
        let histories = fetch_history(&self.explorer, addresses, self.window()).await?;
        let mut changed = 0usize;
        for (account, (unspent, spent)) in wallet.accounts.iter_mut().zip(histories) {
            if let Some(observed) = observed_status(&unspent, &spent) {
                let next = account.status.max(observed);
                if next != account.status {
                    debug!(address = %account.address, from = %account.status, to = %next, "selector: status change");
                    account.status = next;
                    changed += 1;
                }
            }
        }
        wallet.last_update_time = now;
        debug!(wallet = %wallet.name, changed, "selector: status refreshed");
        Ok(())
    }

    /// Unspent balance of every account, in wallet order.
    pub async fn balances(&self, accounts: &[Account]) -> Result<Vec<(String, u64)>, WalletError> {
        let addresses: Vec<String> = accounts.iter().map(|a| a.address.clone()).collect();
        let fetched = fetch_unspent(&self.explorer, addresses.clone(), self.window()).await?;
        Ok(addresses
            .into_iter()
            .zip(fetched)
            .map(|(address, utxos)| {
                let value = utxos.iter().fold(0u64, |acc, u| acc.saturating_add(u.value));
                (address, value)
            })
            .collect())
    }
}

/// Status implied by an address's history, or `None` when it has none.
pub fn observed_status(unspent: &[Utxo], spent: &[SpentOutput]) -> Option<AccountStatus> {
    if !unspent.is_empty() {
        Some(AccountStatus::InUse)
    } else if spent.is_empty() {
        None
    } else if spent.iter().all(|s| s.confirmations >= USED_CONFIRMATIONS) {
        Some(AccountStatus::Used)
    } else {
        Some(AccountStatus::InUse)
    }
}

fn explorer_failure(e: FanOutError<ExplorerError>) -> WalletError {
    match e {
        FanOutError::Failed(_, e) => WalletError::Explorer(e),
        FanOutError::Lost(index) => {
            WalletError::ProtocolMismatch(format!("explorer lookup {index} did not complete"))
        }
    }
}

async fn fetch_unspent(
    explorer: &Arc<dyn Explorer>,
    addresses: Vec<String>,
    limit: usize,
) -> Result<Vec<Vec<Utxo>>, WalletError> {
    fanout::indexed(addresses, limit, |address| {
        let explorer = Arc::clone(explorer);
        async move { explorer.get_unspent(&address).await }
    })
    .await
    .map_err(explorer_failure)
}

/// Unspent and spent outputs per address; the spent lookup is skipped when
/// unspent outputs already exist.
async fn fetch_history(
    explorer: &Arc<dyn Explorer>,
    addresses: Vec<String>,
    limit: usize,
) -> Result<Vec<(Vec<Utxo>, Vec<SpentOutput>)>, WalletError> {
    fanout::indexed(addresses, limit, |address| {
        let explorer = Arc::clone(explorer);
        async move {
            let unspent = explorer.get_unspent(&address).await?;
            let spent = if unspent.is_empty() {
                explorer.get_spent(&address).await?
            } else {
                Vec::new()
            };
            Ok::<_, ExplorerError>((unspent, spent))
        }
    })
    .await
    .map_err(explorer_failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bunkr_core::address::Network;
    use bunkr_core::traits::BroadcastReceipt;
    use bunkr_core::types::Txid;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    // --- Mock explorer ---

    #[derive(Default)]
    struct MockExplorer {
        unspent: HashMap<String, Vec<Utxo>>,
        spent: HashMap<String, Vec<SpentOutput>>,
        failing: Option<String>,
        queried: Mutex<Vec<String>>,
    }

    impl MockExplorer {
        fn fund(mut self, address: &str, values: &[u64]) -> Self {
            let utxos = values
                .iter()
                .enumerate()
                .map(|(i, &value)| make_utxo(address, i as u32, value))
                .collect();
            self.unspent.insert(address.to_string(), utxos);
            self
        }

        fn spent(mut self, address: &str, confirmations: &[u64]) -> Self {
            let spent = confirmations
                .iter()
                .map(|&c| SpentOutput {
                    txid: Txid([0xEE; 32]),
                    value: 1_000,
                    confirmations: c,
                })
                .collect();
            self.spent.insert(address.to_string(), spent);
            self
        }
    }

    #[async_trait]
    impl Explorer for MockExplorer {
        async fn get_unspent(&self, address: &str) -> Result<Vec<Utxo>, ExplorerError> {
            self.queried.lock().push(address.to_string());
            if self.failing.as_deref() == Some(address) {
                return Err(ExplorerError::Transport("connection reset".into()));
            }
            Ok(self.unspent.get(address).cloned().unwrap_or_default())
        }

        async fn get_spent(&self, address: &str) -> Result<Vec<SpentOutput>, ExplorerError> {
            Ok(self.spent.get(address).cloned().unwrap_or_default())
        }

        async fn broadcast(&self, _: &str) -> Result<BroadcastReceipt, ExplorerError> {
            Err(ExplorerError::Rejected("not in this test".into()))
        }
    }

    fn make_utxo(address: &str, index: u32, value: u64) -> Utxo {
        let mut txid = [0u8; 32];
        txid[..address.len().min(32)].copy_from_slice(&address.as_bytes()[..address.len().min(32)]);
        Utxo {
            txid: Txid(txid),
            output_index: index,
            value,
        }
    }

    fn account(address: &str) -> Account {
        Account {
            address: address.to_string(),
            public_key_hex: String::new(),
            secret_reference: address.to_string(),
            status: AccountStatus::Fresh,
        }
    }

    fn accounts(names: &[&str]) -> Vec<Account> {
        names.iter().map(|n| account(n)).collect()
    }

    fn selector(explorer: MockExplorer, seed: u64) -> UtxoSelector {
        UtxoSelector::with_rng(Arc::new(explorer), StdRng::seed_from_u64(seed), SelectorConfig::default())
    }

    // --- Funding ---

    #[tokio::test]
    async fn single_funded_account_is_selected() {
        let accts = accounts(&["a", "b", "c", "d", "e"]);
        for seed in 0..8 {
            let mut sel = selector(MockExplorer::default().fund("b", &[60_000, 40_000]), seed);
            let picked = sel.select_funding_accounts(&accts, 100_000).await.unwrap();
            assert_eq!(picked.len(), 1);
            assert_eq!(picked[0].account.address, "b");
            assert_eq!(picked[0].utxos.len(), 2);
        }
    }

    #[tokio::test]
    async fn insufficient_funds_reports_total_seen() {
        let explorer = MockExplorer::default().fund("a", &[30_000]).fund("c", &[20_000]);
        let mut sel = selector(explorer, 1);
        let err = sel
            .select_funding_accounts(&accounts(&["a", "b", "c"]), 60_000)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientFunds {
                needed: 60_000,
                available: 50_000
            }
        );
    }

    #[tokio::test]
    async fn exact_total_is_enough() {
        let explorer = MockExplorer::default().fund("a", &[30_000]).fund("c", &[20_000]);
        let mut sel = selector(explorer, 2);
        let picked = sel
            .select_funding_accounts(&accounts(&["a", "b", "c"]), 50_000)
            .await
            .unwrap();
        let total: u64 = picked.iter().map(FundingAccount::value).sum();
        assert_eq!(total, 50_000);
        assert_eq!(picked.len(), 2);
    }

    #[tokio::test]
    async fn stops_once_target_reached() {
        let explorer = MockExplorer::default()
            .fund("a", &[100_000])
            .fund("b", &[100_000])
            .fund("c", &[100_000]);
        let mut sel = selector(explorer, 3);
        let picked = sel
            .select_funding_accounts(&accounts(&["a", "b", "c"]), 50_000)
            .await
            .unwrap();
        assert_eq!(picked.len(), 1);
    }

    #[tokio::test]
    async fn same_seed_same_selection() {
        let build = || {
            MockExplorer::default()
                .fund("a", &[10_000])
                .fund("b", &[10_000])
                .fund("c", &[10_000])
                .fund("d", &[10_000])
        };
        let accts = accounts(&["a", "b", "c", "d"]);
        let first = selector(build(), 42)
            .select_funding_accounts(&accts, 20_000)
            .await
            .unwrap();
        let second = selector(build(), 42)
            .select_funding_accounts(&accts, 20_000)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn explorer_failure_propagates() {
        let explorer = MockExplorer {
            failing: Some("b".into()),
            ..MockExplorer::default()
        };
        let mut sel = selector(explorer, 0);
        let err = sel
            .select_funding_accounts(&accounts(&["a", "b"]), 1)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, WalletError::Explorer(ExplorerError::Transport(_))));
    }

    #[tokio::test]
    async fn zero_target_selects_nothing() {
        let mut sel = selector(MockExplorer::default().fund("a", &[1]), 0);
        assert!(sel.select_funding_accounts(&accounts(&["a"]), 0).await.unwrap().is_empty());
    }

    // --- Change ---

    #[tokio::test]
    async fn change_account_has_no_history() {
        let accts = accounts(&["a", "b", "c", "d"]);
        for seed in 0..8 {
            let explorer = MockExplorer::default()
                .fund("a", &[5_000])
                .spent("b", &[10])
                .fund("d", &[1]);
            let change = selector(explorer, seed).select_change_account(&accts).await.unwrap();
            assert_eq!(change.address, "c");
        }
    }

    #[tokio::test]
    async fn change_exhausted() {
        let explorer = MockExplorer::default().fund("a", &[1]).spent("b", &[0]);
        let err = selector(explorer, 9)
            .select_change_account(&accounts(&["a", "b"]))
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::AccountExhausted);
    }

    // --- Status ---

    #[test]
    fn observed_status_rules() {
        let utxo = [make_utxo("x", 0, 1)];
        let deep = SpentOutput {
            txid: Txid([1; 32]),
            value: 1,
            confirmations: 6,
        };
        let shallow = SpentOutput {
            confirmations: 5,
            ..deep.clone()
        };
        assert_eq!(observed_status(&utxo, &[]), Some(AccountStatus::InUse));
        assert_eq!(observed_status(&utxo, &[deep.clone()]), Some(AccountStatus::InUse));
        assert_eq!(observed_status(&[], &[deep.clone()]), Some(AccountStatus::Used));
        assert_eq!(
            observed_status(&[], &[deep, shallow]),
            Some(AccountStatus::InUse)
        );
        assert_eq!(observed_status(&[], &[]), None);
    }

    #[tokio::test]
    async fn refresh_updates_statuses_and_timestamp() {
        let explorer = MockExplorer::default()
            .fund("a", &[1_000])
            .spent("b", &[6, 100])
            .spent("c", &[2]);
        let sel = selector(explorer, 0);
        let mut wallet = WalletRecord::new("w", Network::Testnet, 0);
        wallet.accounts = accounts(&["a", "b", "c", "d"]);
        sel.refresh_status(&mut wallet, 1_700_000_000).await.unwrap();
        let statuses: Vec<AccountStatus> = wallet.accounts.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![
                AccountStatus::InUse,
                AccountStatus::Used,
                AccountStatus::InUse,
                AccountStatus::Fresh
            ]
        );
        assert_eq!(wallet.last_update_time, 1_700_000_000);
    }

    #[tokio::test]
    async fn refresh_never_moves_backwards() {
        let explorer = MockExplorer::default().fund("a", &[1_000]);
        let sel = selector(explorer, 0);
        let mut wallet = WalletRecord::new("w", Network::Testnet, 0);
        wallet.accounts = accounts(&["a", "b"]);
        wallet.accounts[0].status = AccountStatus::Used;
        wallet.accounts[1].status = AccountStatus::InUse;
        sel.refresh_status(&mut wallet, 10).await.unwrap();
        assert_eq!(wallet.accounts[0].status, AccountStatus::Used);
        assert_eq!(wallet.accounts[1].status, AccountStatus::InUse);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_wallet_untouched() {
        let explorer = MockExplorer {
            failing: Some("b".into()),
            ..MockExplorer::default().fund("a", &[1])
        };
        let sel = selector(explorer, 0);
        let mut wallet = WalletRecord::new("w", Network::Mainnet, 5);
        wallet.accounts = accounts(&["a", "b"]);
        let before = wallet.clone();
        assert!(sel.refresh_status(&mut wallet, 99).await.is_err());
        assert_eq!(wallet, before);
    }

    #[tokio::test]
    async fn balances_in_wallet_order() {
        let explorer = MockExplorer::default().fund("a", &[1, 2]).fund("c", &[10]);
        let sel = selector(explorer, 0);
        let balances = sel.balances(&accounts(&["a", "b", "c"])).await.unwrap();
        assert_eq!(
            balances,
            vec![("a".to_string(), 3), ("b".to_string(), 0), ("c".to_string(), 10)]
        );
    }
}
