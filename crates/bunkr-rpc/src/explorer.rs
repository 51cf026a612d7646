//! BlockCypher v1 explorer and broadcaster.
//!
//! - unspent: `GET {base}/btc/{chain}/addrs/{address}?unspentOnly=true`
//! - spent:   `GET {base}/btc/{chain}/addrs/{address}`, outputs with `spent == true`
//! - push:    `POST {base}/btc/{chain}/txs/push` with `{"tx": "<hex>"}`
//!
//! Address lookups ask for up to [`PAGE_LIMIT`] entries and follow `hasMore`
//! with `before={lowest block height seen}` for at most [`MAX_PAGES`] pages.
//!
//! `chain` is `main` or `test3`. HTTP 429 and 5xx map to
//! [`ExplorerError::Transport`] (retryable), other non-success statuses to
//! [`ExplorerError::Rejected`], and unparseable bodies to
//! [`ExplorerError::Decode`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use bunkr_core::address::Network;
use bunkr_core::error::ExplorerError;
use bunkr_core::traits::{BroadcastReceipt, Explorer};
use bunkr_core::types::{SpentOutput, Txid, Utxo};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// `limit` sent with every address lookup (BlockCypher's maximum).
pub const PAGE_LIMIT: u32 = 2000;

/// Pages fetched per address before giving up on the rest of the history.
pub const MAX_PAGES: usize = 25;

/// Longest error body quoted back in an error message.
const ERROR_BODY_LIMIT: usize = 256;

/// One entry of `txrefs` / `unconfirmed_txrefs`.
#[derive(Debug, Clone, Deserialize)]
pub struct TxRef {
    pub tx_hash: String,
    /// `-1` when the entry is an input.
    #[serde(default = "minus_one")]
    pub tx_output_n: i64,
    pub value: u64,
    /// Missing or `-1` while unconfirmed.
    #[serde(default)]
    pub block_height: Option<i64>,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    pub spent: bool,
}

fn minus_one() -> i64 {
    -1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressResponse {
    #[serde(default)]
    pub txrefs: Vec<TxRef>,
    #[serde(default)]
    pub unconfirmed_txrefs: Vec<TxRef>,
    /// More confirmed history exists below the lowest `block_height` returned.
    #[serde(default, rename = "hasMore")]
    pub has_more: bool,
}

/// `before` value for the page after `response`: the lowest confirmed block
/// height it holds.
pub fn next_page_before(response: &AddressResponse) -> Option<i64> {
    response
        .txrefs
        .iter()
        .filter_map(|r| r.block_height)
        .filter(|&h| h > 0)
        .min()
}

#[derive(Deserialize)]
struct PushResponse {
    tx: PushedTx,
}

#[derive(Deserialize)]
struct PushedTx {
    hash: String,
}

/// Path segment BlockCypher uses for `network`.
pub fn chain_segment(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "main",
        Network::Testnet => "test3",
    }
}

pub fn parse_address_response(body: &[u8]) -> Result<AddressResponse, ExplorerError> {
    serde_json::from_slice(body).map_err(|e| ExplorerError::Decode(e.to_string()))
}

fn outputs(response: &AddressResponse) -> impl Iterator<Item = &TxRef> {
    response
        .txrefs
        .iter()
        .chain(&response.unconfirmed_txrefs)
        .filter(|r| r.tx_output_n >= 0)
}

fn output_index(r: &TxRef) -> Result<u32, ExplorerError> {
    u32::try_from(r.tx_output_n)
        .map_err(|_| ExplorerError::Decode(format!("output index {} out of range", r.tx_output_n)))
}

fn txid(r: &TxRef) -> Result<Txid, ExplorerError> {
    r.tx_hash
        .parse()
        .map_err(|e| ExplorerError::Decode(format!("tx_hash {:?}: {e}", r.tx_hash)))
}

/// Unspent outputs, confirmed first, in explorer order. The same output is
/// never returned twice.
pub fn unspent_outputs(response: &AddressResponse) -> Result<Vec<Utxo>, ExplorerError> {
    let mut utxos: Vec<Utxo> = Vec::new();
    for r in outputs(response).filter(|r| !r.spent) {
        let utxo = Utxo {
            txid: txid(r)?,
            output_index: output_index(r)?,
            value: r.value,
        };
        if !utxos
            .iter()
            .any(|u| u.txid == utxo.txid && u.output_index == utxo.output_index)
        {
            utxos.push(utxo);
        }
    }
    Ok(utxos)
}

/// Outputs the address received and has since spent.
pub fn spent_outputs(response: &AddressResponse) -> Result<Vec<SpentOutput>, ExplorerError> {
    outputs(response)
        .filter(|r| r.spent)
        .map(|r| {
            Ok(SpentOutput {
                txid: txid(r)?,
                value: r.value,
                confirmations: r.confirmations,
            })
        })
        .collect()
}

pub fn parse_push_response(body: &[u8]) -> Result<BroadcastReceipt, ExplorerError> {
    let pushed: PushResponse =
        serde_json::from_slice(body).map_err(|e| ExplorerError::Decode(e.to_string()))?;
    Ok(BroadcastReceipt { txid: pushed.tx.hash })
}

/// Error for a non-success HTTP status.
pub fn status_error(status: StatusCode, body: &str) -> ExplorerError {
    let mut excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    if excerpt.len() < body.len() {
        excerpt.push_str("...");
    }
    let message = format!("HTTP {status}: {excerpt}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ExplorerError::Transport(message)
    } else {
        ExplorerError::Rejected(message)
    }
}

fn transport(e: reqwest::Error) -> ExplorerError {
    ExplorerError::Transport(e.to_string())
}

pub struct BlockCypherClient {
    client: Client,
    base_url: String,
    network: Network,
}

impl BlockCypherClient {
    /// `base_url` is the API root, e.g. `https://api.blockcypher.com/v1`.
    pub fn new(base_url: &str, network: Network) -> Result<Self, ExplorerError> {
        Self::with_timeout(base_url, network, DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, network: Network, timeout: Duration) -> Result<Self, ExplorerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExplorerError::Transport(format!("build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            network,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn url(&self, path: &str) -> String {
        format!("{}/btc/{}/{path}", self.base_url, chain_segment(self.network))
    }

    async fn read(&self, response: reqwest::Response) -> Result<Vec<u8>, ExplorerError> {
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;
        if !status.is_success() {
            return Err(status_error(status, &String::from_utf8_lossy(&body)));
        }
        Ok(body.to_vec())
    }

    async fn address_page(
        &self,
        address: &str,
        unspent_only: bool,
        before: Option<i64>,
    ) -> Result<AddressResponse, ExplorerError> {
        let mut query = vec![("limit", PAGE_LIMIT.to_string())];
        if unspent_only {
            query.insert(0, ("unspentOnly", "true".to_string()));
        }
        if let Some(height) = before {
            query.push(("before", height.to_string()));
        }
        let response = self
            .client
            .get(self.url(&format!("addrs/{address}")))
            .query(&query)
            .send()
            .await
            .map_err(transport)?;
        let body = self.read(response).await?;
        parse_address_response(&body)
    }

    /// Every page of `address`, merged into one response.
    async fn address(&self, address: &str, unspent_only: bool) -> Result<AddressResponse, ExplorerError> {
        let mut merged = self.address_page(address, unspent_only, None).await?;
        let mut pages = 1;
        let mut before = None;
        while merged.has_more {
            let next = next_page_before(&merged);
            if next.is_none() || next == before {
                warn!(%address, pages, "explorer: hasMore without lower block height, history truncated");
                break;
            }
            if pages == MAX_PAGES {
                warn!(%address, pages, "explorer: page limit reached, history truncated");
                break;
            }
            before = next;
            let page = self.address_page(address, unspent_only, before).await?;
            merged.txrefs.extend(page.txrefs);
            merged.has_more = page.has_more;
            pages += 1;
        }
        if pages > 1 {
            debug!(%address, pages, txrefs = merged.txrefs.len(), "explorer: paged history");
        }
        Ok(merged)
    }
}

#[async_trait]
impl Explorer for BlockCypherClient {
    async fn get_unspent(&self, address: &str) -> Result<Vec<Utxo>, ExplorerError> {
        let utxos = unspent_outputs(&self.address(address, true).await?)?;
        debug!(%address, utxos = utxos.len(), "explorer: unspent");
        Ok(utxos)
    }

    async fn get_spent(&self, address: &str) -> Result<Vec<SpentOutput>, ExplorerError> {
        let spent = spent_outputs(&self.address(address, false).await?)?;
        debug!(%address, spent = spent.len(), "explorer: spent");
        Ok(spent)
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<BroadcastReceipt, ExplorerError> {
        let response = self
            .client
            .post(self.url("txs/push"))
            .json(&json!({ "tx": raw_tx_hex }))
            .send()
            .await
            .map_err(transport)?;
        let body = self.read(response).await?;
        let receipt = parse_push_response(&body)?;
        debug!(txid = %receipt.txid, bytes = raw_tx_hex.len() / 2, "explorer: broadcast accepted");
        Ok(receipt)
    }
}
