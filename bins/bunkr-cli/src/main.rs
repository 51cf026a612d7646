//! bunkr-wallet — command-line interface for vault-backed Bitcoin wallets.
//!
//! Wallet files live in `~/.bunkr/.BunkrWallet` (override with
//! `BUNKR_WALLET_DIR` or `--wallet-dir`); every private key lives in the
//! Bunkr daemon reached through `--socket`. Address history and broadcast go
//! through the BlockCypher API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use bunkr_core::address::Network;
use bunkr_core::constants::COIN;
use bunkr_core::traits::Explorer;
use bunkr_rpc::{BlockCypherClient, BunkrClient};
use bunkr_wallet::{JsonFileStore, Wallet, WalletConfig, WalletDirectory};

/// Bitcoin wallet whose keys never leave the Bunkr vault.
#[derive(Parser)]
#[command(name = "bunkr-wallet")]
#[command(version, about = "Bitcoin wallet backed by a Bunkr vault")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Directory holding the wallet files.
    #[arg(long, global = true)]
    wallet_dir: Option<PathBuf>,

    /// Bunkr daemon socket.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Explorer API root (e.g. https://api.blockcypher.com/v1).
    #[arg(long, global = true)]
    explorer_url: Option<String>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log format: text or json.
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a wallet and register its first accounts with the vault.
    Create(CreateArgs),
    /// List wallet names.
    List,
    /// Show the unspent balance.
    Balance(BalanceArgs),
    /// List every account with its status.
    Addresses(NameArgs),
    /// Print an unused address to receive on.
    Receive(NameArgs),
    /// Generate and register more accounts.
    AddAccounts(AddAccountsArgs),
    /// Build, vault-sign and broadcast a payment.
    Send(SendArgs),
    /// Re-derive account statuses from the explorer.
    Refresh(NameArgs),
    /// Remove one account and its vault secret.
    DeleteAccount(DeleteAccountArgs),
    /// Delete a wallet, its vault secrets and its file.
    Delete(DeleteArgs),
}

#[derive(Args)]
struct NameArgs {
    /// Wallet name.
    name: String,
}

#[derive(Args)]
struct CreateArgs {
    /// Wallet name.
    name: String,

    /// Create a testnet wallet.
    #[arg(long)]
    testnet: bool,

    /// Number of accounts to start with (default 5 or BUNKR_INITIAL_ACCOUNTS).
    #[arg(long)]
    accounts: Option<usize>,
}

#[derive(Args)]
struct BalanceArgs {
    /// Wallet name.
    name: String,

    /// Also list every address holding funds.
    #[arg(long)]
    per_address: bool,
}

#[derive(Args)]
struct AddAccountsArgs {
    /// Wallet name.
    name: String,

    /// How many accounts to add.
    #[arg(default_value = "1")]
    count: usize,
}

#[derive(Args)]
struct SendArgs {
    /// Wallet name.
    name: String,

    /// Recipient as ADDRESS:SATOSHIS. Repeat for several outputs.
    #[arg(long = "to", required = true, value_parser = parse_recipient)]
    to: Vec<(String, u64)>,

    /// Fee in satoshis.
    #[arg(long, default_value = "1000")]
    fee: u64,

    /// Print the signed transaction instead of broadcasting it.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct DeleteAccountArgs {
    /// Wallet name.
    name: String,

    /// Account address.
    address: String,
}

#[derive(Args)]
struct DeleteArgs {
    /// Wallet name.
    name: String,

    /// Confirm deletion of every vault secret of the wallet.
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.global.log_level, &cli.global.log_format);

    let initial_accounts = match &cli.command {
        Commands::Create(args) => args.accounts,
        _ => None,
    };
    let app = App::new(&cli.global, initial_accounts)?;
    match cli.command {
        Commands::Create(args) => create(&app, args).await,
        Commands::List => list(&app),
        Commands::Balance(args) => balance(&app, args).await,
        Commands::Addresses(args) => addresses(&app, args).await,
        Commands::Receive(args) => receive(&app, args).await,
        Commands::AddAccounts(args) => add_accounts(&app, args).await,
        Commands::Send(args) => send(&app, args).await,
        Commands::Refresh(args) => refresh(&app, args).await,
        Commands::DeleteAccount(args) => delete_account(&app, args).await,
        Commands::Delete(args) => delete(&app, args).await,
    }
}

/// Configuration plus the wallet directory built from it.
struct App {
    config: WalletConfig,
    directory: WalletDirectory,
}

impl App {
    fn new(global: &GlobalArgs, initial_accounts: Option<usize>) -> Result<Self> {
        let mut config = WalletConfig::from_env().context("Invalid BUNKR_* environment")?;
        if let Some(n) = initial_accounts {
            if n == 0 {
                bail!("A wallet needs at least one account");
            }
            config.initial_accounts = n;
        }
        if let Some(dir) = &global.wallet_dir {
            config.data_dir = dir.clone();
        }
        if let Some(socket) = &global.socket {
            config.vault_socket = socket.clone();
        }
        if let Some(url) = &global.explorer_url {
            config.explorer_url = url.trim_end_matches('/').to_string();
        }
        debug!(data_dir = %config.data_dir.display(), socket = %config.vault_socket.display(), "cli: configured");

        let store = Arc::new(JsonFileStore::new(config.data_dir.clone()));
        let vault = Arc::new(BunkrClient::new(config.vault_socket.clone()));
        let directory = WalletDirectory::new(store, vault, config.clone());
        Ok(Self { config, directory })
    }

    fn explorer(&self, network: Network) -> Result<Arc<dyn Explorer>> {
        let client = BlockCypherClient::new(&self.config.explorer_url, network)
            .context("Failed to build explorer client")?;
        Ok(Arc::new(client))
    }

    async fn open(&self, name: &str) -> Result<Wallet> {
        let network = self
            .directory
            .network_of(name)
            .with_context(|| format!("Cannot read wallet {name}"))?;
        self.directory
            .open(name, self.explorer(network)?)
            .await
            .with_context(|| format!("Failed to open wallet {name}"))
    }
}

async fn create(app: &App, args: CreateArgs) -> Result<()> {
    let network = if args.testnet {
        Network::Testnet
    } else {
        Network::Mainnet
    };
    let wallet = app
        .directory
        .create(&args.name, network, app.explorer(network)?)
        .await
        .with_context(|| format!("Failed to create wallet {}", args.name))?;

    println!("Created {} wallet {}", network_name(network), wallet.name());
    for account in wallet.accounts() {
        println!("  {}", account.address);
    }
    Ok(())
}

fn list(app: &App) -> Result<()> {
    let names = app.directory.list().context("Failed to list wallets")?;
    if names.is_empty() {
        println!("No wallets in {}", app.config.data_dir.display());
    }
    for name in names {
        match app.directory.network_of(&name) {
            Ok(network) => println!("{name}\t{}", network_name(network)),
            Err(e) => println!("{name}\t(unreadable: {e})"),
        }
    }
    Ok(())
}

async fn balance(app: &App, args: BalanceArgs) -> Result<()> {
    let wallet = app.open(&args.name).await?;
    let total = wallet.balance().await.context("Balance query failed")?;
    println!("{} BTC ({total} sat)", format_btc(total));
    if args.per_address {
        for (address, value) in wallet.address_balances().await.context("Balance query failed")? {
            println!("  {address}\t{}", format_btc(value));
        }
    }
    Ok(())
}

async fn addresses(app: &App, args: NameArgs) -> Result<()> {
    let wallet = app.open(&args.name).await?;
    for account in wallet.accounts() {
        println!("{}\t{}", account.address, account.status);
    }
    Ok(())
}

async fn receive(app: &App, args: NameArgs) -> Result<()> {
    let mut wallet = app.open(&args.name).await?;
    let address = wallet
        .fresh_address()
        .await
        .context("No unused address left (run add-accounts)")?;
    println!("{address}");
    Ok(())
}

async fn add_accounts(app: &App, args: AddAccountsArgs) -> Result<()> {
    if args.count == 0 {
        bail!("Count must be at least 1");
    }
    let mut wallet = app.open(&args.name).await?;
    let added = wallet
        .append_accounts(args.count)
        .await
        .context("Failed to register accounts")?;
    for address in added {
        println!("{address}");
    }
    Ok(())
}

async fn send(app: &App, args: SendArgs) -> Result<()> {
    let mut wallet = app.open(&args.name).await?;
    if args.dry_run {
        let signed = wallet.send(&args.to, args.fee).await.context("Failed to build transaction")?;
        println!("TxID: {}", signed.txid());
        println!("{}", signed.to_hex());
        return Ok(());
    }

    let receipt = wallet
        .send_and_broadcast(&args.to, args.fee)
        .await
        .context("Send failed")?;
    let total: u64 = args.to.iter().map(|(_, v)| v).sum();
    println!("TxID: {}", receipt.txid);
    println!("Sent: {} BTC to {} output(s)", format_btc(total), args.to.len());
    println!("Fee: {} sat", args.fee);
    Ok(())
}

async fn refresh(app: &App, args: NameArgs) -> Result<()> {
    let mut wallet = app.open(&args.name).await?;
    wallet.refresh_status().await.context("Status refresh failed")?;
    for account in wallet.accounts() {
        println!("{}\t{}", account.address, account.status);
    }
    Ok(())
}

async fn delete_account(app: &App, args: DeleteAccountArgs) -> Result<()> {
    let mut wallet = app.open(&args.name).await?;
    let removed = wallet
        .delete_account(&args.address)
        .await
        .with_context(|| format!("Failed to delete account {}", args.address))?;
    println!("Deleted {} ({})", removed.address, removed.status);
    Ok(())
}

async fn delete(app: &App, args: DeleteArgs) -> Result<()> {
    if !args.yes {
        bail!("Deleting {} destroys its keys in the vault; pass --yes to confirm", args.name);
    }
    app.directory
        .delete(&args.name)
        .await
        .with_context(|| format!("Failed to delete wallet {}", args.name))?;
    println!("Deleted wallet {}", args.name);
    Ok(())
}

/// `ADDRESS:SATOSHIS`.
fn parse_recipient(s: &str) -> Result<(String, u64), String> {
    let (address, amount) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected ADDRESS:SATOSHIS, got {s:?}"))?;
    let amount = amount
        .parse::<u64>()
        .map_err(|e| format!("bad amount {amount:?}: {e}"))?;
    if address.is_empty() {
        return Err("empty address".into());
    }
    Ok((address.to_string(), amount))
}

fn format_btc(sats: u64) -> String {
    format!("{}.{:08}", sats / COIN, sats % COIN)
}

fn network_name(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "mainnet",
        Network::Testnet => "testnet",
    }
}

/// Initialize tracing on stderr with the given filter and output format.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
