use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use rust_decimal_macros::dec;
use rwa_market::application::deployment::{DeploymentBootstrapper, DeploymentRecord};
use rwa_market::application::eligibility::SelfService;
use rwa_market::application::orchestrator::PurchaseOrchestrator;
use rwa_market::config::{Config, Network};
use rwa_market::domain::amount::{PAYMENT_DECIMALS, Quantity, TokenAmount};
use rwa_market::domain::listing::AssetListing;
use rwa_market::domain::ports::{AccountStateReaderRef, LedgerClientRef, WorkflowStoreBox};
use rwa_market::domain::workflow::{PurchaseIntent, WorkflowId, WorkflowState};
use rwa_market::infrastructure::dev_ledger::{DEV_BUYER, DEV_DEPLOYER, DevLedger};
use rwa_market::infrastructure::in_memory::InMemoryWorkflowStore;
use rwa_market::interfaces::console::report_writer::ReportWriter;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish the payment program and the asset program bound to it
    Deploy(LedgerArgs),
    /// Deploy, fund the buyer and run a one-unit purchase
    Demo {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[derive(Args)]
struct LedgerArgs {
    /// Target network (overrides RWA_NETWORK)
    #[arg(long)]
    network: Option<String>,

    /// Delay between two polls of a pending operation
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Polls before a pending operation is abandoned
    #[arg(long)]
    max_poll_attempts: Option<u32>,

    /// Observations the local ledger needs before including an operation
    #[arg(long)]
    confirmation_blocks: Option<u32>,
}

impl LedgerArgs {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(network) = &self.network {
            config.network = Some(network.clone());
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(attempts) = self.max_poll_attempts {
            config.max_poll_attempts = attempts;
        }
        if let Some(blocks) = self.confirmation_blocks {
            config.confirmation_blocks = blocks;
        }
        config
    }
}

/// Ledger adapter and reader for the selected network.
struct Connection {
    network: Network,
    client: LedgerClientRef,
    reader: AccountStateReaderRef,
}

fn connect(config: &Config) -> Result<Connection> {
    let network = config.network().into_diagnostic()?;
    info!(%network, "connecting to ledger");
    match network {
        Network::Local => {
            let ledger = DevLedger::new(config.confirmation_blocks);
            Ok(Connection {
                network,
                client: Arc::new(ledger.clone()),
                reader: Arc::new(ledger),
            })
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<WorkflowStoreBox> {
    use rwa_market::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            info!(path = %path.display(), "using RocksDB workflow store");
            Ok(Box::new(RocksDBStore::open(path).into_diagnostic()?))
        }
        None => Ok(Box::new(InMemoryWorkflowStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<WorkflowStoreBox> {
    if db_path.is_some() {
        warn!("built without the storage-rocksdb feature; --db-path ignored");
        eprintln!("WARNING: RocksDB support not compiled in, using in-memory storage");
    }
    Ok(Box::new(InMemoryWorkflowStore::new()))
}

async fn deploy(config: &Config, connection: &Connection) -> Result<DeploymentRecord> {
    let unit_price = TokenAmount::parse_units(dec!(1000), PAYMENT_DECIMALS).into_diagnostic()?;
    let bootstrapper = DeploymentBootstrapper::new(
        connection.client.clone(),
        config.confirmation_policy().into_diagnostic()?,
    );
    let record = bootstrapper
        .deploy(DEV_DEPLOYER, unit_price, true)
        .await
        .into_diagnostic()?;

    let mut writer = ReportWriter::new(io::stdout().lock());
    writer
        .write_deployment(connection.network, &record)
        .into_diagnostic()?;
    Ok(record)
}

async fn print_updates(
    id: WorkflowId,
    mut updates: watch::Receiver<WorkflowState>,
) -> rwa_market::error::Result<()> {
    let mut writer = ReportWriter::new(io::stdout());
    loop {
        let state = updates.borrow_and_update().clone();
        writer.write_status(id, &state)?;
        if state.is_terminal() || updates.changed().await.is_err() {
            return Ok(());
        }
    }
}

async fn demo(config: &Config, connection: &Connection, db_path: Option<PathBuf>) -> Result<()> {
    let record = deploy(config, connection).await?;
    let listing = AssetListing::demo(record.asset_program, record.payment_program).into_diagnostic()?;

    let orchestrator = PurchaseOrchestrator::new(
        connection.client.clone(),
        connection.reader.clone(),
        open_store(db_path)?,
        Box::new(SelfService),
        config.confirmation_policy().into_diagnostic()?,
    )
    .resume_ids()
    .await
    .into_diagnostic()?;

    let funds = TokenAmount::parse_units(dec!(5000), PAYMENT_DECIMALS).into_diagnostic()?;
    orchestrator
        .mint_test_funds(DEV_BUYER, listing.payment_program, DEV_BUYER, funds)
        .await
        .into_diagnostic()?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling workflow");
            interrupt.cancel();
        }
    });

    let ticket = orchestrator
        .begin(PurchaseIntent::new(DEV_BUYER, listing.clone(), Quantity::ONE))
        .await
        .into_diagnostic()?;
    let id = ticket.id();
    let updates = ticket.subscribe();
    let printer = tokio::spawn(print_updates(id, updates));

    let workflow = orchestrator.drive(ticket, &cancel).await.into_diagnostic()?;
    printer.await.into_diagnostic()?.into_diagnostic()?;

    let balance = connection
        .reader
        .balance_of(listing.payment_program, DEV_BUYER)
        .await
        .into_diagnostic()?;
    let units = connection
        .reader
        .holdings_of(listing.asset_program, DEV_BUYER)
        .await
        .into_diagnostic()?;
    ReportWriter::new(io::stdout().lock())
        .write_holdings(DEV_BUYER, balance, units)
        .into_diagnostic()?;

    match workflow.state {
        WorkflowState::Completed => Ok(()),
        state => Err(miette!("purchase {} did not complete: {state}", workflow.id)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Deploy(args) => {
            let config = args.apply(Config::from_env().into_diagnostic()?);
            let connection = connect(&config)?;
            deploy(&config, &connection).await?;
        }
        Command::Demo { ledger, db_path } => {
            let config = ledger.apply(Config::from_env().into_diagnostic()?);
            let connection = connect(&config)?;
            demo(&config, &connection, db_path).await?;
        }
    }
    Ok(())
}
