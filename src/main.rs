use ajo_ledger::application::engine::{AjoEngine, ContributionRequest};
use ajo_ledger::config::EngineConfig;
use ajo_ledger::domain::ports::LedgerStoreRef;
use ajo_ledger::error::LedgerError;
use ajo_ledger::infrastructure::in_memory::{InMemoryKycDirectory, InMemoryLedgerStore};
#[cfg(feature = "storage-rocksdb")]
use ajo_ledger::infrastructure::rocksdb::RocksDBStore;
use ajo_ledger::interfaces::csv::command_reader::{Command, CommandReader};
use ajo_ledger::interfaces::csv::report_writer::ReportWriter;
use ajo_ledger::telemetry;
use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    /// Final wallet balances.
    Wallets,
    /// Every cycle of every group.
    Cycles,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Engine configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Report written to stdout after processing
    #[arg(long, value_enum, default_value_t = Output::Wallets)]
    output: Output,
}

fn build_store(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(path) = db_path {
        let store = RocksDBStore::open(path).into_diagnostic()?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }

    Ok(Arc::new(InMemoryLedgerStore::new()))
}

async fn execute(
    engine: &AjoEngine,
    kyc: &InMemoryKycDirectory,
    command: Command,
) -> ajo_ledger::error::Result<()> {
    match command {
        Command::KycSubmit { user } => kyc.submit(user).await,
        Command::KycVerify { user } => kyc.verify(user).await,
        Command::KycReject { user } => kyc.reject(user).await,
        Command::Fund { user, amount } => {
            engine.fund(user, amount).await?;
        }
        Command::Withdraw { user, amount } => {
            engine.withdraw(user, amount).await?;
        }
        Command::Create {
            owner,
            title,
            amount,
            frequency,
        } => {
            engine.create_group(owner, &title, amount, frequency).await?;
        }
        Command::Join { group, user } => {
            engine.join(group, user).await?;
        }
        Command::Activate { group, user } => {
            engine.activate(group, user).await?;
        }
        Command::Contribute {
            request,
            group,
            user,
            amount,
        } => {
            engine
                .contribute(ContributionRequest {
                    request,
                    group,
                    user,
                    amount,
                })
                .await?;
        }
        Command::Payout { group } => {
            let open = engine
                .group_view(group)
                .await?
                .open_cycle
                .ok_or_else(|| LedgerError::InvalidState(format!("group {group} has no open cycle")))?;
            engine.close_payout(group, open.cycle_number).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    telemetry::init(&config.log_filter);

    let store = build_store(cli.db_path)?;
    let kyc = InMemoryKycDirectory::new();
    let engine = AjoEngine::new(store, Arc::new(kyc.clone()), config);

    // Process commands
    let file = File::open(&cli.input).into_diagnostic()?;
    for (index, command) in CommandReader::new(file).commands().enumerate() {
        let row = index + 1;
        match command {
            Ok(command) => {
                if let Err(error) = execute(&engine, &kyc, command).await {
                    warn!(row, %error, "Error processing command");
                }
            }
            Err(error) => warn!(row, %error, "Error reading command"),
        }
    }

    // Output final state
    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    match cli.output {
        Output::Wallets => {
            let wallets = engine.all_wallets().await.into_diagnostic()?;
            writer.write_wallets(wallets).into_diagnostic()?;
        }
        Output::Cycles => {
            let cycles = engine.all_cycles().await.into_diagnostic()?;
            writer.write_cycles(cycles).into_diagnostic()?;
        }
    }

    Ok(())
}
