use clap::Parser;
use loan_approval::application::commands::ChainBuild;
use loan_approval::application::engine::WorkflowEngine;
use loan_approval::application::scheduler::ChainScheduler;
use loan_approval::domain::ports::ChainStoreBox;
use loan_approval::error::WorkflowError;
use loan_approval::infrastructure::in_memory::{InMemoryChainStore, InMemoryDirectory};
use loan_approval::infrastructure::ledger::InMemoryLedger;
#[cfg(feature = "storage-rocksdb")]
use loan_approval::infrastructure::rocksdb::RocksDBChainStore;
use loan_approval::interfaces::csv::command_reader::{CommandReader, WorkflowRequest};
use loan_approval::interfaces::csv::step_writer::StepWriter;
use loan_approval::interfaces::setup::Setup;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input workflow commands CSV file
    input: PathBuf,

    /// JSON file with settings, chain templates, approvers and loans
    #[arg(long)]
    setup: PathBuf,

    /// Path to persistent database (optional). If provided, approval steps are stored in RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

fn chain_store(db_path: Option<PathBuf>) -> Result<ChainStoreBox> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDBChainStore::open(path).into_diagnostic()?;
            Ok(Box::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Box::new(InMemoryChainStore::new()))
        }
        None => Ok(Box::new(InMemoryChainStore::new())),
    }
}

async fn dispatch(
    engine: &WorkflowEngine,
    scheduler: &ChainScheduler,
    request: WorkflowRequest,
) -> std::result::Result<(), WorkflowError> {
    let outcome = match request {
        WorkflowRequest::Scan => {
            let report = scheduler.run_once().await?;
            for loan_id in report.failed {
                eprintln!("Error processing command: chain construction failed for loan {}", loan_id);
            }
            return Ok(());
        }
        WorkflowRequest::Build(loan_id) => match engine.build_and_assign_chain(loan_id).await? {
            ChainBuild::Created(outcome) => outcome,
            ChainBuild::Skipped { .. } => return Ok(()),
        },
        WorkflowRequest::Approve(cmd) => engine.approve(cmd).await?,
        WorkflowRequest::Reject(cmd) => engine.reject(cmd).await?,
        WorkflowRequest::Undo(cmd) => engine.undo(cmd).await?,
        WorkflowRequest::Reassign(cmd) => engine.reassign(cmd).await?,
    };

    info!(
        loan_id = outcome.loan_id,
        step_id = ?outcome.step_id,
        changes = ?outcome.changes,
        "command applied"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let setup = Setup::from_reader(File::open(&cli.setup).into_diagnostic()?).into_diagnostic()?;
    let directory = InMemoryDirectory::new();
    let ledger = InMemoryLedger::new();
    setup.install(&directory, &ledger).await.into_diagnostic()?;

    let engine = Arc::new(WorkflowEngine::new(
        chain_store(cli.db_path)?,
        Box::new(ledger.clone()),
        Box::new(ledger),
        Box::new(directory),
        setup.settings.clone(),
    ));
    let scheduler = ChainScheduler::new(engine.clone());

    // Process commands
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for request in reader.commands() {
        match request {
            Ok(request) => {
                if let Err(e) = dispatch(&engine, &scheduler, request).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    // Output final state
    let steps = engine.all_steps().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = StepWriter::new(stdout.lock());
    writer.write_steps(steps).into_diagnostic()?;

    Ok(())
}
