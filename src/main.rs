use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use settlement_engine::application::ledger::SettlementLedger;
use settlement_engine::application::orchestrator::TransferOrchestrator;
use settlement_engine::config::{ProcessorKind, SettlementConfig};
use settlement_engine::domain::fees::{FeeCalculator, VatSplit};
use settlement_engine::domain::ports::{
    ClockRef, LedgerStoreRef, PaymentProcessorRef, TransferLogRef,
};
use settlement_engine::infrastructure::clock::{FixedClock, SystemClock};
use settlement_engine::infrastructure::in_memory::{
    InMemoryLedger, InMemoryPayoutRegistry, InMemoryTransferLog,
};
#[cfg(feature = "storage-rocksdb")]
use settlement_engine::infrastructure::rocksdb::RocksDBStore;
use settlement_engine::infrastructure::simulated::SimulatedProcessor;
use settlement_engine::infrastructure::stripe::StripeProcessor;
use settlement_engine::interfaces::csv::attempt_writer::AttemptWriter;
use settlement_engine::interfaces::csv::event_reader::{EventReader, SettlementEvent};
use settlement_engine::interfaces::seed::LedgerSeed;
use settlement_engine::logging::init_logger;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug-level logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the fee breakdown for a base price as JSON
    Quote {
        /// Provider's price in minor units
        #[arg(long)]
        base_price: i64,

        /// Quote a bundle with this many sessions instead of a single booking
        #[arg(long)]
        sessions: Option<u32>,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Feed completion events to the orchestrator and print the transfer attempt log
    Run {
        /// Input events CSV file
        input: PathBuf,

        /// JSON ledger seed (bookings, bundles, payout accounts)
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Fixed "now" for eligibility checks, RFC 3339
        #[arg(long)]
        now: Option<DateTime<Utc>>,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Transfer every due booking after the events are processed
        #[arg(long)]
        sweep: bool,
    },
}

#[derive(Serialize)]
struct Quote<T: Serialize> {
    #[serde(flatten)]
    breakdown: T,
    vat: VatSplit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose, cli.log_json);

    match cli.command {
        Command::Quote {
            base_price,
            sessions,
            config,
        } => quote(base_price, sessions, load_config(config)?),
        Command::Run {
            input,
            ledger,
            now,
            config,
            db_path,
            sweep,
        } => run(input, ledger, now, load_config(config)?, db_path, sweep).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<SettlementConfig> {
    match path {
        Some(path) => SettlementConfig::load(path).into_diagnostic(),
        None => Ok(SettlementConfig::default()),
    }
}

fn quote(base_price: i64, sessions: Option<u32>, config: SettlementConfig) -> Result<()> {
    let calculator = FeeCalculator::new(config.fees);
    let json = match sessions {
        Some(count) => {
            let breakdown = calculator
                .compute_for_bundle(base_price, count)
                .into_diagnostic()?;
            let vat = calculator
                .vat_split(breakdown.fees.platform_margin_minor)
                .into_diagnostic()?;
            serde_json::to_string_pretty(&Quote { breakdown, vat })
        }
        None => {
            let breakdown = calculator.compute_for_single(base_price).into_diagnostic()?;
            let vat = calculator
                .vat_split(breakdown.platform_margin_minor)
                .into_diagnostic()?;
            serde_json::to_string_pretty(&Quote { breakdown, vat })
        }
    }
    .into_diagnostic()?;
    println!("{}", json);
    Ok(())
}

async fn run(
    input: PathBuf,
    seed: Option<PathBuf>,
    now: Option<DateTime<Utc>>,
    config: SettlementConfig,
    db_path: Option<PathBuf>,
    sweep: bool,
) -> Result<()> {
    let (store, attempts) = open_stores(db_path)?;
    let accounts = InMemoryPayoutRegistry::new();
    let clock: ClockRef = match now {
        Some(now) => Arc::new(FixedClock::new(now)),
        None => Arc::new(SystemClock),
    };

    let ledger = SettlementLedger::new(store.clone(), FeeCalculator::new(config.fees.clone()));
    if let Some(seed) = seed {
        LedgerSeed::load(seed)
            .into_diagnostic()?
            .apply(&ledger, &accounts)
            .await
            .into_diagnostic()?;
    }

    let orchestrator = TransferOrchestrator::new(
        store,
        attempts.clone(),
        build_processor(&config)?,
        Arc::new(accounts),
        clock,
        &config.payout,
    );
    info!(policy = orchestrator.policy_name(), "Orchestrator ready");

    let file = File::open(input).into_diagnostic()?;
    for event in EventReader::new(file).events() {
        match event {
            Ok(event) => match apply_event(&orchestrator, &event).await {
                Ok(()) => {}
                Err(e) if e.is_benign() => {
                    info!(?event, reason = %e, "Event already handled");
                }
                Err(e) => eprintln!("Error processing event {:?}: {}", event, e),
            },
            Err(e) => eprintln!("Error reading event: {}", e),
        }
    }

    if sweep {
        let report = orchestrator.sweep_due_bookings().await.into_diagnostic()?;
        for (booking_id, reason) in report.failed {
            eprintln!("Error transferring booking {}: {}", booking_id, reason);
        }
    }

    let log = attempts.all_attempts().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AttemptWriter::new(stdout.lock());
    writer.write_attempts(&log).into_diagnostic()?;

    Ok(())
}

async fn apply_event(
    orchestrator: &TransferOrchestrator,
    event: &SettlementEvent,
) -> settlement_engine::error::Result<()> {
    match *event {
        SettlementEvent::Complete { booking_id } => orchestrator
            .transfer_for_completed_booking(booking_id)
            .await
            .map(|_| ()),
        SettlementEvent::Session {
            bundle_id,
            session_id,
            duration_minutes,
        } => orchestrator
            .transfer_bundle_session_installment(bundle_id, session_id, duration_minutes)
            .await
            .map(|_| ()),
        SettlementEvent::Compensate {
            booking_id,
            amount_minor,
        } => orchestrator
            .transfer_cancellation_compensation(booking_id, amount_minor)
            .await
            .map(|_| ()),
    }
}

fn build_processor(config: &SettlementConfig) -> Result<PaymentProcessorRef> {
    match config.processor.kind {
        ProcessorKind::Simulated => Ok(Arc::new(SimulatedProcessor::new())),
        ProcessorKind::Stripe => {
            let secret_key = config.processor.secret_key().into_diagnostic()?;
            let processor = StripeProcessor::new(
                &config.processor.api_base,
                secret_key,
                config.payout.processor_timeout(),
            )
            .into_diagnostic()?;
            Ok(Arc::new(processor))
        }
    }
}

fn in_memory_stores() -> (LedgerStoreRef, TransferLogRef) {
    let ledger: LedgerStoreRef = Arc::new(InMemoryLedger::new());
    let attempts: TransferLogRef = Arc::new(InMemoryTransferLog::new());
    (ledger, attempts)
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(LedgerStoreRef, TransferLogRef)> {
    match db_path {
        Some(db_path) => {
            let store = RocksDBStore::open(db_path).into_diagnostic()?;
            let ledger: LedgerStoreRef = Arc::new(store.clone());
            let attempts: TransferLogRef = Arc::new(store);
            Ok((ledger, attempts))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(LedgerStoreRef, TransferLogRef)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}
