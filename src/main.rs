use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tagpay_ussd::application::audit::AuditEmitter;
use tagpay_ussd::application::credentials::PinVault;
use tagpay_ussd::application::engine::{BANK_PAGE_SIZE, UssdEngine};
use tagpay_ussd::application::sessions::{SessionManager, start_sweep_task};
use tagpay_ussd::config::{DirectoryArgs, ServeArgs};
use tagpay_ussd::domain::ports::{
    AuditLogHandle, BankDirectory, BankDirectoryHandle, CredentialVerifierHandle, LedgerHandle,
    PinRecordStoreHandle, SessionStoreHandle,
};
use tagpay_ussd::infrastructure::in_memory::{
    InMemoryAuditLog, InMemoryPinStore, InMemorySessionStore,
};
use tagpay_ussd::infrastructure::tagpay::TagPayClient;
use tagpay_ussd::interfaces::http::{AppState, router};
use tagpay_ussd::telemetry::init_logging;
use tracing::{info, warn};

const SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the USSD callback over HTTP
    Serve(Box<ServeArgs>),
    /// Search the bank directory
    Banks {
        /// Case-insensitive part of the bank name
        #[arg(long, default_value = "")]
        search: String,

        /// Page to show, starting at 1
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = BANK_PAGE_SIZE)]
        page_size: usize,

        #[command(flatten)]
        directory: DirectoryArgs,
    },
}

struct Stores {
    sessions: SessionStoreHandle,
    audit: AuditLogHandle,
    pins: PinRecordStoreHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(*args).await,
        Command::Banks {
            search,
            page,
            page_size,
            directory,
        } => {
            let directory = directory.load().into_diagnostic()?;
            let page_size = page_size.max(1);
            let found = directory.search(&search, page.saturating_sub(1), page_size);
            if found.is_empty() {
                println!("No banks found");
                return Ok(());
            }
            for bank in &found.banks {
                println!("{:<40} {}", bank.name, bank.code);
            }
            println!(
                "Page {} of {} ({} banks)",
                found.page + 1,
                found.total.div_ceil(page_size),
                found.total
            );
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let policy = args.policy().into_diagnostic()?;
    let banks: BankDirectoryHandle = Arc::new(args.directory.load().into_diagnostic()?);
    let ledger: LedgerHandle =
        Arc::new(TagPayClient::new(args.ledger_settings()).into_diagnostic()?);
    let stores = open_stores(args.db_path.as_deref())?;

    let sessions = Arc::new(SessionManager::new(stores.sessions, args.session_ttl()));
    let credentials: CredentialVerifierHandle = Arc::new(PinVault::new(
        stores.pins,
        args.pin_max_attempts,
        args.pin_lockout(),
    ));
    let engine = Arc::new(UssdEngine::new(
        sessions.clone(),
        ledger,
        credentials,
        stores.audit.clone(),
        banks,
        policy,
    ));

    if args.inbound_secret.is_none() {
        warn!("No inbound secret configured, callbacks are not authenticated");
    }
    let state = AppState::new(
        engine,
        AuditEmitter::new(stores.audit.clone()),
        stores.audit,
        args.inbound_secret,
    );

    start_sweep_task(sessions, SWEEP_PERIOD);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .into_diagnostic()?;
    info!(address = %args.listen, "Listening for USSD callbacks");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<&Path>) -> Result<Stores> {
    use tagpay_ussd::infrastructure::rocksdb::RocksDBStore;

    let Some(db_path) = db_path else {
        return Ok(in_memory_stores());
    };
    let store = RocksDBStore::open(db_path).into_diagnostic()?;
    info!(path = %db_path.display(), "Using RocksDB storage");
    Ok(Stores {
        sessions: Arc::new(store.clone()),
        audit: Arc::new(store.clone()),
        pins: Arc::new(store),
    })
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<&Path>) -> Result<Stores> {
    if db_path.is_some() {
        warn!("Built without storage-rocksdb, ignoring --db-path and keeping state in memory");
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> Stores {
    Stores {
        sessions: Arc::new(InMemorySessionStore::new()),
        audit: Arc::new(InMemoryAuditLog::new()),
        pins: Arc::new(InMemoryPinStore::new()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
