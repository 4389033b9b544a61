use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payflow::application::engine::PaymentEngine;
use payflow::application::registry::ProviderRegistry;
use payflow::config::EngineConfig;
use payflow::domain::ports::PaymentRequest;
use payflow::infrastructure::in_memory::{
    InMemoryAuditSink, InMemoryCounterStore, InMemoryPaymentStore, InMemoryTokenStore,
};
use payflow::infrastructure::providers::sandbox_registry;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input payment requests, one JSON object per line
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    let registry = Arc::new(sandbox_registry());

    let engine = if let Some(db_path) = &cli.db_path {
        persistent_engine(db_path, registry, config)?
    } else {
        PaymentEngine::new(
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(InMemoryCounterStore::new()),
            Arc::new(InMemoryAuditSink::new()),
            registry,
            config,
        )
    };

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = BufReader::new(file);

    println!("payment_id,provider,status");
    for (index, line) in reader.lines().enumerate() {
        let line = line.into_diagnostic()?;
        if line.trim().is_empty() {
            continue;
        }
        let mut request: PaymentRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("Error reading request on line {}: {}", index + 1, e);
                continue;
            }
        };

        // Simulate the client confirmation round-trip: issue a token for
        // this session/amount and echo it back on the charge.
        let token = match engine
            .issue_confirmation(&request.session_id, request.amount, request.currency.clone())
            .await
        {
            Ok(token) => token,
            Err(e) => {
                eprintln!("Error issuing confirmation: {} ({})", e, e.code());
                continue;
            }
        };
        request.confirmation_token = token.token;

        match engine.create_payment(request).await {
            Ok(payment) => {
                println!("{},{},{}", payment.id, payment.provider, payment.status);
            }
            Err(e) => {
                eprintln!("Error processing payment: {} ({})", e, e.code());
            }
        }
    }

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn persistent_engine(
    db_path: &Path,
    registry: Arc<ProviderRegistry>,
    config: EngineConfig,
) -> Result<PaymentEngine> {
    let store = payflow::infrastructure::rocksdb::RocksDbStore::open(db_path).into_diagnostic()?;
    Ok(PaymentEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store),
        registry,
        config,
    ))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn persistent_engine(
    _db_path: &Path,
    _registry: Arc<ProviderRegistry>,
    _config: EngineConfig,
) -> Result<PaymentEngine> {
    Err(miette::miette!(
        "--db-path requires a build with the storage-rocksdb feature"
    ))
}
