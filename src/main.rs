use clap::Parser;
use ledgercore::application::service::BankingCore;
use ledgercore::config::LedgerConfig;
use ledgercore::domain::money::Currency;
use ledgercore::domain::ports::Stores;
use ledgercore::infrastructure::clearing::InlineClearing;
use ledgercore::infrastructure::clock::SystemClock;
use ledgercore::infrastructure::notifier::LogNotifier;
use ledgercore::interfaces::csv::account_writer::AccountWriter;
use ledgercore::interfaces::csv::journal_reader::JournalReader;
use ledgercore::interfaces::replay::Replayer;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "Replays a ledger journal and prints the final balances", long_about = None)]
struct Cli {
    /// Input journal CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long, env = "LEDGER_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Currency of accounts opened without one
    #[arg(long, env = "LEDGER_CURRENCY", default_value = "BRL")]
    currency: String,

    /// Card authorization lifetime in seconds
    #[arg(long, env = "LEDGER_CARD_HOLD_TTL", default_value_t = 7 * 24 * 3600)]
    card_hold_ttl: i64,

    /// Payment debit lifetime in seconds
    #[arg(long, env = "LEDGER_PAYMENT_HOLD_TTL", default_value_t = 3 * 24 * 3600)]
    payment_hold_ttl: i64,

    /// Idempotency key retention in seconds
    #[arg(long, env = "LEDGER_IDEMPOTENCY_RETENTION", default_value_t = 24 * 3600)]
    idempotency_retention: i64,

    /// Version-conflict retries before giving up
    #[arg(long, env = "LEDGER_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Log filter, e.g. `info` or `ledgercore=debug`
    #[arg(long, env = "LEDGER_LOG", default_value = "warn")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> Result<LedgerConfig> {
        Ok(LedgerConfig {
            currency: Currency::new(&self.currency).into_diagnostic()?,
            card_hold_ttl: chrono::Duration::seconds(self.card_hold_ttl),
            payment_hold_ttl: chrono::Duration::seconds(self.payment_hold_ttl),
            idempotency_retention: chrono::Duration::seconds(self.idempotency_retention),
            max_retries: self.max_retries,
            ..LedgerConfig::default()
        })
    }

    #[cfg(feature = "storage-rocksdb")]
    fn stores(&self) -> Result<Stores> {
        use ledgercore::infrastructure::rocksdb::RocksDBStore;

        match &self.db_path {
            Some(path) => Ok(RocksDBStore::open(path).into_diagnostic()?.stores()),
            None => Ok(Stores::in_memory()),
        }
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    fn stores(&self) -> Result<Stores> {
        Ok(Stores::in_memory())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_str())
        .with_writer(io::stderr)
        .init();

    let core = BankingCore::new(
        cli.stores()?,
        cli.config()?,
        Arc::new(InlineClearing),
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
    );
    let mut replayer = Replayer::new(core);

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = JournalReader::new(file);
    for (line, record) in reader.records().enumerate() {
        let outcome = match record {
            Ok(record) => replayer.apply(&record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            // Header is line 1.
            eprintln!("Error at line {}: [{}] {}", line + 2, e.reason_code(), e);
        }
    }

    let accounts = replayer.accounts().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(&accounts).into_diagnostic()?;

    Ok(())
}
