#![allow(dead_code)]

use ledgercore::application::service::BankingCore;
use ledgercore::config::LedgerConfig;
use ledgercore::domain::ids::{AccountId, CardId};
use ledgercore::domain::money::Amount;
use ledgercore::domain::ports::Stores;
use ledgercore::infrastructure::clearing::InlineClearing;
use ledgercore::infrastructure::clock::ManualClock;
use ledgercore::infrastructure::notifier::LogNotifier;
use rand::Rng;
use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const HEADER: &str = "op,account,card,amount,currency,instrument,key,destination,reason";

/// Writes `rows` under the journal header into a temporary file.
pub fn journal(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create journal");
    writeln!(file, "{HEADER}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file
}

/// Random deposits and instant transfers across `accounts` accounts.
pub fn generate_journal(path: &Path, accounts: u32, rows: usize) -> Result<(), Error> {
    let mut rng = rand::thread_rng();
    let mut wtr = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(File::create(path)?);
    wtr.write_record(HEADER.split(','))?;

    for account in 1..=accounts {
        wtr.write_record(["open", &account.to_string()])?;
    }
    for i in 0..rows {
        let account = rng.gen_range(1..=accounts).to_string();
        let amount = format!("{}.{:02}", rng.gen_range(0..100), rng.gen_range(1..100));
        if rng.gen_bool(0.5) {
            wtr.write_record(["deposit", &account, "", &amount])?;
        } else {
            let destination = rng.gen_range(1..=accounts).to_string();
            let key = format!("p-{i}");
            wtr.write_record([
                "pay",
                &account,
                "",
                &amount,
                "",
                "instant-transfer",
                &key,
                &destination,
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// A core on in-memory stores driven by a manual clock, with account 1
/// holding `balance` and card 7 on it limited to `card_limit`.
pub async fn funded_core(balance: i64, card_limit: i64) -> (Arc<BankingCore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let core = BankingCore::new(
        Stores::in_memory(),
        LedgerConfig::default(),
        Arc::new(InlineClearing),
        Arc::new(LogNotifier),
        clock.clone(),
    );
    core.open_account(AccountId(1), None).await.unwrap();
    core.open_account(AccountId(2), None).await.unwrap();
    if balance > 0 {
        core.deposit(AccountId(1), Amount::new(balance).unwrap())
            .await
            .unwrap();
    }
    core.issue_card(CardId(7), AccountId(1), Amount::new(card_limit).unwrap())
        .await
        .unwrap();
    (Arc::new(core), clock)
}
