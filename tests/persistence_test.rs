#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use ledgercore::application::payments::PaymentRequest;
use ledgercore::application::service::BankingCore;
use ledgercore::config::LedgerConfig;
use ledgercore::domain::ids::AccountId;
use ledgercore::domain::money::{Amount, Balance, Currency};
use ledgercore::domain::payment::{Instrument, PaymentState};
use ledgercore::infrastructure::clearing::InlineClearing;
use ledgercore::infrastructure::clock::SystemClock;
use ledgercore::infrastructure::notifier::LogNotifier;
use ledgercore::infrastructure::rocksdb::RocksDBStore;
use std::process::Command;
use std::sync::Arc;
use tempfile::tempdir;

mod common;

fn open_core(store: &RocksDBStore) -> BankingCore {
    BankingCore::new(
        store.stores(),
        LedgerConfig::default(),
        Arc::new(InlineClearing),
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
    )
}

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: open and fund an account
    let journal1 = common::journal(&["open,1", "deposit,1,,100.0"]);
    let output1 = Command::new(cargo_bin!("ledgercore"))
        .arg(journal1.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());
    assert!(String::from_utf8_lossy(&output1.stdout).contains("1,BRL,100,0,100,active"));

    // 2. Second run on the same database: the account already exists
    let journal2 = common::journal(&["open,1", "deposit,1,,50.0"]);
    let output2 = Command::new(cargo_bin!("ledgercore"))
        .arg(journal2.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    assert!(String::from_utf8_lossy(&output2.stderr).contains("already exists"));
    assert!(String::from_utf8_lossy(&output2.stdout).contains("1,BRL,150,0,150,active"));
}

#[tokio::test]
async fn test_payments_and_keys_survive_restart() {
    let dir = tempdir().unwrap();
    let request = PaymentRequest::new(
        AccountId(1),
        Amount::new(2_500).unwrap(),
        Currency::brl(),
        Instrument::Wire,
        "wire-1",
    );

    let payment = {
        let store = RocksDBStore::open(dir.path()).unwrap();
        let core = open_core(&store);
        core.open_account(AccountId(1), None).await.unwrap();
        core.deposit(AccountId(1), Amount::new(10_000).unwrap())
            .await
            .unwrap();
        core.pay(request.clone()).await.unwrap()
    };
    assert_eq!(payment.state, PaymentState::Processing);

    let store = RocksDBStore::open(dir.path()).unwrap();
    let core = open_core(&store);
    assert_eq!(core.payment(payment.id).await.unwrap(), payment);
    assert_eq!(core.pay(request).await.unwrap().id, payment.id);

    let account = core.account(AccountId(1)).await.unwrap();
    assert_eq!(account.held, Balance::new(2_500));
    assert_eq!(account.available, Balance::new(7_500));
}
