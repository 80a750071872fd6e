use assert_cmd::cargo_bin;
use std::process::Command;

mod common;

#[test]
fn test_large_journal_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("large.csv");
    common::generate_journal(&journal, 50, 20_000).expect("Failed to generate journal");

    let output = Command::new(cargo_bin!("ledgercore"))
        .arg(&journal)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "Binary failed to replay large journal");

    // Header plus one row per account
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 51);
}
