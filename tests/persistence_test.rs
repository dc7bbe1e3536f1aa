#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: seed the ledger and complete booking 1
    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "event, target, session, amount, minutes").unwrap();
    writeln!(csv1, "complete, 1,,,").unwrap();

    let mut cmd1 = Command::new(cargo_bin!("settlement-engine"));
    cmd1.arg("run")
        .arg(csv1.path())
        .args(["--ledger", "tests/fixtures/ledger.json"])
        .args(["--now", "2026-03-02T12:00:00Z"])
        .arg("--db-path")
        .arg(&db_path);

    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("1,booking:1,session_completion,10000,tr_sim_1,pending"));

    // 2. Second run against the same DB, without re-seeding: the repeat is a no-op
    // and the bundle session gets the next attempt id.
    let mut csv2 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv2, "event, target, session, amount, minutes").unwrap();
    writeln!(csv2, "complete, 1,,,").unwrap();
    writeln!(csv2, "session, 1, 1,, 90").unwrap();

    // Payout accounts are not persisted, so the second run registers them again.
    let mut accounts = tempfile::NamedTempFile::new().unwrap();
    writeln!(accounts, r#"{{ "payout_accounts": {{ "7": "acct_1NvProvider" }} }}"#).unwrap();

    let mut cmd2 = Command::new(cargo_bin!("settlement-engine"));
    cmd2.arg("run")
        .arg(csv2.path())
        .arg("--ledger")
        .arg(accounts.path())
        .args(["--now", "2026-03-02T12:00:00Z"])
        .arg("--db-path")
        .arg(&db_path);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);

    assert_eq!(stdout2.lines().count(), 3);
    assert!(stdout2.contains("1,booking:1,session_completion,10000,tr_sim_1,pending"));
    assert!(stdout2.contains("2,bundle:1,bundle_session_payout,85000,"));
}
