#![cfg(feature = "storage-rocksdb")]

mod common;

use assert_cmd::cargo_bin;
use common::commands_csv;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // First run: a sale and a payout left pending at the processor.
    let first = commands_csv(&[
        "sale, alice, 1000, order-1,,",
        "bank, alice, , , 0123456789, 058",
        "payout, alice, 500, key-1,,",
    ]);
    let output = Command::new(cargo_bin!("wallet-ledger"))
        .arg(first.path())
        .arg("--db-path")
        .arg(&db_path)
        .args(["--settlement", "pending"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("alice,400.00,500.00,900.00,active"), "{stdout}");

    // Second run: a replayed sale is ignored, a new one is credited.
    let second = commands_csv(&["sale, alice, 1000, order-1,,", "sale, alice, 100, order-2,,"]);
    let output = Command::new(cargo_bin!("wallet-ledger"))
        .arg(second.path())
        .arg("--db-path")
        .arg(&db_path)
        .args(["--settlement", "pending"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("alice,490.00,500.00,990.00,active"), "{stdout}");
}
