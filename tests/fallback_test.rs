use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let mut cmd = Command::new(cargo_bin!("deposit-escrow"));
    cmd.arg("capture")
        .arg("--orders")
        .arg("tests/fixtures/orders.csv")
        .arg("--policies")
        .arg("tests/fixtures/policies.csv")
        .arg("--now")
        .arg("2026-03-01T00:00:00Z")
        .arg("--db-path")
        .arg("some_db");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."))
        .stdout(predicate::str::contains("\"captured\": 1"));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("deposit-escrow"));
    cmd.arg("capture")
        .arg("--orders")
        .arg("tests/fixtures/orders.csv")
        .arg("--policies")
        .arg("tests/fixtures/policies.csv")
        .arg("--now")
        .arg("2026-03-01T00:00:00Z")
        .arg("--db-path")
        .arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING").not())
        .stdout(predicate::str::contains("\"captured\": 1"));
}
