//! CLI tests for `migrator check`, `migrator migrate` and `migrator init-config`.
//!
//! Spawns the migrator binary and verifies exit codes, summary output and the
//! snapshot written back.

use std::fs;
use std::process::Command;

use migrator::core::types::StaticType;
use migrator::core::value::Value;
use migrator::exit_codes;
use migrator::io::config::{MigratorConfig, load_config};
use migrator::io::snapshot::{StorageSnapshot, load_snapshot};
use migrator::report::{RunStop, load_report};
use migrator::test_support::{SnapshotFixture, catalog, entitled, reference, resource, snapshot_entry};

fn holder(slot: u64, declared: StaticType) -> Value {
    resource(slot, "Holder", vec![("vault", reference(slot + 100, declared))])
}

fn clean_snapshot() -> StorageSnapshot {
    let vault_ref = || StaticType::unauthorized_reference(StaticType::leaf("Vault"));
    StorageSnapshot {
        entitlements: catalog(&[("Vault", &["Withdraw", "Deposit"])]),
        entries: vec![
            snapshot_entry(1, "a", holder(1, vault_ref())),
            snapshot_entry(2, "b", holder(2, vault_ref())),
        ],
    }
}

fn broken_snapshot() -> StorageSnapshot {
    let mut snapshot = clean_snapshot();
    snapshot
        .entries
        .push(snapshot_entry(3, "broken", holder(3, StaticType::leaf("Vault"))));
    snapshot
}

#[test]
fn check_reports_changes_without_writing() {
    let fixture = SnapshotFixture::new(&clean_snapshot()).expect("fixture");
    let before = fs::read_to_string(fixture.path()).expect("read");
    let report_path = fixture.dir().join("report.json");

    let output = Command::new(env!("CARGO_BIN_EXE_migrator"))
        .current_dir(fixture.dir())
        .arg("check")
        .arg(fixture.path())
        .arg("--report")
        .arg(&report_path)
        .output()
        .expect("migrator check");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains(
            "report: stop=completed total=2 processed=2 changed=2 unchanged=0 failed=0 writes=0 commits=0 dry_run"
        ),
        "stdout: {stdout}"
    );
    assert_eq!(fs::read_to_string(fixture.path()).expect("read"), before);

    let report = load_report(&report_path).expect("report");
    assert!(report.dry_run);
    assert_eq!(report.stop, Some(RunStop::Completed));
}

#[test]
fn migrate_writes_entitled_snapshot() {
    let fixture = SnapshotFixture::new(&clean_snapshot()).expect("fixture");

    let status = Command::new(env!("CARGO_BIN_EXE_migrator"))
        .current_dir(fixture.dir())
        .arg("migrate")
        .arg(fixture.path())
        .status()
        .expect("migrator migrate");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let migrated = load_snapshot(fixture.path()).expect("load migrated");
    assert_eq!(migrated.entries.len(), 2);
    let Value::Composite(holder) = &migrated.entries[0].value else {
        panic!("expected composite");
    };
    let Some(Value::Reference(field)) = holder.field("vault") else {
        panic!("expected reference");
    };
    assert_eq!(field.authorization, entitled(&["Deposit", "Withdraw"]));

    // A second migration finds nothing to do.
    let output = Command::new(env!("CARGO_BIN_EXE_migrator"))
        .current_dir(fixture.dir())
        .arg("migrate")
        .arg(fixture.path())
        .output()
        .expect("migrator migrate again");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("changed=0 unchanged=2"));
}

#[test]
fn entry_failures_exit_with_failures_code() {
    let fixture = SnapshotFixture::new(&broken_snapshot()).expect("fixture");
    let output_path = fixture.dir().join("migrated.json");

    let output = Command::new(env!("CARGO_BIN_EXE_migrator"))
        .current_dir(fixture.dir())
        .args(["migrate", "--workers", "2", "--output"])
        .arg(&output_path)
        .arg(fixture.path())
        .output()
        .expect("migrator migrate");

    assert_eq!(output.status.code(), Some(exit_codes::FAILURES));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("failed=1"), "stdout: {stdout}");
    assert!(stdout.contains("report: failure 0x0000000000000003/storage/broken"));

    // Healthy entries were still migrated and written to the output file.
    let migrated = load_snapshot(&output_path).expect("load output");
    assert_eq!(migrated.entries.len(), 3);
}

#[test]
fn invalid_snapshot_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("snapshot.json");
    fs::write(&path, r#"{"entries": "nope"}"#).expect("write");

    let output = Command::new(env!("CARGO_BIN_EXE_migrator"))
        .current_dir(temp.path())
        .arg("check")
        .arg(&path)
        .output()
        .expect("migrator check");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("schema validation failed"));
}

#[test]
fn init_config_writes_defaults_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = Command::new(env!("CARGO_BIN_EXE_migrator"))
        .current_dir(temp.path())
        .arg("init-config")
        .status()
        .expect("migrator init-config");
    assert_eq!(status.code(), Some(exit_codes::OK));
    let config = load_config(&temp.path().join("migrator.toml")).expect("config");
    assert_eq!(config, MigratorConfig::default());

    let status = Command::new(env!("CARGO_BIN_EXE_migrator"))
        .current_dir(temp.path())
        .arg("init-config")
        .status()
        .expect("migrator init-config again");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn invalid_config_exits_invalid() {
    let fixture = SnapshotFixture::new(&clean_snapshot()).expect("fixture");
    fs::write(fixture.dir().join("migrator.toml"), "batch_size = 0\n").expect("write config");

    let status = Command::new(env!("CARGO_BIN_EXE_migrator"))
        .current_dir(fixture.dir())
        .arg("check")
        .arg(fixture.path())
        .status()
        .expect("migrator check");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}
