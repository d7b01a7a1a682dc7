//! Config load/save error messages, atomic-write safety and init behaviour.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use std::fs;
use tasksheet_core::{config, CoreError};

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
    assert!(err.to_string().contains("tasksheet init"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = config::root_at(home.path());
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn partial_yaml_falls_back_to_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = config::root_at(home.path());
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(
        dir.join("config.yaml"),
        "spreadsheet_id: abc\nworksheet: Спринт\npoll_interval_secs: 5\n",
    )
    .expect("write");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.spreadsheet_id, "abc");
    assert_eq!(loaded.worksheet, "Спринт");
    assert_eq!(loaded.poll_interval_secs, 5);
    assert_eq!(loaded.quota_backoff_secs, 60);
    assert_eq!(loaded.reserved_rows, 1);
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &config::Config::default()).expect("save");

    let tmp = config::config_path_at(home.path()).with_file_name("config.yaml.tmp");
    assert!(!tmp.exists(), ".tmp must be removed after successful save");
}

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &config::Config::default()).expect("save");

    let path = config::config_path_at(home.path());
    let original_bytes = fs::read(&path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = path.with_file_name("config.yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    let current_bytes = fs::read(&path).expect("read after crash");
    assert_eq!(original_bytes, current_bytes, "original must be unchanged after crash");
    assert!(config::load_at(home.path()).is_ok());
}

// ---------------------------------------------------------------------------
// 3. Init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_yaml() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let created = config::init_at(home.path(), Some("sheet-42".to_string()), None).expect("init");
    assert_eq!(created.spreadsheet_id, "sheet-42");

    home.child(".tasksheet/config.yaml")
        .assert(predicate::path::exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = config::config_path_at(home.path());
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

#[test]
fn init_is_idempotent() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::init_at(home.path(), Some("first".to_string()), None).expect("first init");
    let second =
        config::init_at(home.path(), Some("second".to_string()), Some("Other".to_string()))
            .expect("second init");

    // First wins.
    assert_eq!(second.spreadsheet_id, "first");
    assert_eq!(second.worksheet, "Tasks");
}
