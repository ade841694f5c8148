//! Concurrency tests for nourish_cli.
//!
//! These tests verify that multiple processes can safely append to and
//! rewrite the same tables and settings file (file locking).

use assert_cmd::Command;
use std::path::PathBuf;
use std::thread;
use tempfile::TempDir;

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("nourish"))
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn count_rows(data_dir: &PathBuf, table: &str) -> usize {
    let path = data_dir.join("tables").join(format!("{}.jsonl", table));
    let content = std::fs::read_to_string(path).expect("Failed to read table");
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        serde_json::from_str::<serde_json::Value>(line).expect("row should be valid JSON");
    }
    content.lines().filter(|l| !l.trim().is_empty()).count()
}

#[test]
fn test_concurrent_weight_logging() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    let handles: Vec<_> = (1..=4)
        .map(|day| {
            let data_dir = data_dir.clone();
            thread::spawn(move || {
                cli()
                    .args(["weight", "log", "75"])
                    .arg("--date")
                    .arg(format!("2024-06-0{}", day))
                    .arg("--data-dir")
                    .arg(&data_dir)
                    .assert()
                    .success();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread");
    }

    assert_eq!(count_rows(&data_dir, "weight_entries"), 4);
}

#[test]
fn test_concurrent_category_adds() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    let handles: Vec<_> = ["Fruits", "Nuts", "Grains"]
        .into_iter()
        .map(|name| {
            let data_dir = data_dir.clone();
            thread::spawn(move || {
                cli()
                    .args(["category", "add", name])
                    .arg("--data-dir")
                    .arg(&data_dir)
                    .assert()
                    .success();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread");
    }

    assert_eq!(count_rows(&data_dir, "food_categories"), 3);

    // Readers see a consistent table afterwards
    cli()
        .arg("plan")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();
}

#[test]
fn test_concurrent_settings_writes_keep_all_keys() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    let handles: Vec<_> = ["units", "theme", "reminders", "language"]
        .into_iter()
        .map(|key| {
            let data_dir = data_dir.clone();
            thread::spawn(move || {
                cli()
                    .args(["settings", "set", key, "on"])
                    .arg("--data-dir")
                    .arg(&data_dir)
                    .assert()
                    .success();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread");
    }

    let content = std::fs::read_to_string(data_dir.join("settings.json")).unwrap();
    let values: serde_json::Value = serde_json::from_str(&content).unwrap();
    for key in ["units", "theme", "reminders", "language"] {
        assert_eq!(values[key], "on", "missing {}", key);
    }
}
