//! Integration tests for the medrem binary.
//!
//! These tests verify end-to-end behavior including:
//! - Adding medicines and scheduling doses
//! - Taking, skipping and sweeping doses
//! - Export, import and reports
//! - Achievements announced on the console

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the path to the CLI binary
fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("medrem"))
}

/// CLI pinned to a fixed local time against `data_dir`
fn cli_at(data_dir: &Path, at: &str) -> Command {
    let mut cmd = cli();
    cmd.arg("--data-dir").arg(data_dir).arg("--at").arg(at);
    cmd
}

fn read_store(data_dir: &Path) -> Value {
    let content = fs::read_to_string(data_dir.join("medrem.json")).expect("Failed to read store");
    serde_json::from_str(&content).expect("store is valid JSON")
}

fn add_aspirin(data_dir: &Path) {
    cli_at(data_dir, "2024-01-01T07:00")
        .args(["add", "--name", "Aspirin", "--dosage", "100mg"])
        .args(["--time", "08:00", "--time", "20:00"])
        .args(["--start", "2024-01-01", "--days", "3"])
        .assert()
        .success();
}

fn event_ids(store: &Value) -> Vec<String> {
    store["dose_events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Medicine reminder and adherence tracker",
        ));
}

#[test]
fn test_add_schedules_doses() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli_at(data_dir, "2024-01-01T07:00")
        .args(["add", "--name", "Aspirin", "--dosage", "100mg"])
        .args(["--time", "08:00", "--time", "20:00"])
        .args(["--start", "2024-01-01", "--days", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added Aspirin"))
        .stdout(predicate::str::contains("6 doses scheduled"))
        .stdout(predicate::str::contains("Achievement unlocked: First Step"));

    let store = read_store(data_dir);
    assert_eq!(store["medicines"].as_array().unwrap().len(), 1);
    let events = store["dose_events"].as_array().unwrap();
    assert_eq!(events.len(), 6);
    assert!(events.iter().all(|e| e["status"] == "pending"));
    assert_eq!(store["achievements"].as_array().unwrap().len(), 12);
}

#[test]
fn test_invalid_medicine_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli_at(data_dir, "2024-01-01T07:00")
        .args(["add", "--name", "Aspirin", "--dosage", "100mg"])
        .args(["--frequency", "twice", "--time", "08:00"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Validation"));

    let store = read_store(data_dir);
    assert!(store["medicines"].as_array().unwrap().is_empty());
    assert!(store["dose_events"].as_array().unwrap().is_empty());
}

#[test]
fn test_today_lists_doses() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    cli_at(data_dir, "2024-01-02T09:00")
        .arg("today")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tuesday 2024-01-02"))
        .stdout(predicate::str::contains("08:00 Aspirin 100mg [pending]"))
        .stdout(predicate::str::contains("0/2 taken"));
}

#[test]
fn test_take_and_skip_by_id() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    let ids = event_ids(&read_store(data_dir));

    cli_at(data_dir, "2024-01-01T08:02")
        .args(["take", ids[0].as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dose taken (was pending)"));

    cli_at(data_dir, "2024-01-01T08:03")
        .args(["take", ids[0].as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("already taken"));

    cli_at(data_dir, "2024-01-01T08:04")
        .args(["skip", ids[1].as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dose skipped"));

    let store = read_store(data_dir);
    let events = store["dose_events"].as_array().unwrap();
    assert_eq!(events[0]["status"], "taken");
    assert_eq!(events[0]["taken_at"], "2024-01-01T08:02:00");
    assert_eq!(events[1]["status"], "skipped");
}

#[test]
fn test_unknown_dose_is_a_warning() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    cli_at(data_dir, "2024-01-01T08:00")
        .args(["take", "00000000-0000-0000-0000-000000000000"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Warning"))
        .stderr(predicate::str::contains("dose_events record not found"));
}

#[test]
fn test_take_all_then_stats() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    for day in ["2024-01-01", "2024-01-02", "2024-01-03"] {
        cli_at(data_dir, &format!("{}T20:00", day))
            .args(["take", "--all"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Marked 2 doses taken"));
    }

    cli_at(data_dir, "2024-01-03T21:00")
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Current streak: 3 days"))
        .stdout(predicate::str::contains("Perfect days: 3"))
        .stdout(predicate::str::contains("30-day adherence: 100.0%"));
}

#[test]
fn test_sweep_marks_missed() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    cli_at(data_dir, "2024-01-01T21:00")
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("Marked 2 overdue doses as missed"));

    let store = read_store(data_dir);
    let missed = store["dose_events"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["status"] == "missed")
        .count();
    assert_eq!(missed, 2);
}

#[test]
fn test_delete_cascades() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    cli_at(data_dir, "2024-01-01T07:00")
        .args(["add", "--name", "Vitamin D", "--dosage", "1000IU"])
        .args(["--time", "09:00", "--start", "2024-01-01", "--days", "5"])
        .assert()
        .success();

    let store = read_store(data_dir);
    let aspirin_id = store["medicines"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["name"] == "Aspirin")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    cli_at(data_dir, "2024-01-01T07:05")
        .args(["delete", aspirin_id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted medicine and 6 doses"));

    let store = read_store(data_dir);
    let events = store["dose_events"].as_array().unwrap();
    assert_eq!(events.len(), 5);
    assert!(events.iter().all(|e| e["medicine_name"] == "Vitamin D"));
}

#[test]
fn test_edit_keeps_history() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    let store = read_store(data_dir);
    let id = store["medicines"][0]["id"].as_str().unwrap().to_string();

    cli_at(data_dir, "2024-01-02T00:30")
        .args(["edit", id.as_str(), "--time", "09:00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated Aspirin"));

    let store = read_store(data_dir);
    assert_eq!(store["medicines"][0]["frequency"], "once");
    let events = store["dose_events"].as_array().unwrap();
    // Day one keeps its two doses, days two and three get one each
    assert_eq!(events.len(), 4);
}

#[test]
fn test_edit_clears_critical_and_course_length() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli_at(data_dir, "2024-01-01T07:00")
        .args(["add", "--name", "Warfarin", "--dosage", "5mg", "--critical"])
        .args(["--time", "18:00", "--start", "2024-01-01", "--days", "2"])
        .assert()
        .success();

    let store = read_store(data_dir);
    let id = store["medicines"][0]["id"].as_str().unwrap().to_string();

    cli_at(data_dir, "2024-01-01T07:00")
        .args(["edit", id.as_str(), "--critical", "--no-critical"])
        .assert()
        .failure();

    cli_at(data_dir, "2024-01-01T07:00")
        .args(["edit", id.as_str(), "--no-critical", "--open-ended"])
        .assert()
        .success();

    let store = read_store(data_dir);
    assert_eq!(store["medicines"][0]["critical"], false);
    assert!(store["medicines"][0]["duration_days"].is_null());
    // Open-ended courses fill the default 365-day horizon
    assert_eq!(store["dose_events"].as_array().unwrap().len(), 365);
}

#[test]
fn test_list_filters() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    cli_at(data_dir, "2024-01-01T07:00")
        .args(["add", "--name", "Warfarin", "--dosage", "5mg", "--critical"])
        .args(["--time", "18:00", "--start", "2024-01-01"])
        .assert()
        .success();

    cli_at(data_dir, "2024-01-01T07:00")
        .args(["list", "--filter", "critical"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Warfarin"))
        .stdout(predicate::str::contains("Aspirin").not());

    cli_at(data_dir, "2024-01-01T07:00")
        .args(["list", "--search", "asp"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Aspirin"));
}

#[test]
fn test_export_import_roundtrip() {
    let source = setup_test_dir();
    let target = setup_test_dir();
    add_aspirin(source.path());

    let export_path = source.path().join("backup.json");
    cli_at(source.path(), "2024-01-01T07:30")
        .args(["export", "--output"])
        .arg(&export_path)
        .assert()
        .success();

    let bundle: Value = serde_json::from_str(&fs::read_to_string(&export_path).unwrap()).unwrap();
    assert_eq!(bundle["exported_at"], "2024-01-01T07:30:00");

    cli_at(target.path(), "2024-01-01T07:30")
        .arg("import")
        .arg(&export_path)
        .assert()
        .success();

    let store = read_store(target.path());
    assert_eq!(store["dose_events"].as_array().unwrap().len(), 6);
}

#[test]
fn test_import_rejects_garbage() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    let bad = data_dir.join("bad.json");
    fs::write(&bad, "{ not a bundle").unwrap();

    cli_at(data_dir, "2024-01-01T07:30")
        .arg("import")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Import"));

    let store = read_store(data_dir);
    assert_eq!(store["medicines"].as_array().unwrap().len(), 1);
}

#[test]
fn test_report_writes_csv() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    let report = data_dir.join("history.csv");
    cli_at(data_dir, "2024-01-01T07:30")
        .arg("report")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 6 doses"));

    let csv = fs::read_to_string(&report).unwrap();
    assert!(csv.starts_with("id,medicine,dosage,date,time,status"));
    assert_eq!(csv.lines().count(), 7);
}

#[test]
fn test_clear_requires_confirmation() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    cli_at(data_dir, "2024-01-01T07:30")
        .arg("clear")
        .assert()
        .failure();
    assert_eq!(read_store(data_dir)["medicines"].as_array().unwrap().len(), 1);

    cli_at(data_dir, "2024-01-01T07:30")
        .args(["clear", "--yes"])
        .assert()
        .success();

    let store = read_store(data_dir);
    assert!(store["medicines"].as_array().unwrap().is_empty());
    assert_eq!(store["achievements"].as_array().unwrap().len(), 12);
}

#[test]
fn test_contacts_and_safety_first() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli_at(data_dir, "2024-01-01T07:30")
        .args(["contact", "add", "--name", "Sam", "--phone", "12345"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid phone number"));

    cli_at(data_dir, "2024-01-01T07:30")
        .args(["contact", "add", "--name", "Sam", "--phone", "+1 (555) 010-0199"])
        .args(["--relation", "sibling"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Achievement unlocked: Safety First"));

    cli_at(data_dir, "2024-01-01T07:30")
        .args(["contact", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sam +1 (555) 010-0199 sibling"));
}

#[test]
fn test_settings_roundtrip() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    cli_at(data_dir, "2024-01-01T07:30")
        .args(["setting", "reminder_advance", "30"])
        .assert()
        .success();

    cli_at(data_dir, "2024-01-01T07:30")
        .args(["setting", "reminder_advance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reminder_advance = 30"));

    cli_at(data_dir, "2024-01-01T07:30")
        .args(["info", "blood_type", "O+"])
        .assert()
        .success();

    cli_at(data_dir, "2024-01-01T07:30")
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("blood_type = \"O+\""));
}

#[test]
fn test_achievements_report_level() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    cli_at(data_dir, "2024-01-01T07:30")
        .arg("achievements")
        .assert()
        .success()
        .stdout(predicate::str::contains("Level 1 Beginner (10 points)"))
        .stdout(predicate::str::contains("[✓] 🎯 First Step"))
        .stdout(predicate::str::contains("Next goals:"));
}

#[test]
fn test_watch_announces_due_reminder() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();
    add_aspirin(data_dir);

    cli_at(data_dir, "2024-01-01T07:50")
        .args(["watch", "--ticks", "1", "--interval-ms", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Time for Aspirin 100mg at 08:00"))
        .stdout(predicate::str::contains("Stopped"));

    let log = fs::read_to_string(data_dir.join("notifications.jsonl")).unwrap();
    assert!(log.contains("reminder_due"));
}
