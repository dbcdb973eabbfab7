//! Integration tests for the tdm binary.
//!
//! These tests run the CLI end to end against case files written to a
//! temporary directory. Nothing here needs a running evaluator: commands that
//! would call one are pointed at a closed local port.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Nothing listens on the discard port
const UNREACHABLE_EVALUATOR: &str = "http://127.0.0.1:9/forecast";

const VANCOMYCIN_CASE: &str = r#"{
    "patient": {"weight_kg": 70, "age_years": 50, "sex": "male", "height_cm": 170},
    "assessments": [{"serum_creatinine": 1.2, "formula": "ckd_epi"}],
    "doses": [
        {"timestamp": "2026-03-01T20:00:00Z", "amount": 1000, "route": "iv", "infusion_minutes": 60},
        {"timestamp": "2026-03-02T08:00:00Z", "amount": 1000, "route": "iv", "infusion_minutes": 60}
    ],
    "observations": [
        {"timestamp": "2026-03-02T07:30:00Z", "concentration": 12.5, "unit": "mg/L"}
    ],
    "drug_name": "Vancomycin",
    "indication": "General",
    "target_type": "Trough",
    "target_range": "10-20 mg/L"
}"#;

/// Helper to create a test directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the path to the CLI binary
///
/// A default config file keeps the tests independent of the user's own config.
fn cli(dir: &Path) -> Command {
    let config = dir.join("config.toml");
    if !config.exists() {
        fs::write(&config, "[evaluator]\nmax_attempts = 1\n").unwrap();
    }
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tdm"));
    cmd.arg("--config").arg(config);
    for var in ["RUST_LOG", "HTTP_PROXY", "http_proxy", "HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"] {
        cmd.env_remove(var);
    }
    cmd
}

fn write_case(dir: &Path, json: &str) -> PathBuf {
    let path = dir.join("case.json");
    fs::write(&path, json).unwrap();
    path
}

#[test]
fn test_cli_help() {
    let temp_dir = setup_test_dir();
    cli(temp_dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Therapeutic drug monitoring dosing assistant",
        ));
}

#[test]
fn test_renal_reports_egfr() {
    let temp_dir = setup_test_dir();
    let case = write_case(temp_dir.path(), VANCOMYCIN_CASE);

    cli(temp_dir.path())
        .arg("renal")
        .arg("--case")
        .arg(&case)
        .assert()
        .success()
        .stdout(predicate::str::contains("eGFR: 73.66"));
}

#[test]
fn test_renal_defaults_without_assessment() {
    let temp_dir = setup_test_dir();
    let json = VANCOMYCIN_CASE.replace(
        r#"[{"serum_creatinine": 1.2, "formula": "ckd_epi"}]"#,
        "[]",
    );
    let case = write_case(temp_dir.path(), &json);

    cli(temp_dir.path())
        .arg("renal")
        .arg("--case")
        .arg(&case)
        .assert()
        .success()
        .stdout(predicate::str::contains("CRCL: 90.00"));
}

#[test]
fn test_model_follows_neurosurgery_window() {
    let temp_dir = setup_test_dir();
    let json = VANCOMYCIN_CASE.replace("\"General\"", "\"Neurosurgery\"");
    let case = write_case(temp_dir.path(), &json);

    cli(temp_dir.path())
        .args(["model", "--at", "2026-03-03T08:00:00Z", "--case"])
        .arg(&case)
        .assert()
        .success()
        .stdout(predicate::str::diff("vancomycin1_2\n"));

    cli(temp_dir.path())
        .args(["model", "--at", "2026-03-10T08:00:00Z", "--case"])
        .arg(&case)
        .assert()
        .success()
        .stdout(predicate::str::diff("vancomycin1_3\n"));
}

#[test]
fn test_payload_applies_proposed_amount() {
    let temp_dir = setup_test_dir();
    let case = write_case(temp_dir.path(), VANCOMYCIN_CASE);

    cli(temp_dir.path())
        .args(["payload", "--amount", "1250", "--case"])
        .arg(&case)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"model_name\": \"vancomycin1_1\""))
        .stdout(predicate::str::contains("\"input_amount_before\": 1000.0"))
        .stdout(predicate::str::contains("\"input_amount_after\": 1250.0"))
        .stdout(predicate::str::contains("\"input_tau_after\": 12.0"))
        .stdout(predicate::str::contains("\"input_EGFR\""))
        .stdout(predicate::str::contains("\"input_CRCL\"").not());
}

#[test]
fn test_payload_with_csv_history() {
    let temp_dir = setup_test_dir();
    let case = write_case(temp_dir.path(), VANCOMYCIN_CASE);
    let doses = temp_dir.path().join("doses.csv");
    fs::write(
        &doses,
        "timestamp,amount,route,infusion_minutes\n\
         2026-03-01T08:00:00Z,750,iv,60\n\
         bad-row,750,iv,60\n\
         2026-03-01T16:00:00Z,750,iv,60\n",
    )
    .unwrap();

    cli(temp_dir.path())
        .args(["payload", "--case"])
        .arg(&case)
        .arg("--doses")
        .arg(&doses)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"input_amount_before\": 750.0"))
        .stdout(predicate::str::contains("\"input_tau_before\": 8.0"));
}

#[test]
fn test_payload_anchor_at_tau_without_levels() {
    let temp_dir = setup_test_dir();
    let json = VANCOMYCIN_CASE.replace(
        r#"{"timestamp": "2026-03-02T07:30:00Z", "concentration": 12.5, "unit": "mg/L"}"#,
        "",
    );
    let case = write_case(temp_dir.path(), &json);

    cli(temp_dir.path())
        .args(["payload", "--case"])
        .arg(&case)
        .assert()
        .success()
        .stdout(predicate::str::is_match(r#""TIME": 12\.0,\s*"DV": null,\s*"AMT": 0\.0"#).unwrap());
}

#[test]
fn test_offline_commands_ignore_evaluator_url() {
    let temp_dir = setup_test_dir();
    let case = write_case(temp_dir.path(), VANCOMYCIN_CASE);

    cli(temp_dir.path())
        .args(["model", "--evaluator-url", UNREACHABLE_EVALUATOR, "--case"])
        .arg(&case)
        .assert()
        .success()
        .stdout(predicate::str::diff("vancomycin1_1\n"))
        .stderr(predicate::str::contains("Using evaluator").not());
}

#[test]
fn test_verbose_enables_debug_logging() {
    let temp_dir = setup_test_dir();
    let case = write_case(temp_dir.path(), VANCOMYCIN_CASE);

    cli(temp_dir.path())
        .args(["payload", "--verbose", "--case"])
        .arg(&case)
        .assert()
        .success()
        .stderr(predicate::str::contains("Built dataset"));

    cli(temp_dir.path())
        .args(["payload", "--case"])
        .arg(&case)
        .assert()
        .success()
        .stderr(predicate::str::contains("Built dataset").not());
}

#[test]
fn test_unknown_drug_fails() {
    let temp_dir = setup_test_dir();
    let json = VANCOMYCIN_CASE.replace("\"Vancomycin\"", "\"Paracetamol\"");
    let case = write_case(temp_dir.path(), &json);

    cli(temp_dir.path())
        .args(["model", "--case"])
        .arg(&case)
        .assert()
        .failure()
        .stderr(predicate::str::contains("UnsupportedDrug"));
}

#[test]
fn test_forecast_fails_when_evaluator_unreachable() {
    let temp_dir = setup_test_dir();
    let case = write_case(temp_dir.path(), VANCOMYCIN_CASE);

    cli(temp_dir.path())
        .args(["forecast", "--evaluator-url", UNREACHABLE_EVALUATOR, "--case"])
        .arg(&case)
        .assert()
        .failure();
}

#[test]
fn test_recommend_survives_unreachable_evaluator() {
    let temp_dir = setup_test_dir();
    let case = write_case(temp_dir.path(), VANCOMYCIN_CASE);

    cli(temp_dir.path())
        .args(["recommend", "--evaluator-url", UNREACHABLE_EVALUATOR, "--case"])
        .arg(&case)
        .assert()
        .success()
        .stdout(predicate::str::contains("baseline 1000  step 10"))
        .stdout(predicate::str::contains("score inf").count(3))
        .stdout(predicate::str::contains("no prediction"));
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = setup_test_dir();
    let case = write_case(temp_dir.path(), VANCOMYCIN_CASE);
    fs::write(temp_dir.path().join("config.toml"), "[search]\nkeep = 0\n").unwrap();

    cli(temp_dir.path())
        .args(["renal", "--case"])
        .arg(&case)
        .assert()
        .failure()
        .stderr(predicate::str::contains("search.keep"));
}
