//! Binary tests for the sigef-sheets command line
//!
//! These run the built executable as a subprocess.

#![allow(deprecated)] // Command::cargo_bin deprecation - no stable replacement yet

use assert_cmd::Command;
use predicates::prelude::*;
use rust_xlsxwriter::Workbook;
use tempfile::TempDir;

fn sigef() -> Command {
    Command::cargo_bin("sigef-sheets").unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// HELP AND ARGUMENTS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_help_lists_ledgers() {
    sigef()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("LEDGERS"))
        .stdout(predicate::str::contains("retidos"));
}

#[test]
fn test_run_help_lists_backends() {
    sigef()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("native"))
        .stdout(predicate::str::contains("office"));
}

#[test]
fn test_unknown_ledger_is_rejected() {
    sigef()
        .args(["run", "despesas", "x.xlsx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

// ═══════════════════════════════════════════════════════════════════════════
// PLAN COMMAND
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_plan_prints_yaml_stages() {
    sigef()
        .args(["plan", "pagos"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ledger: pagos"))
        .stdout(predicate::str::contains("keep_digits"));
}

#[test]
fn test_plan_prints_json() {
    sigef()
        .args(["plan", "retidos", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stage\""))
        .stdout(predicate::str::contains("\"partition\""));
}

// ═══════════════════════════════════════════════════════════════════════════
// RUN COMMAND
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_run_missing_file_fails() {
    sigef()
        .args(["run", "pagos", "/nonexistent/relatorio.xlsx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_run_with_empty_prompt_fails() {
    sigef()
        .args(["run", "emitidos"])
        .write_stdin("\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No input file selected"));
}

#[test]
fn test_run_writes_output_beside_input() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("credores.xlsx");

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (c, label) in ["Nome", "x1", "Cidade", "x2", "x3", "Documento", "UF"]
        .iter()
        .enumerate()
    {
        sheet.write_string(0, c as u16, *label).unwrap();
    }
    sheet.write_string(1, 0, "Fulano").unwrap();
    sheet.write_string(1, 5, "123.456.789-01").unwrap();
    workbook.save(&input).unwrap();

    sigef()
        .args(["run", "cpf-cnpj"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Done"));

    assert!(dir.path().join("credores_FILTRADO_TIPO.xlsx").exists());
}
