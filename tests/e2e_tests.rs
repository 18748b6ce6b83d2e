//! End-to-end tests: xlsx fixture in, transformed workbook out

use calamine::{open_workbook, Data, Reader, Xlsx};
use pretty_assertions::assert_eq;
use rust_xlsxwriter::Workbook;
use sigef_sheets::cli::{self, Backend, PathPrompt, RunOptions};
use sigef_sheets::core::Ledger;
use sigef_sheets::excel::OfficeSettings;
use sigef_sheets::{LedgerError, LedgerResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Prompt that must never be consulted
struct NoPrompt;

impl PathPrompt for NoPrompt {
    fn ask(&mut self, _ledger: Ledger) -> LedgerResult<Option<PathBuf>> {
        panic!("prompt should not be used when a path is given");
    }
}

/// Prompt answering with a fixed path
struct FixedPrompt(Option<PathBuf>);

impl PathPrompt for FixedPrompt {
    fn ask(&mut self, _ledger: Ledger) -> LedgerResult<Option<PathBuf>> {
        Ok(self.0.take())
    }
}

/// Write a single-sheet workbook where every cell is text, except cells
/// that parse as numbers
fn write_fixture(path: &Path, rows: &[&[&str]]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            match value.parse::<f64>() {
                Ok(n) => sheet.write_number(r as u32, c as u16, n).unwrap(),
                Err(_) => sheet.write_string(r as u32, c as u16, *value).unwrap(),
            };
        }
    }
    workbook.save(path).unwrap();
}

fn pagos_fixture(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("pagos.xlsx");
    write_fixture(
        &path,
        &[
            &["Data", "Nr emp.", "Credor", "Seq. Liq.", "Valor"],
            &["Unidade Gestora 123"],
            &["2024-03-05", "2024NE0001", "ACME LTDA", "1234567-8", "100"],
            &["TOTAL GERAL"],
        ],
    );
    path
}

fn header(range: &calamine::Range<Data>) -> Vec<String> {
    (0..range.width())
        .map(|c| match range.get((0, c)) {
            Some(Data::String(s)) => s.clone(),
            other => format!("{other:?}"),
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// NATIVE BACKEND
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_pagos_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let input = pagos_fixture(&dir);

    let report = cli::run(RunOptions::new(Ledger::Pagos, Some(input)), &mut NoPrompt).unwrap();

    assert_eq!(report.output, dir.path().join("pagos_SAIDA.xlsx"));
    assert_eq!(report.backend, "native");
    assert_eq!(report.sheets, vec![("Empenhos Pagos".to_string(), 2)]);

    let mut wb: Xlsx<_> = open_workbook(&report.output).unwrap();
    assert_eq!(wb.sheet_names(), vec!["Empenhos Pagos".to_string()]);
    let range = wb.worksheet_range("Empenhos Pagos").unwrap();
    assert_eq!(
        header(&range),
        vec!["Data", "Nr emp.", "Credor", "Seq. Liq.", "Valor"]
    );
    assert_eq!(range.height(), 2);
    assert_eq!(range.get((1, 3)), Some(&Data::String("1234567".into())));
    assert_eq!(range.get((1, 4)), Some(&Data::Float(100.0)));
    match range.get((1, 0)) {
        Some(Data::DateTime(dt)) => assert_eq!(dt.as_f64(), 45356.0),
        other => panic!("expected a date, got {other:?}"),
    }
}

#[test]
fn test_liquidados_writes_final_and_raw_sheets() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("liq.xlsx");
    write_fixture(
        &input,
        &[
            &["Data", "Objeto", "", "", "", "", "Beneficiário", "Valor"],
            &[
                "Relatório de empenhos liquidados",
                "", "", "", "", "", "", "", "", "", "", "", "", "", "", "",
                "-",
            ],
            &[
                "2024-05-02",
                "MEMORANDO 10/2024 aquisição",
                "",
                "2024NE0001 - material",
                "",
                "",
                "ACME LTDA",
                "300",
                "",
                "",
                "",
                "",
                "3.3.90.39",
            ],
        ],
    );

    let report = cli::run(RunOptions::new(Ledger::Liquidados, Some(input)), &mut NoPrompt).unwrap();
    assert_eq!(report.output, dir.path().join("liq_FINAL.xlsx"));

    let mut wb: Xlsx<_> = open_workbook(&report.output).unwrap();
    assert_eq!(
        wb.sheet_names(),
        vec!["Liquidados Final".to_string(), "Planilha Bruta Liq".to_string()]
    );
    let final_sheet = wb.worksheet_range("Liquidados Final").unwrap();
    let names = header(&final_sheet);
    assert!(names.iter().any(|h| h == "Tipo"), "{names:?}");
    assert!(names.iter().any(|h| h == "Documento"), "{names:?}");
    assert!(final_sheet.height() >= 2);
}

#[test]
fn test_retidos_writes_one_sheet_per_retention() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("ret.xlsx");
    let mut data = vec![""; 24];
    data[0] = "2024-02-01";
    data[1] = "IRRF";
    data[9] = "ACME LTDA";
    data[12] = "50,00";
    data[23] = "-";
    let mut cont = vec![""; 24];
    cont[1] = "ISS";
    cont[12] = "5,00";
    write_fixture(&input, &[&["RELATÓRIO DE RETENÇÕES"], &data, &cont]);

    let report = cli::run(RunOptions::new(Ledger::Retidos, Some(input)), &mut NoPrompt).unwrap();
    assert_eq!(report.output, dir.path().join("ret_FINAL_SEPARADA.xlsx"));

    let wb: Xlsx<_> = open_workbook(&report.output).unwrap();
    let names = wb.sheet_names();
    assert_eq!(names.first().map(String::as_str), Some("GERAL"));
    assert!(names.contains(&"IRRF".to_string()), "{names:?}");
    assert!(names.contains(&"ISS".to_string()), "{names:?}");
    assert!(names.contains(&"LISTA".to_string()), "{names:?}");
    assert_eq!(names.last().map(String::as_str), Some("Planilha Bruta"));
}

#[test]
fn test_prompted_path_is_used() {
    let dir = TempDir::new().unwrap();
    let input = pagos_fixture(&dir);

    let mut prompt = FixedPrompt(Some(input));
    let report = cli::run(RunOptions::new(Ledger::Pagos, None), &mut prompt).unwrap();
    assert!(report.output.exists());
}

#[test]
fn test_no_answer_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let err = cli::run(RunOptions::new(Ledger::Pagos, None), &mut FixedPrompt(None)).unwrap_err();
    assert!(matches!(err, LedgerError::NoInput));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_corrupt_input_is_reported_and_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("broken.xlsx");
    std::fs::write(&input, b"not a workbook").unwrap();

    let err = cli::run(RunOptions::new(Ledger::Emitidos, Some(input)), &mut NoPrompt).unwrap_err();
    assert!(matches!(err, LedgerError::Container(_)), "{err}");
    assert!(!dir.path().join("broken_SAIDA.xlsx").exists());
}

// ═══════════════════════════════════════════════════════════════════════════
// OFFICE BACKEND FALLBACK
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_missing_office_falls_back_to_native() {
    let dir = TempDir::new().unwrap();
    let input = pagos_fixture(&dir);

    let mut options = RunOptions::new(Ledger::Pagos, Some(input));
    options.backend = Backend::Office;
    options.office = OfficeSettings {
        binary: dir.path().join("no-such-soffice"),
        timeout: Duration::from_secs(5),
    };

    let report = cli::run(options, &mut NoPrompt).unwrap();
    assert_eq!(report.backend, "native");

    let wb: Xlsx<_> = open_workbook(&report.output).unwrap();
    assert_eq!(wb.sheet_names(), vec!["Empenhos Pagos".to_string()]);
}
