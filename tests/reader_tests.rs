//! Native reader tests against hand-built containers

use pretty_assertions::assert_eq;
use rust_xlsxwriter::Workbook;
use sigef_sheets::excel::reader::{read_first_sheet, read_first_sheet_from};
use sigef_sheets::{Cell, LedgerError};
use std::io::{Cursor, Write};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Zip the given parts into an in-memory container
fn container(parts: &[(&str, &str)]) -> Cursor<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in parts {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    let mut cursor = zip.finish().unwrap();
    cursor.set_position(0);
    cursor
}

const SHEET_A: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2"><v>45000</v></c><c r="B2" t="s"><v>2</v></c></row>
</sheetData></worksheet>"#;

const SHEET_B: &str = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>second</t></is></c></row>
</sheetData></worksheet>"#;

const SHARED: &str = r#"<sst count="3"><si><t>Data</t></si><si><t>Credor</t></si><si><r><t>ACME </t></r><r><t>LTDA</t></r></si></sst>"#;

// ═══════════════════════════════════════════════════════════════════════════
// CONTAINER LAYOUT
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_reads_sheet1_without_workbook_part() {
    let zip = container(&[
        ("xl/worksheets/sheet1.xml", SHEET_A),
        ("xl/sharedStrings.xml", SHARED),
    ]);
    let m = read_first_sheet_from(zip).unwrap();
    assert_eq!(m.len(), 2);
    assert_eq!(m.header(), &[Cell::text("Data"), Cell::text("Credor")]);
    assert_eq!(m.get(1, 0), &Cell::Number(45000.0));
    assert_eq!(m.get(1, 1), &Cell::text("ACME LTDA"));
}

#[test]
fn test_first_sheet_follows_workbook_order() {
    let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Primeira" sheetId="1" r:id="rId2"/><sheet name="Outra" sheetId="2" r:id="rId1"/></sheets></workbook>"#;
    let rels = r#"<Relationships>
<Relationship Id="rId1" Target="worksheets/sheet1.xml" Type="ws"/>
<Relationship Id="rId2" Target="worksheets/sheet2.xml" Type="ws"/>
</Relationships>"#;
    let zip = container(&[
        ("xl/workbook.xml", workbook),
        ("xl/_rels/workbook.xml.rels", rels),
        ("xl/worksheets/sheet1.xml", SHEET_A),
        ("xl/worksheets/sheet2.xml", SHEET_B),
    ]);
    let m = read_first_sheet_from(zip).unwrap();
    assert_eq!(m.header(), &[Cell::text("second")]);
}

#[test]
fn test_missing_shared_strings_keeps_indices() {
    let zip = container(&[("xl/worksheets/sheet1.xml", SHEET_A)]);
    let m = read_first_sheet_from(zip).unwrap();
    assert_eq!(m.get(0, 0), &Cell::text("0"));
    assert_eq!(m.get(1, 1), &Cell::text("2"));
}

#[test]
fn test_container_without_worksheet_fails() {
    let zip = container(&[("docProps/app.xml", "<Properties/>")]);
    let err = read_first_sheet_from(zip).unwrap_err();
    assert!(matches!(err, LedgerError::Container(_)), "{err}");
}

#[test]
fn test_not_a_zip_fails() {
    let err = read_first_sheet_from(Cursor::new(b"plain text".to_vec())).unwrap_err();
    assert!(matches!(err, LedgerError::Container(_)), "{err}");
}

#[test]
fn test_broken_xml_fails() {
    let zip = container(&[(
        "xl/worksheets/sheet1.xml",
        "<worksheet><sheetData><row><c r=\"A1\"><v>1</v></row></worksheet>",
    )]);
    let err = read_first_sheet_from(zip).unwrap_err();
    assert!(matches!(err, LedgerError::Xml(_)), "{err}");
}

// ═══════════════════════════════════════════════════════════════════════════
// FILES WRITTEN BY OTHER TOOLS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_reads_rust_xlsxwriter_output() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fixture.xlsx");

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Relatório").unwrap();
    sheet.write_string(0, 0, "Nr emp.").unwrap();
    sheet.write_string(0, 2, "Valor").unwrap();
    sheet.write_string(1, 0, "2024NE000123").unwrap();
    sheet.write_number(1, 2, 1234.5).unwrap();
    sheet.write_boolean(3, 1, true).unwrap();
    workbook.save(&path).unwrap();

    let m = read_first_sheet(&path).unwrap();
    assert_eq!(m.len(), 4);
    assert_eq!(m.width(), 3);
    assert_eq!(m.get(0, 0), &Cell::text("Nr emp."));
    assert_eq!(m.get(1, 0), &Cell::text("2024NE000123"));
    assert_eq!(m.get(1, 2), &Cell::Number(1234.5));
    assert_eq!(m.get(3, 1), &Cell::Bool(true));
    assert_eq!(m.get(2, 0), &Cell::Empty);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = read_first_sheet(&dir.path().join("absent.xlsx")).unwrap_err();
    assert!(matches!(err, LedgerError::Io(_)));
}
