//! Native `.xlsx` writer on top of `rust_xlsxwriter`

use crate::error::{LedgerError, LedgerResult};
use crate::matrix::Sheet;
use crate::types::Cell;
use chrono::Datelike;
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook, Worksheet};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Excel's limit on worksheet name length
const MAX_SHEET_NAME: usize = 31;
const DATE_FORMAT: &str = "dd/mm/yyyy";

/// Writes a list of sheets into one workbook, first sheet first
pub struct SheetExporter<'a> {
    sheets: &'a [Sheet],
}

impl<'a> SheetExporter<'a> {
    pub fn new(sheets: &'a [Sheet]) -> Self {
        Self { sheets }
    }

    /// Save the workbook to `output_path`
    ///
    /// The file is built under a temporary name in the same directory and
    /// renamed into place, so a failed export leaves nothing at `output_path`.
    pub fn export(&self, output_path: &Path) -> LedgerResult<()> {
        let mut workbook = Workbook::new();
        let formats = CellFormats::new();

        for (sheet, name) in self.sheets.iter().zip(sheet_names(self.sheets)) {
            let worksheet = workbook.add_worksheet_with_constant_memory();
            worksheet.set_name(&name)?;
            write_sheet(worksheet, sheet, &formats)?;
            debug!(sheet = %name, rows = sheet.matrix.len(), "worksheet written");
        }

        let dir = match output_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let staging = tempfile::Builder::new()
            .prefix(".sigef-")
            .suffix(".xlsx")
            .tempfile_in(dir)?;
        workbook.save(staging.path())?;
        staging
            .persist(output_path)
            .map_err(|e| LedgerError::Io(e.error))?;

        info!(
            path = %output_path.display(),
            sheets = self.sheets.len(),
            "workbook saved"
        );
        Ok(())
    }
}

/// Formats shared by every worksheet of one export
struct CellFormats {
    header: Format,
    header_date: Format,
    date: Format,
}

impl CellFormats {
    fn new() -> Self {
        Self {
            header: Format::new().set_bold(),
            header_date: Format::new().set_bold().set_num_format(DATE_FORMAT),
            date: Format::new().set_num_format(DATE_FORMAT),
        }
    }

    /// Row 0 is bold whatever its type; dates always carry the date format
    fn for_cell(&self, row: u32, cell: &Cell) -> Option<&Format> {
        match (row, cell) {
            (_, Cell::Empty) => None,
            (0, Cell::Date(_)) => Some(&self.header_date),
            (0, _) => Some(&self.header),
            (_, Cell::Date(_)) => Some(&self.date),
            _ => None,
        }
    }
}

fn write_sheet(worksheet: &mut Worksheet, sheet: &Sheet, formats: &CellFormats) -> LedgerResult<()> {
    for (r, row) in sheet.matrix.rows().iter().enumerate() {
        let r = u32::try_from(r)
            .map_err(|_| LedgerError::Export(format!("too many rows in {}", sheet.name)))?;
        for (c, cell) in row.iter().enumerate() {
            let c = u16::try_from(c)
                .map_err(|_| LedgerError::Export(format!("too many columns in {}", sheet.name)))?;
            let format = formats.for_cell(r, cell);
            match (cell, format) {
                (Cell::Empty, _) => {}
                (Cell::Text(s), Some(f)) => {
                    worksheet.write_string_with_format(r, c, s, f)?;
                }
                (Cell::Text(s), None) => {
                    worksheet.write_string(r, c, s)?;
                }
                (Cell::Number(n), Some(f)) => {
                    worksheet.write_number_with_format(r, c, *n, f)?;
                }
                (Cell::Number(n), None) => {
                    worksheet.write_number(r, c, *n)?;
                }
                (Cell::Bool(b), Some(f)) => {
                    worksheet.write_boolean_with_format(r, c, *b, f)?;
                }
                (Cell::Bool(b), None) => {
                    worksheet.write_boolean(r, c, *b)?;
                }
                (Cell::Date(d), f) => {
                    let f = f.unwrap_or(&formats.date);
                    match excel_date(d) {
                        Some(dt) => {
                            worksheet.write_datetime_with_format(r, c, &dt, f)?;
                        }
                        // Before 1900: Excel can't hold it as a date
                        None if r == 0 => {
                            worksheet.write_string_with_format(r, c, cell.to_string(), &formats.header)?;
                        }
                        None => {
                            worksheet.write_string(r, c, cell.to_string())?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn excel_date(d: &chrono::NaiveDate) -> Option<ExcelDateTime> {
    let year = u16::try_from(d.year()).ok()?;
    ExcelDateTime::from_ymd(year, d.month() as u8, d.day() as u8).ok()
}

/// Worksheet names Excel accepts, unique ignoring case
pub fn sheet_names(sheets: &[Sheet]) -> Vec<String> {
    let mut seen = HashSet::new();
    sheets
        .iter()
        .map(|sheet| {
            let base = sanitize_sheet_name(&sheet.name);
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.to_lowercase()) {
                let suffix = format!(" ({})", n);
                let keep = MAX_SHEET_NAME.saturating_sub(suffix.chars().count());
                name = format!("{}{}", base.chars().take(keep).collect::<String>(), suffix);
                n += 1;
            }
            name
        })
        .collect()
}

/// Drop characters Excel rejects, trim quotes and cut to 31 characters
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .collect();
    let cut: String = cleaned
        .trim()
        .trim_matches('\'')
        .chars()
        .take(MAX_SHEET_NAME)
        .collect();
    let cut = cut.trim().trim_end_matches('\'').to_string();
    if cut.is_empty() {
        "Sheet".to_string()
    } else {
        cut
    }
}
