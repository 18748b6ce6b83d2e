//! Spreadsheet codecs
//!
//! - `reader`: first worksheet of an `.xlsx` → [`Matrix`]
//! - `writer`: list of [`Sheet`]s → `.xlsx`
//! - `office`: the same two operations delegated to a headless LibreOffice
//!
//! Both backends sit behind [`SpreadsheetBackend`], so the pipeline never
//! knows which one produced its input.

pub mod office;
pub mod reader;
pub mod writer;

pub use office::{OfficeCodec, OfficeSettings};
pub use reader::read_first_sheet;
pub use writer::SheetExporter;

use crate::error::LedgerResult;
use crate::matrix::{Matrix, Sheet};
use std::path::Path;

/// Reads one worksheet and writes a set of them
pub trait SpreadsheetBackend {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn read_matrix(&mut self, path: &Path) -> LedgerResult<Matrix>;

    fn write_matrices(&mut self, path: &Path, sheets: &[Sheet]) -> LedgerResult<()>;
}

/// In-process zip + XML codec
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCodec;

impl SpreadsheetBackend for NativeCodec {
    fn name(&self) -> &'static str {
        "native"
    }

    fn read_matrix(&mut self, path: &Path) -> LedgerResult<Matrix> {
        reader::read_first_sheet(path)
    }

    fn write_matrices(&mut self, path: &Path, sheets: &[Sheet]) -> LedgerResult<()> {
        SheetExporter::new(sheets).export(path)
    }
}
