//! SIGEF Sheets - ledger report normalizer
//!
//! Turns the spreadsheet exports of the SIGEF public ledger (empenhos
//! emitidos, liquidados, pagos, a pagar, retenções and creditor lists) into
//! flat, uniform tables.
//!
//! # Features
//!
//! - Native `.xlsx` reader (zip + streaming XML) and writer
//! - One fixed, inspectable stage pipeline per ledger
//! - Memo / PAD document classifier for commitment histories
//! - Optional LibreOffice backend with automatic native fallback
//!
//! # Example
//!
//! ```no_run
//! use sigef_sheets::core::Ledger;
//! use sigef_sheets::excel::{NativeCodec, SpreadsheetBackend};
//! use std::path::Path;
//!
//! let input = Path::new("pagos.xlsx");
//! let mut codec = NativeCodec;
//! let matrix = codec.read_matrix(input)?;
//!
//! let ledger = Ledger::Pagos;
//! let sheets = ledger.default_pipeline().run(matrix);
//! codec.write_matrices(&ledger.output_path(input), &sheets)?;
//! # Ok::<(), sigef_sheets::error::LedgerError>(())
//! ```

pub mod cli;
pub mod core;
pub mod error;
pub mod excel;
pub mod matrix;
pub mod types;

// Re-export commonly used types
pub use crate::core::{Ledger, Pipeline};
pub use error::{LedgerError, LedgerResult};
pub use matrix::{Matrix, Sheet};
pub use types::Cell;
