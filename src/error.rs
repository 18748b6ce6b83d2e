use std::path::PathBuf;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("No input file selected")]
    NoInput,

    #[error("Invalid spreadsheet container: {0}")]
    Container(String),

    #[error("XML parsing error: {0}")]
    Xml(String),

    #[error("Excel import error: {0}")]
    Import(String),

    #[error("Excel export error: {0}")]
    Export(String),

    #[error("Office automation error: {0}")]
    Office(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl From<zip::result::ZipError> for LedgerError {
    fn from(e: zip::result::ZipError) -> Self {
        LedgerError::Container(e.to_string())
    }
}

impl From<quick_xml::Error> for LedgerError {
    fn from(e: quick_xml::Error) -> Self {
        LedgerError::Xml(e.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for LedgerError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        LedgerError::Export(e.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialize(e.to_string())
    }
}

impl From<serde_yaml::Error> for LedgerError {
    fn from(e: serde_yaml::Error) -> Self {
        LedgerError::Serialize(e.to_string())
    }
}
