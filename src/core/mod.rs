//! Transformation engine: text helpers, date handling, the document
//! classifier, the stage catalogue and the per-ledger pipelines

pub mod classifier;
pub mod dates;
pub mod ledgers;
pub mod pipeline;
pub mod stages;
pub mod text;

pub use classifier::{classify, Classification, ClassifierOptions, DocumentKind};
pub use ledgers::Ledger;
pub use pipeline::{Pipeline, Workbench};
pub use stages::{ColumnRef, Stage};
