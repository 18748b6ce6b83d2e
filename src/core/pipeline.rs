//! Ordered stage execution
//!
//! A [`Pipeline`] is an explicit list of stages; running it hands the raw
//! matrix to each stage in turn and collects the resulting sheets.

use crate::core::ledgers::Ledger;
use crate::core::stages::Stage;
use crate::matrix::{Matrix, Sheet};
use serde::Serialize;
use tracing::{debug, info};

/// Sheets under construction while a pipeline runs
///
/// The primary sheet is the matrix read from disk. Derived sheets are
/// produced by stages such as `derive` and `partition`; once one exists,
/// later matrix stages edit it as well.
#[derive(Debug, Clone, PartialEq)]
pub struct Workbench {
    pub primary: Sheet,
    pub derived: Vec<Sheet>,
}

impl Workbench {
    pub fn new(primary: Sheet) -> Self {
        Self {
            primary,
            derived: Vec::new(),
        }
    }

    /// Run `f` on the primary matrix, then on each derived one
    pub fn for_each_matrix<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Matrix),
    {
        f(&mut self.primary.matrix);
        for sheet in &mut self.derived {
            f(&mut sheet.matrix);
        }
    }

    /// Output order: derived sheets first, primary last
    pub fn into_sheets(self) -> Vec<Sheet> {
        let mut sheets = self.derived;
        sheets.push(self.primary);
        sheets
    }
}

/// The stage list of one ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pipeline {
    pub ledger: Ledger,
    pub primary_sheet: String,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Run every stage once, in order
    pub fn run(&self, matrix: Matrix) -> Vec<Sheet> {
        info!(
            ledger = %self.ledger,
            rows = matrix.len(),
            columns = matrix.width(),
            stages = self.stages.len(),
            "running pipeline"
        );

        let mut bench = Workbench::new(Sheet::new(self.primary_sheet.clone(), matrix));
        for (step, stage) in self.stages.iter().enumerate() {
            stage.apply(&mut bench);
            debug!(
                step = step + 1,
                stage = stage.name(),
                rows = bench.primary.matrix.len(),
                columns = bench.primary.matrix.width(),
                derived = bench.derived.len(),
                "stage done"
            );
        }

        bench.into_sheets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stages::ColumnRef;
    use crate::types::Cell;

    #[test]
    fn test_derived_sheets_come_first() {
        let pipeline = Pipeline {
            ledger: Ledger::Liquidados,
            primary_sheet: "Bruta".into(),
            stages: vec![
                Stage::Derive {
                    name: "Filtrada".into(),
                    keep_if: ColumnRef::letter("B"),
                    drop: vec![ColumnRef::letter("A")],
                    then: vec![],
                },
                Stage::RenameHeader {
                    from: "b".into(),
                    to: "Bee".into(),
                },
            ],
        };
        let matrix = Matrix::from_rows(vec![
            vec![Cell::text("a"), Cell::text("b")],
            vec![Cell::text("1"), Cell::text("x")],
            vec![Cell::text("2"), Cell::Empty],
        ]);

        let sheets = pipeline.run(matrix);
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].name, "Filtrada");
        assert_eq!(sheets[0].matrix.len(), 2);
        assert_eq!(sheets[0].matrix.get(0, 0), &Cell::text("Bee"));
        assert_eq!(sheets[1].name, "Bruta");
        assert_eq!(sheets[1].matrix.get(0, 1), &Cell::text("Bee"));
        assert_eq!(sheets[1].matrix.len(), 3);
    }

    #[test]
    fn test_empty_pipeline_returns_input() {
        let pipeline = Pipeline {
            ledger: Ledger::Pagos,
            primary_sheet: "S".into(),
            stages: vec![],
        };
        let matrix = Matrix::from_rows(vec![vec![Cell::text("h")]]);
        let sheets = pipeline.run(matrix.clone());
        assert_eq!(sheets, vec![Sheet::new("S", matrix)]);
    }
}
