//! Rectangular grid of cells with bounds-safe access
//!
//! Row 0 is the header. Rows may have different lengths until
//! [`Matrix::normalize_width`] pads them; every accessor treats a missing
//! cell as [`Cell::Empty`] instead of failing.

pub mod columns;

use crate::types::Cell;

pub use columns::{column_index, column_letters, letters_to_number, number_to_letters};

static EMPTY: Cell = Cell::Empty;

/// A worksheet as rows of cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    rows: Vec<Vec<Cell>>,
}

impl Matrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Cell>> {
        self.rows
    }

    /// Number of rows, header included
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Length of the longest row
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn header(&self) -> &[Cell] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn row(&self, row: usize) -> &[Cell] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub fn insert_row(&mut self, at: usize, row: Vec<Cell>) {
        let at = at.min(self.rows.len());
        self.rows.insert(at, row);
    }

    pub fn get(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    /// Write a cell, padding the row with empties as needed
    ///
    /// A row index past the end of the matrix is ignored: stages never create
    /// rows through random access.
    pub fn set(&mut self, row: usize, col: usize, value: Cell) {
        let Some(r) = self.rows.get_mut(row) else {
            return;
        };
        if col >= r.len() {
            if value == Cell::Empty {
                return;
            }
            r.resize(col + 1, Cell::Empty);
        }
        r[col] = value;
    }

    /// Remove a value, leaving an empty cell behind
    pub fn take(&mut self, row: usize, col: usize) -> Cell {
        self.rows
            .get_mut(row)
            .and_then(|r| r.get_mut(col))
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Insert an empty cell at `col` in every row, shifting later cells right
    pub fn insert_column(&mut self, col: usize) {
        for r in &mut self.rows {
            if col <= r.len() {
                r.insert(col, Cell::Empty);
            } else {
                r.resize(col + 1, Cell::Empty);
            }
        }
    }

    /// Remove the cell at `col` from every row long enough to have one
    pub fn delete_column(&mut self, col: usize) {
        for r in &mut self.rows {
            if col < r.len() {
                r.remove(col);
            }
        }
    }

    pub fn delete_row(&mut self, row: usize) {
        if row < self.rows.len() {
            self.rows.remove(row);
        }
    }

    /// Keep rows from `from_row` on only where `keep` says so
    pub fn retain_rows<F>(&mut self, from_row: usize, mut keep: F)
    where
        F: FnMut(&[Cell]) -> bool,
    {
        let mut idx = 0;
        self.rows.retain(|r| {
            let survives = idx < from_row || keep(r);
            idx += 1;
            survives
        });
    }

    /// Remove blank rows from the bottom; row 0 always stays
    pub fn trim_trailing_empty_rows(&mut self) {
        while self.rows.len() > 1 {
            let last = &self.rows[self.rows.len() - 1];
            if last.iter().any(Cell::is_present) {
                break;
            }
            self.rows.pop();
        }
    }

    /// Pad every row to the widest one
    ///
    /// Returns the number of columns up to the last one holding a value,
    /// which callers may log; nothing is pruned.
    pub fn normalize_width(&mut self) -> usize {
        let width = self.width();
        for r in &mut self.rows {
            r.resize(width, Cell::Empty);
        }
        (0..width)
            .rev()
            .find(|&c| self.rows.iter().any(|r| r[c].is_present()))
            .map(|c| c + 1)
            .unwrap_or(0)
    }

    /// Values of one column, top to bottom
    pub fn column(&self, col: usize) -> impl Iterator<Item = &Cell> {
        self.rows.iter().map(move |r| r.get(col).unwrap_or(&EMPTY))
    }

    pub fn rows_mut(&mut self) -> &mut Vec<Vec<Cell>> {
        &mut self.rows
    }
}

impl From<Vec<Vec<Cell>>> for Matrix {
    fn from(rows: Vec<Vec<Cell>>) -> Self {
        Self::from_rows(rows)
    }
}

/// A matrix paired with the worksheet name it is written under
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub matrix: Matrix,
}

impl Sheet {
    pub fn new(name: impl Into<String>, matrix: Matrix) -> Self {
        Self {
            name: name.into(),
            matrix,
        }
    }
}
