//! Stage descriptors and the matrix edits they perform
//!
//! A stage is plain data: the ledger definitions build ordered lists of them
//! and the pipeline runs each exactly once. Column references are resolved
//! against the matrix as it stands when the stage starts, so a letter always
//! means "the column at that position right now".

use crate::core::classifier::{self, ClassifierOptions};
use crate::core::dates;
use crate::core::pipeline::Workbench;
use crate::core::text::{self, normalize, normalize_for_search};
use crate::matrix::{column_index, column_letters, Matrix, Sheet};
use crate::types::Cell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Sheet holding the rows whose withholding type is filled in
pub const PARTITION_ALL_SHEET: &str = "GERAL";
/// Sheet holding the rows without a withholding type
pub const PARTITION_BLANK_SHEET: &str = "TOTAL";
/// Per-type summary sheet
pub const PARTITION_SUMMARY_SHEET: &str = "LISTA";
/// Sheet name used when a type label sanitizes to nothing
pub const PARTITION_FALLBACK_NAME: &str = "RETENCAO";

const DETECT_SAMPLE_ROWS: usize = 200;
const DETECT_MIN_SCORE: u32 = 6;

//==============================================================================
// Column references
//==============================================================================

/// How a stage names a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// Spreadsheet letter at the time the stage runs (`"M"`)
    Letter(String),
    /// Header text, compared after trimming, lowercasing and diacritic removal
    Header(String),
    /// First header equal to any of these
    HeaderAnyOf(Vec<String>),
    /// First header containing this text
    HeaderContains(String),
    /// Last column of the widest row
    Last,
    /// One past the last column
    End,
}

impl ColumnRef {
    pub fn letter(letters: &str) -> Self {
        ColumnRef::Letter(letters.to_string())
    }

    pub fn header(label: &str) -> Self {
        ColumnRef::Header(label.to_string())
    }

    /// 0-based index of the referenced column, if it can be found
    pub fn resolve(&self, m: &Matrix) -> Option<usize> {
        match self {
            ColumnRef::Letter(letters) => column_index(letters),
            ColumnRef::Header(label) => {
                let target = normalize(label);
                find_header(m, |h| h == target)
            }
            ColumnRef::HeaderAnyOf(labels) => {
                let targets: Vec<String> = labels.iter().map(|l| normalize(l)).collect();
                find_header(m, |h| targets.iter().any(|t| t == h))
            }
            ColumnRef::HeaderContains(part) => {
                let needle = normalize(part);
                find_header(m, |h| h.contains(&needle))
            }
            ColumnRef::Last => m.width().checked_sub(1),
            ColumnRef::End => Some(m.width()),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Letter(l) => f.write_str(l),
            ColumnRef::Header(h) => write!(f, "\"{}\"", h),
            ColumnRef::HeaderAnyOf(hs) => write!(f, "any of {:?}", hs),
            ColumnRef::HeaderContains(h) => write!(f, "header containing \"{}\"", h),
            ColumnRef::Last => f.write_str("last"),
            ColumnRef::End => f.write_str("end"),
        }
    }
}

/// Plans show column references the way they print
impl Serialize for ColumnRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn find_header(m: &Matrix, pred: impl Fn(&str) -> bool) -> Option<usize> {
    m.header()
        .iter()
        .position(|c| c.to_text().is_some_and(|t| pred(&normalize(&t))))
}

fn resolve(m: &Matrix, column: &ColumnRef, stage: &str) -> Option<usize> {
    let idx = column.resolve(m);
    if idx.is_none() {
        warn!(stage, column = %column, "column not found, stage skipped");
    }
    idx
}

//==============================================================================
// Row conditions
//==============================================================================

/// Presence test on a cell relative to the row being edited
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub column: ColumnRef,
    pub row_offset: isize,
    pub present: bool,
}

impl Check {
    pub fn present(column: ColumnRef) -> Self {
        Self {
            column,
            row_offset: 0,
            present: true,
        }
    }

    pub fn absent(column: ColumnRef) -> Self {
        Self {
            column,
            row_offset: 0,
            present: false,
        }
    }

    /// `column` must be present `offset` rows away from the edited row
    pub fn present_at(column: ColumnRef, offset: isize) -> Self {
        Self {
            column,
            row_offset: offset,
            present: true,
        }
    }
}

struct ResolvedCheck {
    col: usize,
    row_offset: isize,
    present: bool,
}

fn resolve_checks(m: &Matrix, checks: &[Check], stage: &str) -> Option<Vec<ResolvedCheck>> {
    checks
        .iter()
        .map(|c| {
            resolve(m, &c.column, stage).map(|col| ResolvedCheck {
                col,
                row_offset: c.row_offset,
                present: c.present,
            })
        })
        .collect()
}

fn checks_hold(m: &Matrix, row: usize, checks: &[ResolvedCheck]) -> bool {
    checks.iter().all(|c| {
        let target = row as isize + c.row_offset;
        let present = target >= 0 && m.get(target as usize, c.col).is_present();
        present == c.present
    })
}

/// Row-filter predicate; a row survives when every rule keeps it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowRule {
    /// Drop rows where any cell contains one of the phrases
    NoCellContains(Vec<String>),
    /// Drop rows whose joined text contains one of the phrases
    JoinedTextLacks(Vec<String>),
    /// Drop rows without any value
    NotBlank,
    /// Keep rows with a value in the column
    ColumnPresent(ColumnRef),
    /// Drop rows whose cell in the column contains the phrase
    ColumnLacks(ColumnRef, String),
    /// Drop rows whose first cell starts with one of the prefixes (case-insensitive)
    FirstCellLacksPrefix(Vec<String>),
}

fn search_phrases(phrases: &[String]) -> Vec<String> {
    phrases.iter().map(|p| normalize_for_search(p)).collect()
}

enum CompiledRule {
    NoCellContains(Vec<String>),
    JoinedTextLacks(Vec<String>),
    NotBlank,
    ColumnPresent(usize),
    ColumnLacks(usize, String),
    FirstCellLacksPrefix(Vec<String>),
}

impl RowRule {
    fn compile(&self, m: &Matrix) -> Option<CompiledRule> {
        Some(match self {
            RowRule::NoCellContains(ps) => CompiledRule::NoCellContains(search_phrases(ps)),
            RowRule::JoinedTextLacks(ps) => CompiledRule::JoinedTextLacks(search_phrases(ps)),
            RowRule::NotBlank => CompiledRule::NotBlank,
            RowRule::ColumnPresent(col) => {
                CompiledRule::ColumnPresent(resolve(m, col, "filter_rows")?)
            }
            RowRule::ColumnLacks(col, p) => {
                CompiledRule::ColumnLacks(resolve(m, col, "filter_rows")?, normalize_for_search(p))
            }
            RowRule::FirstCellLacksPrefix(ps) => {
                CompiledRule::FirstCellLacksPrefix(ps.iter().map(|p| p.to_lowercase()).collect())
            }
        })
    }
}

impl CompiledRule {
    fn keeps(&self, row: &[Cell]) -> bool {
        match self {
            CompiledRule::NoCellContains(phrases) => !row.iter().any(|c| {
                c.to_text().is_some_and(|t| {
                    let t = normalize_for_search(&t);
                    phrases.iter().any(|p| t.contains(p.as_str()))
                })
            }),
            CompiledRule::JoinedTextLacks(phrases) => {
                let joined = row
                    .iter()
                    .filter_map(Cell::to_text)
                    .collect::<Vec<_>>()
                    .join(" ");
                let joined = normalize_for_search(&joined);
                !phrases.iter().any(|p| joined.contains(p.as_str()))
            }
            CompiledRule::NotBlank => row.iter().any(Cell::is_present),
            CompiledRule::ColumnPresent(col) => row.get(*col).is_some_and(Cell::is_present),
            CompiledRule::ColumnLacks(col, phrase) => !row
                .get(*col)
                .and_then(Cell::to_text)
                .is_some_and(|t| normalize_for_search(&t).contains(phrase.as_str())),
            CompiledRule::FirstCellLacksPrefix(prefixes) => {
                let first = row
                    .first()
                    .and_then(Cell::as_str)
                    .map(|s| s.trim().to_lowercase())
                    .unwrap_or_default();
                first.is_empty() || !prefixes.iter().any(|p| first.starts_with(p.as_str()))
            }
        }
    }
}

//==============================================================================
// Stage descriptors
//==============================================================================

/// Order in which a shift visits source rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sweep {
    TopDown,
    BottomUp,
}

/// Where the classifier finds the expense code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseSource {
    Absent,
    Column(ColumnRef),
    /// Header "Despesa", else the column scoring highest on expense markers
    Detect,
}

/// Where the classifier writes its two result columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    At { kind: ColumnRef, number: ColumnRef },
    Append,
}

/// One named, immutable pipeline step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    TrimTrailingRows,
    NormalizeWidth,
    DeleteRow {
        row: usize,
    },
    InsertColumn {
        at: ColumnRef,
    },
    /// All columns are resolved first, then removed right to left
    DeleteColumns {
        columns: Vec<ColumnRef>,
    },
    AppendColumns {
        count: usize,
    },
    CopyColumn {
        from: ColumnRef,
        to: ColumnRef,
    },
    SwapColumns {
        a: ColumnRef,
        b: ColumnRef,
    },
    /// Pad or cut every row to exactly `width` cells
    FitWidth {
        width: usize,
    },
    InsertHeaderRow {
        labels: Vec<String>,
    },
    StripLabel {
        column: ColumnRef,
        label: String,
    },
    ClearWhen {
        column: ColumnRef,
        when: Vec<Check>,
        from_row: usize,
    },
    ClearContaining {
        column: ColumnRef,
        needle: String,
    },
    CutAtDelimiter {
        column: ColumnRef,
        delimiter: char,
    },
    KeepDigits {
        column: ColumnRef,
        max_len: usize,
    },
    TruncateText {
        column: ColumnRef,
        max_chars: usize,
    },
    ParseDecimal {
        column: ColumnRef,
    },
    FilterRows {
        from_row: usize,
        rules: Vec<RowRule>,
    },
    DropEmptyColumns,
    FillDown {
        columns: Vec<ColumnRef>,
        start_row: usize,
    },
    /// Fill down every column whose header contains one of `tokens`,
    /// or `fallback` when none does
    FillDownMatching {
        tokens: Vec<String>,
        fallback: ColumnRef,
        start_row: usize,
    },
    /// Move present values `by` rows (negative = up), clearing the source
    Shift {
        column: ColumnRef,
        by: isize,
        when: Vec<Check>,
        sweep: Sweep,
    },
    /// Lift a column one row: each cell takes the value below it
    ScrollUp {
        column: ColumnRef,
        from_row: usize,
    },
    Migrate {
        from: ColumnRef,
        to: ColumnRef,
        when: Vec<Check>,
        from_row: usize,
    },
    Aggregate {
        sources: Vec<ColumnRef>,
        target: ColumnRef,
        separator: String,
    },
    SetHeaders {
        labels: Vec<(ColumnRef, String)>,
    },
    RenameHeader {
        from: String,
        to: String,
    },
    DatesToText {
        header_token: String,
    },
    DateColumn {
        column: ColumnRef,
    },
    ExtractTaxId {
        source: ColumnRef,
        id_header: String,
        kind_header: String,
    },
    Classify {
        text: ColumnRef,
        expense: ExpenseSource,
        kind_header: String,
        number_header: String,
        placement: Placement,
        default_year: Option<u16>,
    },
    /// Filtered copy of the primary sheet, edited by `then` only
    Derive {
        name: String,
        keep_if: ColumnRef,
        drop: Vec<ColumnRef>,
        then: Vec<Stage>,
    },
    /// Split rows by withholding type into per-type sheets plus a summary
    Partition {
        key: ColumnRef,
        amount: ColumnRef,
    },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::TrimTrailingRows => "trim_trailing_rows",
            Stage::NormalizeWidth => "normalize_width",
            Stage::DeleteRow { .. } => "delete_row",
            Stage::InsertColumn { .. } => "insert_column",
            Stage::DeleteColumns { .. } => "delete_columns",
            Stage::AppendColumns { .. } => "append_columns",
            Stage::CopyColumn { .. } => "copy_column",
            Stage::SwapColumns { .. } => "swap_columns",
            Stage::FitWidth { .. } => "fit_width",
            Stage::InsertHeaderRow { .. } => "insert_header_row",
            Stage::StripLabel { .. } => "strip_label",
            Stage::ClearWhen { .. } => "clear_when",
            Stage::ClearContaining { .. } => "clear_containing",
            Stage::CutAtDelimiter { .. } => "cut_at_delimiter",
            Stage::KeepDigits { .. } => "keep_digits",
            Stage::TruncateText { .. } => "truncate_text",
            Stage::ParseDecimal { .. } => "parse_decimal",
            Stage::FilterRows { .. } => "filter_rows",
            Stage::DropEmptyColumns => "drop_empty_columns",
            Stage::FillDown { .. } => "fill_down",
            Stage::FillDownMatching { .. } => "fill_down_matching",
            Stage::Shift { .. } => "shift",
            Stage::ScrollUp { .. } => "scroll_up",
            Stage::Migrate { .. } => "migrate",
            Stage::Aggregate { .. } => "aggregate",
            Stage::SetHeaders { .. } => "set_headers",
            Stage::RenameHeader { .. } => "rename_header",
            Stage::DatesToText { .. } => "dates_to_text",
            Stage::DateColumn { .. } => "date_column",
            Stage::ExtractTaxId { .. } => "extract_tax_id",
            Stage::Classify { .. } => "classify",
            Stage::Derive { .. } => "derive",
            Stage::Partition { .. } => "partition",
        }
    }

    /// Run the stage; sheet-producing stages add to `bench.derived`, every
    /// other stage edits each sheet already on the bench
    pub fn apply(&self, bench: &mut Workbench) {
        match self {
            Stage::Derive {
                name,
                keep_if,
                drop,
                then,
            } => derive(bench, name, keep_if, drop, then),
            Stage::Partition { key, amount } => partition(bench, key, amount),
            other => bench.for_each_matrix(|m| other.apply_matrix(m)),
        }
    }

    /// Run a single-matrix stage
    pub fn apply_matrix(&self, m: &mut Matrix) {
        match self {
            Stage::TrimTrailingRows => m.trim_trailing_empty_rows(),
            Stage::NormalizeWidth => {
                let used = m.normalize_width();
                debug!(width = m.width(), used, "normalized width");
            }
            Stage::DeleteRow { row } => m.delete_row(*row),
            Stage::InsertColumn { at } => {
                if let Some(c) = resolve(m, at, self.name()) {
                    m.insert_column(c);
                }
            }
            Stage::DeleteColumns { columns } => delete_columns(m, columns),
            Stage::AppendColumns { count } => {
                m.normalize_width();
                for row in m.rows_mut() {
                    row.extend(std::iter::repeat(Cell::Empty).take(*count));
                }
            }
            Stage::CopyColumn { from, to } => copy_column(m, from, to),
            Stage::SwapColumns { a, b } => swap_columns(m, a, b),
            Stage::FitWidth { width } => {
                for row in m.rows_mut() {
                    row.resize(*width, Cell::Empty);
                }
            }
            Stage::InsertHeaderRow { labels } => {
                m.insert_row(0, labels.iter().map(|l| Cell::text(l.as_str())).collect());
            }
            Stage::StripLabel { column, label } => edit_text(m, column, self.name(), |s| {
                text::strip_prefix_ignore_case(s.trim_start(), label).map(|rest| Cell::text(rest.trim()))
            }),
            Stage::ClearWhen {
                column,
                when,
                from_row,
            } => clear_when(m, column, when, *from_row),
            Stage::ClearContaining { column, needle } => edit_text(m, column, self.name(), |s| {
                s.contains(needle.as_str()).then_some(Cell::Empty)
            }),
            Stage::CutAtDelimiter { column, delimiter } => {
                edit_text(m, column, self.name(), |s| {
                    let kept = match s.find(*delimiter) {
                        Some(pos) if pos > 0 => &s[..pos],
                        _ => s,
                    };
                    Some(Cell::text(kept.trim()))
                })
            }
            Stage::KeepDigits { column, max_len } => edit_values(m, column, self.name(), |v| {
                let digits: String = text::digits(&v).chars().take(*max_len).collect();
                Some(Cell::text(digits))
            }),
            Stage::TruncateText { column, max_chars } => {
                edit_values(m, column, self.name(), |v| {
                    Some(Cell::text(v.chars().take(*max_chars).collect::<String>()))
                })
            }
            Stage::ParseDecimal { column } => edit_text(m, column, self.name(), |s| {
                s.trim().replace(',', ".").parse::<f64>().ok().map(Cell::Number)
            }),
            Stage::FilterRows { from_row, rules } => filter_rows(m, *from_row, rules),
            Stage::DropEmptyColumns => drop_empty_columns(m),
            Stage::FillDown { columns, start_row } => {
                for col in columns {
                    if let Some(c) = resolve(m, col, self.name()) {
                        fill_down(m, c, *start_row);
                    }
                }
            }
            Stage::FillDownMatching {
                tokens,
                fallback,
                start_row,
            } => fill_down_matching(m, tokens, fallback, *start_row),
            Stage::Shift {
                column,
                by,
                when,
                sweep,
            } => shift(m, column, *by, when, *sweep),
            Stage::ScrollUp { column, from_row } => scroll_up(m, column, *from_row),
            Stage::Migrate {
                from,
                to,
                when,
                from_row,
            } => migrate(m, from, to, when, *from_row),
            Stage::Aggregate {
                sources,
                target,
                separator,
            } => aggregate(m, sources, target, separator),
            Stage::SetHeaders { labels } => {
                for (col, label) in labels {
                    if let Some(c) = resolve(m, col, self.name()) {
                        m.set(0, c, Cell::text(label.as_str()));
                    }
                }
            }
            Stage::RenameHeader { from, to } => rename_header(m, from, to),
            Stage::DatesToText { header_token } => dates_to_text(m, header_token),
            Stage::DateColumn { column } => {
                if let Some(c) = resolve(m, column, self.name()) {
                    for r in 1..m.len() {
                        let converted = dates::to_date(m.get(r, c));
                        m.set(r, c, converted);
                    }
                }
            }
            Stage::ExtractTaxId {
                source,
                id_header,
                kind_header,
            } => extract_tax_id(m, source, id_header, kind_header),
            Stage::Classify {
                text,
                expense,
                kind_header,
                number_header,
                placement,
                default_year,
            } => classify(
                m,
                text,
                expense,
                (kind_header, number_header),
                placement,
                ClassifierOptions {
                    default_year: *default_year,
                },
            ),
            Stage::Derive { .. } | Stage::Partition { .. } => {
                warn!(stage = self.name(), "sheet-producing stage nested in a derived sheet, skipped");
            }
        }
    }
}

//==============================================================================
// Structural edits
//==============================================================================

fn delete_columns(m: &mut Matrix, columns: &[ColumnRef]) {
    let mut indices: Vec<usize> = columns
        .iter()
        .filter_map(|c| resolve(m, c, "delete_columns"))
        .collect();
    indices.sort_unstable();
    indices.dedup();
    for c in indices.into_iter().rev() {
        m.delete_column(c);
    }
}

fn copy_column(m: &mut Matrix, from: &ColumnRef, to: &ColumnRef) {
    let (Some(src), Some(dst)) = (resolve(m, from, "copy_column"), resolve(m, to, "copy_column"))
    else {
        return;
    };
    if src >= m.width() {
        return;
    }
    for r in 0..m.len() {
        let value = m.get(r, src).clone();
        m.set(r, dst, value);
    }
}

fn swap_columns(m: &mut Matrix, a: &ColumnRef, b: &ColumnRef) {
    let (Some(a), Some(b)) = (resolve(m, a, "swap_columns"), resolve(m, b, "swap_columns")) else {
        return;
    };
    let hi = a.max(b);
    for row in m.rows_mut() {
        if row.len() <= hi {
            row.resize(hi + 1, Cell::Empty);
        }
        row.swap(a, b);
    }
}

fn drop_empty_columns(m: &mut Matrix) {
    if m.len() < 2 {
        return;
    }
    let width = m.width();
    let empty: Vec<usize> = (0..width)
        .filter(|&c| !m.column(c).skip(1).any(Cell::is_present))
        .collect();
    if !empty.is_empty() {
        debug!(columns = ?empty.iter().map(|&c| column_letters(c)).collect::<Vec<_>>(), "dropping empty columns");
    }
    for c in empty.into_iter().rev() {
        m.delete_column(c);
    }
}

//==============================================================================
// Text cleanup (data rows only)
//==============================================================================

/// Rewrite text cells of a column below the header; `None` keeps the value
fn edit_text<F>(m: &mut Matrix, column: &ColumnRef, stage: &str, mut f: F)
where
    F: FnMut(&str) -> Option<Cell>,
{
    let Some(c) = resolve(m, column, stage) else {
        return;
    };
    for r in 1..m.len() {
        let replacement = match m.get(r, c) {
            Cell::Text(s) => f(s),
            _ => None,
        };
        if let Some(value) = replacement {
            m.set(r, c, value);
        }
    }
}

/// Like [`edit_text`] but sees every present value in its text form
fn edit_values<F>(m: &mut Matrix, column: &ColumnRef, stage: &str, mut f: F)
where
    F: FnMut(String) -> Option<Cell>,
{
    let Some(c) = resolve(m, column, stage) else {
        return;
    };
    for r in 1..m.len() {
        let cell = m.get(r, c);
        if !cell.is_present() {
            continue;
        }
        if let Some(value) = cell.to_text().and_then(&mut f) {
            m.set(r, c, value);
        }
    }
}

fn clear_when(m: &mut Matrix, column: &ColumnRef, when: &[Check], from_row: usize) {
    let Some(c) = resolve(m, column, "clear_when") else {
        return;
    };
    let Some(checks) = resolve_checks(m, when, "clear_when") else {
        return;
    };
    for r in from_row..m.len() {
        if checks_hold(m, r, &checks) {
            m.set(r, c, Cell::Empty);
        }
    }
}

//==============================================================================
// Row filtering
//==============================================================================

fn filter_rows(m: &mut Matrix, from_row: usize, rules: &[RowRule]) {
    let Some(compiled) = rules.iter().map(|r| r.compile(m)).collect::<Option<Vec<_>>>() else {
        return;
    };
    let before = m.len();
    m.retain_rows(from_row, |row| compiled.iter().all(|rule| rule.keeps(row)));
    debug!(dropped = before - m.len(), kept = m.len(), "filtered rows");
}

//==============================================================================
// Fill propagation and migration
//==============================================================================

/// Carry the last present value into empty cells from `start_row` down
///
/// For `start_row >= 2` the carry is seeded from the row just above the start
/// so the first filled row can inherit it. Columns beyond the header are
/// left alone.
pub fn fill_down(m: &mut Matrix, col: usize, start_row: usize) {
    if col >= m.header().len() {
        return;
    }
    let mut last = if start_row >= 2 {
        m.get(start_row - 1, col).clone()
    } else {
        Cell::Empty
    };
    for r in start_row..m.len() {
        let current = m.get(r, col);
        if current.is_present() {
            last = current.clone();
        } else if last.is_present() {
            m.set(r, col, last.clone());
        }
    }
}

fn fill_down_matching(m: &mut Matrix, tokens: &[String], fallback: &ColumnRef, start_row: usize) {
    let tokens: Vec<String> = tokens.iter().map(|t| normalize(t)).collect();
    let mut columns: Vec<usize> = m
        .header()
        .iter()
        .enumerate()
        .filter(|(_, h)| {
            h.to_text()
                .is_some_and(|t| tokens.iter().any(|tok| normalize(&t).contains(tok.as_str())))
        })
        .map(|(i, _)| i)
        .collect();
    if columns.is_empty() {
        columns.extend(resolve(m, fallback, "fill_down_matching"));
    }
    for c in columns {
        fill_down(m, c, start_row);
    }
}

fn shift(m: &mut Matrix, column: &ColumnRef, by: isize, when: &[Check], sweep: Sweep) {
    let Some(c) = resolve(m, column, "shift") else {
        return;
    };
    let Some(checks) = resolve_checks(m, when, "shift") else {
        return;
    };
    let len = m.len() as isize;
    let sources: Vec<usize> = (0..len)
        .filter(|&src| (0..len).contains(&(src + by)))
        .map(|src| src as usize)
        .collect();
    let order: Box<dyn Iterator<Item = usize>> = match sweep {
        Sweep::TopDown => Box::new(sources.into_iter()),
        Sweep::BottomUp => Box::new(sources.into_iter().rev()),
    };
    let mut moved = 0usize;
    for src in order {
        if !m.get(src, c).is_present() || !checks_hold(m, src, &checks) {
            continue;
        }
        let dst = (src as isize + by) as usize;
        let value = m.take(src, c);
        m.set(dst, c, value);
        moved += 1;
    }
    debug!(column = %column, by, moved, "shifted values");
}

fn scroll_up(m: &mut Matrix, column: &ColumnRef, from_row: usize) {
    let Some(c) = resolve(m, column, "scroll_up") else {
        return;
    };
    let len = m.len();
    if len < from_row + 2 {
        return;
    }
    for r in from_row..len - 1 {
        let below = m.get(r + 1, c).clone();
        m.set(r, c, below);
    }
    m.set(len - 1, c, Cell::Empty);
}

fn migrate(m: &mut Matrix, from: &ColumnRef, to: &ColumnRef, when: &[Check], from_row: usize) {
    let (Some(src), Some(dst)) = (resolve(m, from, "migrate"), resolve(m, to, "migrate")) else {
        return;
    };
    let Some(checks) = resolve_checks(m, when, "migrate") else {
        return;
    };
    for r in from_row..m.len() {
        if m.get(r, src).is_present() && checks_hold(m, r, &checks) {
            let value = m.take(r, src);
            m.set(r, dst, value);
        }
    }
}

//==============================================================================
// Aggregation and headers
//==============================================================================

/// Join consecutive rows where any source column has a value into the
/// block's first row, clearing the target on the rest of the block
fn aggregate(m: &mut Matrix, sources: &[ColumnRef], target: &ColumnRef, separator: &str) {
    let Some(cols) = sources
        .iter()
        .map(|s| resolve(m, s, "aggregate"))
        .collect::<Option<Vec<_>>>()
    else {
        return;
    };
    let Some(dst) = resolve(m, target, "aggregate") else {
        return;
    };
    let mut r = 0;
    while r < m.len() {
        if !any_present(m, r, &cols) {
            r += 1;
            continue;
        }
        let start = r;
        let mut parts = Vec::new();
        while r < m.len() && any_present(m, r, &cols) {
            for &c in &cols {
                let cell = m.get(r, c);
                if cell.is_present() {
                    parts.extend(cell.to_text().map(|t| t.trim().to_string()));
                }
            }
            r += 1;
        }
        m.set(start, dst, Cell::text(parts.join(separator)));
        for other in start + 1..r {
            m.set(other, dst, Cell::Empty);
        }
    }
}

fn any_present(m: &Matrix, row: usize, cols: &[usize]) -> bool {
    cols.iter().any(|&c| m.get(row, c).is_present())
}

fn rename_header(m: &mut Matrix, from: &str, to: &str) {
    let target = normalize(from);
    let hits: Vec<usize> = m
        .header()
        .iter()
        .enumerate()
        .filter(|(_, h)| h.as_str().is_some_and(|s| normalize(s) == target))
        .map(|(i, _)| i)
        .collect();
    for c in hits {
        m.set(0, c, Cell::text(to));
    }
}

fn dates_to_text(m: &mut Matrix, header_token: &str) {
    let token = normalize(header_token);
    let columns: Vec<usize> = m
        .header()
        .iter()
        .enumerate()
        .filter(|(_, h)| h.as_str().is_some_and(|s| normalize(s).contains(&token)))
        .map(|(i, _)| i)
        .collect();
    for c in columns {
        for r in 1..m.len() {
            let converted = dates::to_local_text(m.get(r, c));
            m.set(r, c, converted);
        }
    }
}

//==============================================================================
// Tax ids and classification
//==============================================================================

fn extract_tax_id(m: &mut Matrix, source: &ColumnRef, id_header: &str, kind_header: &str) {
    let Some(src) = resolve(m, source, "extract_tax_id") else {
        return;
    };
    m.normalize_width();
    let id_col = m.width();
    let kind_col = id_col + 1;
    m.set(0, id_col, Cell::text(id_header));
    m.set(0, kind_col, Cell::text(kind_header));
    for r in 1..m.len() {
        let digits = m
            .get(r, src)
            .to_text()
            .map(|t| text::digits(&t))
            .unwrap_or_default();
        let kind = match digits.len() {
            11 => "CPF",
            14 => "CNPJ",
            _ => continue,
        };
        m.set(r, id_col, Cell::Text(digits));
        m.set(r, kind_col, Cell::text(kind));
    }
}

/// Expense column for the classifier fallback
///
/// A header named "Despesa" wins; otherwise every column is scored over the
/// first data rows and the best one is taken when it scores high enough.
/// The chosen column's header is set to "Despesa".
pub fn detect_expense_column(m: &mut Matrix) -> Option<usize> {
    let found = ColumnRef::header("despesa").resolve(m).or_else(|| {
        let sample = m.len().saturating_sub(1).min(DETECT_SAMPLE_ROWS);
        let mut best: Option<(usize, u32)> = None;
        for c in 0..m.header().len() {
            let score: u32 = (1..=sample).map(|r| classifier::expense_score(m.get(r, c))).sum();
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((c, score));
            }
        }
        best.filter(|&(_, s)| s >= DETECT_MIN_SCORE).map(|(c, _)| c)
    });
    if let Some(c) = found {
        m.set(0, c, Cell::text("Despesa"));
    }
    found
}

fn classify(
    m: &mut Matrix,
    text_col: &ColumnRef,
    expense: &ExpenseSource,
    (kind_header, number_header): (&String, &String),
    placement: &Placement,
    options: ClassifierOptions,
) {
    let Some(src) = resolve(m, text_col, "classify") else {
        return;
    };
    let expense_col = match expense {
        ExpenseSource::Absent => None,
        ExpenseSource::Column(col) => resolve(m, col, "classify"),
        ExpenseSource::Detect => detect_expense_column(m),
    };
    let (kind_col, number_col) = match placement {
        Placement::At { kind, number } => {
            match (resolve(m, kind, "classify"), resolve(m, number, "classify")) {
                (Some(k), Some(n)) => (k, n),
                _ => return,
            }
        }
        Placement::Append => {
            let w = m.width();
            (w, w + 1)
        }
    };
    debug!(text = %column_letters(src), expense = ?expense_col.map(column_letters), "classifying");

    m.set(0, kind_col, Cell::text(kind_header.as_str()));
    m.set(0, number_col, Cell::text(number_header.as_str()));
    for r in 1..m.len() {
        let value = m.get(r, src).clone();
        let code = expense_col.map(|c| m.get(r, c).clone());
        let result = classifier::classify(&value, code.as_ref(), options);
        m.set(r, kind_col, Cell::text(result.kind.as_str()));
        m.set(r, number_col, Cell::text(result.number));
    }
}

//==============================================================================
// Sheet-producing stages
//==============================================================================

fn derive(bench: &mut Workbench, name: &str, keep_if: &ColumnRef, drop: &[ColumnRef], then: &[Stage]) {
    let source = &bench.primary.matrix;
    let Some(k) = resolve(source, keep_if, "derive") else {
        return;
    };
    let rows = source
        .rows()
        .iter()
        .enumerate()
        .filter(|(i, row)| *i == 0 || row.get(k).is_some_and(Cell::is_present))
        .map(|(_, row)| row.clone())
        .collect();
    let mut copy = Matrix::from_rows(rows);
    delete_columns(&mut copy, drop);
    for stage in then {
        debug!(sheet = name, stage = stage.name(), "derived stage");
        stage.apply_matrix(&mut copy);
    }
    bench.derived.push(Sheet::new(name, copy));
}

/// Amount as written in withholding reports (`"R$ 1.234,56"`); anything
/// unparseable counts as zero
pub fn parse_amount(cell: &Cell) -> f64 {
    match cell {
        Cell::Number(n) => *n,
        Cell::Text(s) => {
            let s = s.trim().replace("R$", "").replace(' ', "");
            let s = if s.contains(',') {
                s.replace('.', "").replace(',', ".")
            } else {
                s
            };
            s.parse().unwrap_or(0.0)
        }
        _ => 0.0,
    }
}

fn partition_label(cell: &Cell) -> String {
    let label = cell.to_text().unwrap_or_default().trim().to_string();
    match label.to_lowercase().as_str() {
        "nan" | "none" | "null" => String::new(),
        _ => label,
    }
}

/// Worksheet-safe name for a withholding type
pub fn partition_sheet_name(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| match c {
            ':' | '\\' | '/' | '?' | '*' | '[' | ']' => '_',
            other => other,
        })
        .collect();
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("nan") {
        PARTITION_FALLBACK_NAME.to_string()
    } else {
        cleaned.chars().take(31).collect()
    }
}

fn partition(bench: &mut Workbench, key: &ColumnRef, amount: &ColumnRef) {
    let source = &bench.primary.matrix;
    let (Some(k), Some(a)) = (resolve(source, key, "partition"), resolve(source, amount, "partition"))
    else {
        return;
    };
    let header = source.header().to_vec();

    let mut filled = Vec::new();
    let mut blank = Vec::new();
    let mut groups: BTreeMap<String, Vec<Vec<Cell>>> = BTreeMap::new();
    for row in source.rows().iter().skip(1) {
        let label = partition_label(row.get(k).unwrap_or(&Cell::Empty));
        let mut row = row.clone();
        if label.is_empty() {
            blank.push(row);
            continue;
        }
        if k < row.len() {
            row[k] = Cell::Text(label.clone());
        }
        groups.entry(label).or_default().push(row.clone());
        filled.push(row);
    }

    let with_header = |rows: Vec<Vec<Cell>>| {
        let mut all = vec![header.clone()];
        all.extend(rows);
        Matrix::from_rows(all)
    };

    let mut sheets = vec![Sheet::new(PARTITION_ALL_SHEET, with_header(filled))];
    if !blank.is_empty() {
        sheets.push(Sheet::new(PARTITION_BLANK_SHEET, with_header(blank)));
    }

    let mut summary = vec![vec![
        Cell::text("Retenção"),
        Cell::text("Qtd Linhas"),
        Cell::text("Soma Geral"),
        Cell::text("Soma Individuais"),
    ]];
    let (mut total_rows, mut total_sum) = (0usize, 0.0f64);
    for (label, rows) in groups {
        let sum: f64 = rows.iter().map(|r| parse_amount(r.get(a).unwrap_or(&Cell::Empty))).sum();
        total_rows += rows.len();
        total_sum += sum;
        summary.push(vec![
            Cell::Text(label.clone()),
            Cell::Number(rows.len() as f64),
            Cell::Number(sum),
            Cell::Number(sum),
        ]);
        sheets.push(Sheet::new(partition_sheet_name(&label), with_header(rows)));
    }
    summary.push(vec![
        Cell::text("TOTAL GERAL"),
        Cell::Number(total_rows as f64),
        Cell::Number(total_sum),
        Cell::Number(total_sum),
    ]);
    sheets.push(Sheet::new(PARTITION_SUMMARY_SHEET, Matrix::from_rows(summary)));

    debug!(sheets = sheets.len(), "partitioned withholdings");
    bench.derived.extend(sheets);
}
