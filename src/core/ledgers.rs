//! The six SIGEF ledger layouts and their pipelines
//!
//! Each report exported by the ledger system has its own quirks (wrapped
//! lines, subtotal rows, values pushed into the wrong column). The stage lists
//! below undo them in a fixed order; every stage assumes the column layout
//! left by the one before it.

use crate::core::classifier::DEFAULT_FALLBACK_YEAR;
use crate::core::pipeline::Pipeline;
use crate::core::stages::{
    Check, ColumnRef, ExpenseSource, Placement, RowRule, Stage, Sweep,
};
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Report kinds understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ledger {
    /// Empenhos liquidados: liquidated commitments, two output sheets
    Liquidados,
    /// Empenhos emitidos: issued commitments with memo/PAD classification
    Emitidos,
    /// Empenhos pagos: paid commitments
    Pagos,
    /// Empenhos a pagar: commitments awaiting payment
    APagar,
    /// Empenhos retidos: withholdings split per type
    Retidos,
    /// Creditor list filtered to rows with a CPF or CNPJ
    CpfCnpj,
}

impl Ledger {
    pub const ALL: [Ledger; 6] = [
        Ledger::Liquidados,
        Ledger::Emitidos,
        Ledger::Pagos,
        Ledger::APagar,
        Ledger::Retidos,
        Ledger::CpfCnpj,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ledger::Liquidados => "liquidados",
            Ledger::Emitidos => "emitidos",
            Ledger::Pagos => "pagos",
            Ledger::APagar => "a-pagar",
            Ledger::Retidos => "retidos",
            Ledger::CpfCnpj => "cpf-cnpj",
        }
    }

    /// Appended to the input's file stem to name the output
    pub fn output_suffix(&self) -> &'static str {
        match self {
            Ledger::Liquidados => "_FINAL",
            Ledger::Emitidos | Ledger::Pagos => "_SAIDA",
            Ledger::APagar => "_FILTRADO",
            Ledger::Retidos => "_FINAL_SEPARADA",
            Ledger::CpfCnpj => "_FILTRADO_TIPO",
        }
    }

    /// `dir/report.xlsx` → `dir/report<suffix>.xlsx`
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        input.with_file_name(format!("{}{}.xlsx", stem, self.output_suffix()))
    }

    /// Build the pipeline with the default classifier year
    pub fn default_pipeline(&self) -> Pipeline {
        self.pipeline(DEFAULT_FALLBACK_YEAR)
    }

    /// Build the pipeline; `default_year` completes year-less memo numbers
    /// where the layout asks for it
    pub fn pipeline(&self, default_year: u16) -> Pipeline {
        let (primary_sheet, stages) = match self {
            Ledger::Liquidados => ("Planilha Bruta Liq", liquidados(default_year)),
            Ledger::Emitidos => ("Empenhos Emitidos", emitidos()),
            Ledger::Pagos => ("Empenhos Pagos", pagos()),
            Ledger::APagar => ("Sheet1", a_pagar()),
            Ledger::Retidos => ("Planilha Bruta", retidos()),
            Ledger::CpfCnpj => ("Resultado", cpf_cnpj()),
        };
        Pipeline {
            ledger: *self,
            primary_sheet: primary_sheet.to_string(),
            stages,
        }
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//==============================================================================
// Stage shorthands
//==============================================================================

fn col(letters: &str) -> ColumnRef {
    ColumnRef::letter(letters)
}

fn cols(letters: &[&str]) -> Vec<ColumnRef> {
    letters.iter().map(|l| ColumnRef::letter(l)).collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn delete(letters: &[&str]) -> Stage {
    Stage::DeleteColumns {
        columns: cols(letters),
    }
}

fn insert(letter: &str) -> Stage {
    Stage::InsertColumn { at: col(letter) }
}

fn fill_down(letters: &[&str], start_row: usize) -> Stage {
    Stage::FillDown {
        columns: cols(letters),
        start_row,
    }
}

fn migrate(from: &str, to: &str, when: Vec<Check>) -> Stage {
    Stage::Migrate {
        from: col(from),
        to: col(to),
        when,
        from_row: 0,
    }
}

fn shift(letter: &str, by: isize, when: Vec<Check>, sweep: Sweep) -> Stage {
    Stage::Shift {
        column: col(letter),
        by,
        when,
        sweep,
    }
}

//==============================================================================
// Ledger stage lists
//==============================================================================

/// Liquidated commitments: the report wraps each entry over several lines;
/// values are pulled back onto one row, then a filtered copy gets the
/// memo/PAD classification.
fn liquidados(default_year: u16) -> Vec<Stage> {
    let mut stages = vec![
        Stage::TrimTrailingRows,
        Stage::NormalizeWidth,
        Stage::DeleteRow { row: 1 },
        delete(&["N", "L"]),
        Stage::StripLabel {
            column: col("B"),
            label: "objeto:".into(),
        },
        Stage::FilterRows {
            from_row: 1,
            rules: vec![
                RowRule::NoCellContains(strings(&["documento fiscal"])),
                RowRule::JoinedTextLacks(strings(&[
                    "total do dia",
                    "total do mes",
                    "total do mês",
                    "total da unidade gestora",
                    "total geral",
                ])),
                RowRule::NotBlank,
            ],
        },
        fill_down(&["A", "B", "D", "E", "G", "I", "J"], 2),
        insert("C"),
        migrate("D", "C", vec![Check::present(col("M"))]),
        insert("D"),
        migrate("E", "D", vec![Check::present(col("H"))]),
        migrate("E", "O", vec![Check::absent(col("N"))]),
        fill_down(&["C"], 2),
        delete(&["E"]),
        Stage::CutAtDelimiter {
            column: col("C"),
            delimiter: '-',
        },
        migrate("N", "O", vec![Check::present_at(col("N"), 1)]),
        shift("N", -2, vec![], Sweep::TopDown),
        shift("O", -1, vec![], Sweep::TopDown),
        migrate("N", "P", vec![Check::present(col("M"))]),
        shift("N", 1, vec![], Sweep::BottomUp),
    ];
    for letter in ["D", "G", "I", "L"] {
        stages.push(shift(letter, -3, vec![], Sweep::TopDown));
    }
    for letter in ["D", "G", "L"] {
        stages.push(shift(
            letter,
            1,
            vec![Check::present_at(col("N"), 1)],
            Sweep::TopDown,
        ));
    }
    stages.extend([
        insert("D"),
        Stage::Aggregate {
            sources: cols(&["E", "J"]),
            target: col("D"),
            separator: ";".into(),
        },
        Stage::SetHeaders {
            labels: [
                ("D", "Doc/nota fiscal"),
                ("H", "Valor auxiliar 1"),
                ("J", "doc/nota fiscal auxiliar"),
                ("M", "Valor auxiliar 2"),
                ("P", "Hist.Empenho"),
                ("Q", "Hist.Liq"),
            ]
            .iter()
            .map(|(l, label)| (col(l), label.to_string()))
            .collect(),
        },
        delete(&["E"]),
        migrate("N", "O", vec![]),
        delete(&["N"]),
        Stage::TrimTrailingRows,
        Stage::NormalizeWidth,
        Stage::Derive {
            name: "Liquidados Final".into(),
            keep_if: col("M"),
            drop: cols(&["L", "I", "G"]),
            then: vec![Stage::Classify {
                text: col("L"),
                expense: ExpenseSource::Absent,
                kind_header: "Tipo".into(),
                number_header: "Documento".into(),
                placement: Placement::At {
                    kind: col("M"),
                    number: col("N"),
                },
                default_year: Some(default_year),
            }],
        },
        Stage::DatesToText {
            header_token: "data".into(),
        },
        Stage::DateColumn { column: col("A") },
        Stage::RenameHeader {
            from: "Beneficiário".into(),
            to: "Credor/Fornecedor".into(),
        },
    ]);
    stages
}

/// Issued commitments: clean wrapped cells, then classify the history column
fn emitidos() -> Vec<Stage> {
    vec![
        Stage::DeleteRow { row: 1 },
        Stage::ClearWhen {
            column: ColumnRef::header("Valor (R$)"),
            when: vec![Check::absent(col("H"))],
            from_row: 1,
        },
        Stage::ClearContaining {
            column: ColumnRef::header("Data"),
            needle: "Objeto:".into(),
        },
        Stage::Migrate {
            from: ColumnRef::header("Nr emp."),
            to: ColumnRef::End,
            when: vec![Check::absent(ColumnRef::header("Espécie"))],
            from_row: 1,
        },
        delete(&["G"]),
        Stage::ScrollUp {
            column: col("J"),
            from_row: 1,
        },
        delete(&["I"]),
        Stage::FilterRows {
            from_row: 1,
            rules: vec![RowRule::NotBlank],
        },
        fill_down(&["A"], 2),
        Stage::Classify {
            text: col("I"),
            expense: ExpenseSource::Detect,
            kind_header: "Tipo".into(),
            number_header: "Documento".into(),
            placement: Placement::Append,
            default_year: None,
        },
        Stage::DateColumn { column: col("A") },
    ]
}

/// Paid commitments: drop subtotal rows and tidy the settlement sequence
fn pagos() -> Vec<Stage> {
    vec![
        Stage::DeleteRow { row: 1 },
        Stage::FilterRows {
            from_row: 1,
            rules: vec![RowRule::FirstCellLacksPrefix(strings(&[
                "Total do empenho:",
                "Total da Unidade Gestora:",
                "Total Geral",
            ]))],
        },
        fill_down(&["C"], 1),
        Stage::KeepDigits {
            column: ColumnRef::HeaderAnyOf(strings(&[
                "seq. liq.",
                "seq.liq.",
                "seq liq.",
                "seq liq",
            ])),
            max_len: 7,
        },
        Stage::DateColumn {
            column: ColumnRef::header("Data"),
        },
    ]
}

/// Commitments awaiting payment: keep rows with a settlement number
fn a_pagar() -> Vec<Stage> {
    let settlement = ColumnRef::HeaderContains("av. liquid".into());
    vec![
        Stage::FilterRows {
            from_row: 1,
            rules: vec![RowRule::ColumnPresent(settlement.clone())],
        },
        Stage::DropEmptyColumns,
        Stage::TruncateText {
            column: settlement,
            max_chars: 7,
        },
        Stage::FillDownMatching {
            tokens: strings(&["data", "date", "dt", "emissao", "vencimento"]),
            fallback: col("A"),
            start_row: 1,
        },
        Stage::DateColumn { column: col("A") },
    ]
}

/// Withholdings: reshape to a fixed 12-column table, then split per type
fn retidos() -> Vec<Stage> {
    vec![
        Stage::AppendColumns { count: 2 },
        Stage::CopyColumn {
            from: col("O"),
            to: ColumnRef::End,
        },
        Stage::FilterRows {
            from_row: 0,
            rules: vec![RowRule::NoCellContains(strings(&["total geral"]))],
        },
        delete(&[
            "F", "G", "I", "K", "N", "O", "P", "Q", "R", "S", "T", "U", "X",
        ]),
        Stage::FilterRows {
            from_row: 2,
            rules: vec![RowRule::NoCellContains(strings(&[
                "conta contábil",
                "valor",
                "doc. extraorçamentário",
            ]))],
        },
        Stage::FilterRows {
            from_row: 0,
            rules: vec![RowRule::NotBlank],
        },
        Stage::DeleteRow { row: 0 },
        Stage::FillDown {
            columns: vec![
                col("A"),
                col("C"),
                col("E"),
                col("F"),
                col("G"),
                col("J"),
                ColumnRef::Last,
            ],
            start_row: 0,
        },
        Stage::SwapColumns {
            a: col("D"),
            b: ColumnRef::Last,
        },
        Stage::FitWidth { width: 12 },
        Stage::InsertHeaderRow {
            labels: strings(&[
                "Data",
                "Retenção",
                "Sequência",
                "Av.liquidação",
                "Fonte recursos",
                "Nr emp.",
                "Credor/Fornecedor",
                "CNPJ",
                "Valor retido",
                "Doc. fiscal",
                "Doc.extra",
                "Valor",
            ]),
        },
        Stage::ParseDecimal {
            column: ColumnRef::header("Valor retido"),
        },
        Stage::ParseDecimal {
            column: ColumnRef::header("Valor"),
        },
        Stage::Partition {
            key: ColumnRef::header("Retenção"),
            amount: ColumnRef::header("Valor retido"),
        },
    ]
}

/// Creditors: extract the tax id and keep only identified rows
fn cpf_cnpj() -> Vec<Stage> {
    vec![
        Stage::ExtractTaxId {
            source: col("F"),
            id_header: "CPF_CNPJ".into(),
            kind_header: "Tipo".into(),
        },
        Stage::FilterRows {
            from_row: 1,
            rules: vec![RowRule::ColumnPresent(ColumnRef::header("CPF_CNPJ"))],
        },
        delete(&["B", "D", "E", "H", "I"]),
    ]
}
