//! Memo / PAD document classification
//!
//! Reads the free-text history of a commitment ("MEMO 123/2024 - compra de
//! ...", "(PAD 45) ...") and decides which kind of supporting document it
//! cites, together with the document number. When the text cites nothing
//! recognizable, the expense code decides between a service provider and
//! everything else.

use crate::types::Cell;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Year appended to memo/PAD numbers that carry none, when the caller opts in
pub const DEFAULT_FALLBACK_YEAR: u16 = 2025;

static PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(([^)]+)\)").expect("valid regex"));
static YEAR_DUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d{4})/(\d{4})").expect("valid regex"));
static MEMO_TYPOS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:MOEMORANDO|MEO|MWMO|MEMRANDOO|MEMRANDO)\b").expect("valid regex")
});
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").expect("valid regex"));
static PAD_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:PAD|PAA|PA)\b").expect("valid regex"));
static PROCESS_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^PROCESSO\s+ADMINI?STRATIVO\b").expect("valid regex"));
static CONTRACT_PROCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"CONTRATO.*PROCESSO\s+ADMINISTRATIVO").expect("valid regex"));
static NUMBER_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9][0-9.\s]*)\s*/\s*(\d{4})").expect("valid regex"));
static LABEL_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:PAD|PAA|PA)\b[^0-9]*([0-9][0-9.\s]*)")
        .expect("valid regex")
});
static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"([0-9][0-9.\s]*)").expect("valid regex"));
static PURE_NUMBER_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9][0-9.]*\s*/\s*\d{4}$").expect("valid regex"));
static ANY_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\d{4})").expect("valid regex"));

/// Kind of document a commitment cites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Memo,
    Pad,
    Prestador,
    Outros,
    Unclassified,
}

impl DocumentKind {
    /// Label written to the type column
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Memo => "memo",
            DocumentKind::Pad => "pad",
            DocumentKind::Prestador => "prestador",
            DocumentKind::Outros => "outros",
            DocumentKind::Unclassified => "",
        }
    }
}

/// Result of classifying one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: DocumentKind,
    pub number: String,
}

impl Classification {
    fn new(kind: DocumentKind, number: impl Into<String>) -> Self {
        Self {
            kind,
            number: number.into(),
        }
    }

    fn fallback(expense: Option<&Cell>) -> Self {
        Self::new(classify_expense(expense), "")
    }
}

/// Classifier options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierOptions {
    /// Complete year-less memo/PAD numbers with this year
    pub default_year: Option<u16>,
}

/// True when the expense code marks a service provider (`.35` or `.79`
/// element, not followed by a further segment)
pub fn is_provider_expense(code: &str) -> bool {
    if code.trim().is_empty() || code.contains(".35.") || code.contains(".79.") {
        return false;
    }
    code.contains(".35") || code.contains(".79")
}

fn classify_expense(expense: Option<&Cell>) -> DocumentKind {
    match expense.and_then(Cell::to_text) {
        Some(code) if !code.trim().is_empty() => {
            if is_provider_expense(&code) {
                DocumentKind::Prestador
            } else {
                DocumentKind::Outros
            }
        }
        _ => DocumentKind::Unclassified,
    }
}

fn only_digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// `"1.234 / 2024"` → `"1234/2024"`
fn number_with_year(text: &str) -> Option<String> {
    let caps = NUMBER_YEAR.captures(text)?;
    let number = only_digits(&caps[1]);
    if number.is_empty() {
        return None;
    }
    Some(format!("{}/{}", number, &caps[2]))
}

fn collapse_repeated_year(text: &str) -> String {
    YEAR_DUP
        .replace_all(text, |caps: &Captures| {
            if caps[1] == caps[2] {
                format!("/{}", &caps[1])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn complete_year(number: String, principal: &str, options: ClassifierOptions) -> String {
    let Some(year) = options.default_year else {
        return number;
    };
    if number.is_empty() || number.contains('/') {
        return number;
    }
    match ANY_YEAR.captures(principal) {
        Some(caps) => format!("{}/{}", number, &caps[1]),
        None => format!("{}/{}", number, year),
    }
}

/// Classify a history text, with the expense code as fallback evidence
///
/// Total: any input yields a classification, never an error.
pub fn classify(text: &Cell, expense: Option<&Cell>, options: ClassifierOptions) -> Classification {
    let raw = text.to_text().unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Classification::fallback(expense);
    }

    let source = match trimmed.strip_prefix("((") {
        Some(rest) => format!("({}", rest),
        None => trimmed.to_string(),
    };
    let principal = match PAREN.captures(&source) {
        Some(caps) => caps[1].trim().to_string(),
        None => source.clone(),
    };
    let principal = collapse_repeated_year(&principal);

    let upper = principal.to_uppercase().replace("MEMORANDO", "MEMO");
    let upper = MEMO_TYPOS.replace_all(&upper, "MEMO").into_owned();
    let head = NON_WORD.replace_all(&upper, " ");
    let head = head.trim();

    let is_pad = PAD_PREFIX.is_match(head);
    let is_process = PROCESS_PREFIX.is_match(head) && !CONTRACT_PROCESS.is_match(&upper);

    if is_pad || is_process {
        let full = number_with_year(&principal);
        let number = match &full {
            Some(f) => f.split('/').next().unwrap_or_default().to_string(),
            None => LABEL_NUMBER
                .captures(&principal)
                .map(|caps| only_digits(&caps[1]))
                .unwrap_or_default(),
        };
        if !number.is_empty() && number.len() <= 4 {
            let doc = full.unwrap_or(number);
            return Classification::new(DocumentKind::Pad, complete_year(doc, &principal, options));
        }
        return Classification::fallback(expense);
    }

    if upper.contains("MEMO") || PURE_NUMBER_YEAR.is_match(&upper) {
        let doc = number_with_year(&principal).unwrap_or_else(|| {
            FIRST_NUMBER
                .captures(&principal)
                .map(|caps| only_digits(&caps[1]))
                .unwrap_or_default()
        });
        return Classification::new(DocumentKind::Memo, complete_year(doc, &principal, options));
    }

    Classification::fallback(expense)
}

/// Score a candidate expense cell: 2 for a provider-style code, 1 for any
/// `dd.dd` element not embedded in a longer digit run, 0 for codes with a
/// `.35`/`.79` element followed by a further segment
pub fn expense_score(cell: &Cell) -> u32 {
    let Some(text) = cell.to_text() else {
        return 0;
    };
    if text.contains(".35.") || text.contains(".79.") {
        return 0;
    }
    if is_provider_expense(&text) {
        return 2;
    }
    if has_isolated_element(&text) {
        1
    } else {
        0
    }
}

fn has_isolated_element(text: &str) -> bool {
    let b = text.as_bytes();
    if b.len() < 5 {
        return false;
    }
    (0..=b.len() - 5).any(|i| {
        let window = &b[i..i + 5];
        let shape = window[0].is_ascii_digit()
            && window[1].is_ascii_digit()
            && window[2] == b'.'
            && window[3].is_ascii_digit()
            && window[4].is_ascii_digit();
        let before = i > 0 && b[i - 1].is_ascii_digit();
        let after = i + 5 < b.len() && b[i + 5].is_ascii_digit();
        shape && !before && !after
    })
}
