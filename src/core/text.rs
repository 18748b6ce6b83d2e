//! Text normalization for header and phrase matching

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Trim, lowercase and strip diacritics (`" Beneficiário "` → `"beneficiario"`)
pub fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// Normalization used for phrase searches inside cells: non-breaking spaces
/// and line breaks count as plain spaces
pub fn normalize_for_search(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| match c {
            '\u{a0}' | '\r' | '\n' | '\t' => ' ',
            other => other,
        })
        .collect();
    normalize(&flat)
}

/// Keep ASCII digits only
pub fn digits(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

/// Case-insensitive literal prefix removal; `None` when the prefix is absent
pub fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) || head.to_lowercase() == prefix.to_lowercase() {
        text.get(prefix.len()..)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" Beneficiário "), "beneficiario");
        assert_eq!(normalize("TOTAL DO MÊS"), "total do mes");
        assert_eq!(normalize("Espécie"), "especie");
    }

    #[test]
    fn test_normalize_for_search() {
        assert_eq!(normalize_for_search("Total\u{a0}Geral\n"), "total geral");
    }

    #[test]
    fn test_digits() {
        assert_eq!(digits("12.345.678/0001-90"), "12345678000190");
        assert_eq!(digits("abc"), "");
    }

    #[test]
    fn test_strip_prefix_ignore_case() {
        assert_eq!(strip_prefix_ignore_case("OBJETO: compra", "objeto:"), Some(" compra"));
        assert_eq!(strip_prefix_ignore_case("obj", "objeto:"), None);
        assert_eq!(strip_prefix_ignore_case("Compra objeto:", "objeto:"), None);
    }
}
