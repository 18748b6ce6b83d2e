//! Column letter ↔ index conversion
//!
//! One bijection, shared by the container reader (cell coordinates such as
//! `AB12`) and by pipeline stages (column letters such as `"M"`).

/// Convert column letters to a 1-based column number (`A` → 1, `AA` → 27)
///
/// Returns `None` for an empty string or any character outside `A..=Z`
/// (lowercase is accepted and folded).
pub fn letters_to_number(letters: &str) -> Option<usize> {
    let letters = letters.trim();
    if letters.is_empty() {
        return None;
    }

    let mut n: usize = 0;
    for ch in letters.chars() {
        let ch = ch.to_ascii_uppercase();
        if !ch.is_ascii_uppercase() {
            return None;
        }
        n = n.checked_mul(26)?.checked_add((ch as u8 - b'A' + 1) as usize)?;
    }
    Some(n)
}

/// Convert a 1-based column number to letters (`1` → `A`, `27` → `AA`)
pub fn number_to_letters(number: usize) -> Option<String> {
    if number == 0 {
        return None;
    }
    Some(column_letters(number - 1))
}

/// 0-based column index for letters (`A` → 0)
pub fn column_index(letters: &str) -> Option<usize> {
    letters_to_number(letters).map(|n| n - 1)
}

/// Letters for a 0-based column index
///
/// Examples:
/// - 0 → A
/// - 25 → Z
/// - 26 → AA
/// - 701 → ZZ
pub fn column_letters(index: usize) -> String {
    let mut result = String::new();
    let mut idx = index;

    loop {
        let remainder = idx % 26;
        result.insert(0, (b'A' + remainder as u8) as char);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }

    result
}

/// Split a cell coordinate like `AB12` into (1-based row, 1-based column)
///
/// Mirrors the fixed `^([A-Z]+)(\d+)$` pattern; anything else is rejected.
pub fn parse_coordinate(coord: &str) -> Option<(usize, usize)> {
    let split = coord.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = coord.split_at(split);
    if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let row: usize = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row, letters_to_number(letters)?))
}
