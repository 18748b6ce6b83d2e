//! Date detection and conversion
//!
//! Spreadsheet day numbers count from the 1899-12-30 epoch. Text dates come
//! either as ISO `YYYY-MM-DD` or in the local `DD/MM/YYYY` form.

use crate::types::Cell;
use chrono::{Duration, NaiveDate};

/// Day zero of spreadsheet serial dates
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default()
}

/// Convert a serial day number; the fractional (time) part is dropped
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial.abs() > 3_000_000.0 {
        return None;
    }
    epoch().checked_add_signed(Duration::days(serial.floor() as i64))
}

fn is_digits(s: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse `YYYY-MM-DD`
pub fn parse_iso(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split('-');
    let (y, m, d) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || !is_digits(y, 4, 4) || !is_digits(m, 2, 2) || !is_digits(d, 2, 2) {
        return None;
    }
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

/// Parse `D/M/YYYY` or `D/M/YY` (two-digit years land in 2000–2068 / 1969–1999,
/// the usual pivot)
pub fn parse_local(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split('/');
    let (d, m, y) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || !is_digits(d, 1, 2) || !is_digits(m, 1, 2) {
        return None;
    }
    let year: i32 = if is_digits(y, 4, 4) {
        y.parse().ok()?
    } else if is_digits(y, 2, 2) {
        let short: i32 = y.parse().ok()?;
        if short < 69 {
            2000 + short
        } else {
            1900 + short
        }
    } else {
        return None;
    };
    NaiveDate::from_ymd_opt(year, m.parse().ok()?, d.parse().ok()?)
}

/// Recognize a date in any supported shape
pub fn detect_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Date(d) => Some(*d),
        Cell::Number(n) => serial_to_date(*n),
        Cell::Text(s) => {
            let s = s.trim();
            parse_iso(s).or_else(|| parse_local(s))
        }
        _ => None,
    }
}

/// Render a date-like cell as `DD/MM/YYYY` text; other values pass through
///
/// Local-form text that validates is kept exactly as written.
pub fn to_local_text(cell: &Cell) -> Cell {
    match cell {
        Cell::Text(s) if parse_iso(s.trim()).is_none() => {
            // Already local (or not a date at all): unchanged
            cell.clone()
        }
        other => match detect_date(other) {
            Some(d) => Cell::Text(d.format("%d/%m/%Y").to_string()),
            None => other.clone(),
        },
    }
}

/// Turn a date-like cell into a true date value; other values pass through
pub fn to_date(cell: &Cell) -> Cell {
    match detect_date(cell) {
        Some(d) => Cell::Date(d),
        None => cell.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_serial_to_date() {
        assert_eq!(serial_to_date(45292.0), Some(ymd(2024, 1, 1)));
        assert_eq!(serial_to_date(45292.75), Some(ymd(2024, 1, 1)));
        assert_eq!(serial_to_date(1.0), Some(ymd(1899, 12, 31)));
        assert_eq!(serial_to_date(f64::NAN), None);
        assert_eq!(serial_to_date(1e12), None);
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(parse_iso("2024-03-05"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_iso("2024-3-5"), None);
        assert_eq!(parse_iso("2024-02-30"), None);
        assert_eq!(parse_local("5/3/2024"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_local("05/03/24"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_local("31/02/2024"), None);
        assert_eq!(parse_local("05-03-2024"), None);
    }

    #[test]
    fn test_to_local_text() {
        assert_eq!(
            to_local_text(&Cell::Number(45292.0)),
            Cell::Text("01/01/2024".to_string())
        );
        assert_eq!(
            to_local_text(&Cell::text("2024-01-31")),
            Cell::Text("31/01/2024".to_string())
        );
        assert_eq!(to_local_text(&Cell::text("1/2/2024")), Cell::text("1/2/2024"));
        assert_eq!(to_local_text(&Cell::text("Objeto")), Cell::text("Objeto"));
        assert_eq!(to_local_text(&Cell::Empty), Cell::Empty);
    }

    #[test]
    fn test_to_date() {
        assert_eq!(to_date(&Cell::text("01/02/2024")), Cell::Date(ymd(2024, 2, 1)));
        assert_eq!(to_date(&Cell::Number(45292.0)), Cell::Date(ymd(2024, 1, 1)));
        assert_eq!(to_date(&Cell::text("sem data")), Cell::text("sem data"));
        assert_eq!(to_date(&Cell::Bool(true)), Cell::Bool(true));
    }
}
