//! Native `.xlsx` reader: zip container + streaming XML
//!
//! Only the first worksheet is read. Values come back typed (text, number,
//! boolean); styles, formulas and merged ranges are ignored.

use crate::error::{LedgerError, LedgerResult};
use crate::matrix::columns::parse_coordinate;
use crate::matrix::Matrix;
use crate::types::Cell;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek};
use std::path::Path;
use tracing::{debug, info};
use zip::result::ZipError;
use zip::ZipArchive;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const FALLBACK_SHEET_PART: &str = "xl/worksheets/sheet1.xml";

/// Read the first worksheet of the workbook at `path`
pub fn read_first_sheet(path: &Path) -> LedgerResult<Matrix> {
    let file = File::open(path)?;
    let matrix = read_first_sheet_from(BufReader::new(file))?;
    info!(
        path = %path.display(),
        rows = matrix.len(),
        columns = matrix.width(),
        "read worksheet"
    );
    Ok(matrix)
}

/// Read the first worksheet from any seekable container
pub fn read_first_sheet_from<R: Read + Seek>(reader: R) -> LedgerResult<Matrix> {
    let mut archive = ZipArchive::new(reader)?;
    let sheet_part = first_sheet_part(&mut archive)?;
    debug!(part = %sheet_part, "first worksheet part");

    let shared = match archive.by_name(SHARED_STRINGS_PART) {
        Ok(entry) => parse_shared_strings(BufReader::new(entry))?,
        Err(ZipError::FileNotFound) => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let entry = archive.by_name(&sheet_part).map_err(|e| match e {
        ZipError::FileNotFound => {
            LedgerError::Container(format!("worksheet part {} not found", sheet_part))
        }
        other => other.into(),
    })?;
    parse_worksheet(BufReader::new(entry), &shared)
}

//==============================================================================
// Workbook structure
//==============================================================================

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> LedgerResult<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            Ok(Some(bytes))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Resolve the part holding the first `<sheet>` of the workbook, or fall
/// back to `sheet1.xml` when the workbook or its relationships don't say
fn first_sheet_part<R: Read + Seek>(archive: &mut ZipArchive<R>) -> LedgerResult<String> {
    let resolved = match (
        read_part(archive, WORKBOOK_PART)?,
        read_part(archive, WORKBOOK_RELS_PART)?,
    ) {
        (Some(workbook), Some(rels)) => first_sheet_rel_id(&workbook)?
            .and_then(|id| parse_relationships(&rels).ok()?.remove(&id))
            .map(|target| resolve_target(&target)),
        _ => None,
    };

    match resolved {
        Some(part) if archive.file_names().any(|n| n == part) => Ok(part),
        _ => Ok(FALLBACK_SHEET_PART.to_string()),
    }
}

/// Relationship targets are relative to `xl/` unless absolute
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn attribute(e: &BytesStart<'_>, local: &[u8]) -> LedgerResult<Option<String>> {
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == local {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn first_sheet_rel_id(workbook: &[u8]) -> LedgerResult<Option<String>> {
    let mut reader = XmlReader::from_reader(workbook);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                return attribute(&e, b"id");
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

fn parse_relationships(rels: &[u8]) -> LedgerResult<HashMap<String, String>> {
    let mut reader = XmlReader::from_reader(rels);
    let mut buf = Vec::new();
    let mut map = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) =
                    (attribute(&e, b"Id")?, attribute(&e, b"Target")?)
                {
                    map.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(map)
}

//==============================================================================
// Shared strings
//==============================================================================

/// Each `<si>` becomes one string: its `<t>` fragments joined, phonetic
/// `<rPh>` runs left out
pub fn parse_shared_strings<B: BufRead>(source: B) -> LedgerResult<Vec<String>> {
    let mut reader = XmlReader::from_reader(source);
    reader.config_mut().trim_text(false);

    let mut strings = Vec::new();
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => phonetic_depth += 1,
                b"t" => in_text = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text && phonetic_depth == 0 => {
                current.push_str(&t.unescape()?);
            }
            Event::CData(t) if in_text && phonetic_depth == 0 => {
                current.push_str(&String::from_utf8_lossy(&t));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    debug!(count = strings.len(), "shared strings");
    Ok(strings)
}

//==============================================================================
// Worksheet
//==============================================================================

/// A `<c>` element while its children are being read
#[derive(Default)]
struct PendingCell {
    coord: Option<(usize, usize)>,
    kind: String,
    raw: Option<String>,
}

/// Stream `<sheetData>` into a sparse map, then densify
pub fn parse_worksheet<B: BufRead>(source: B, shared: &[String]) -> LedgerResult<Matrix> {
    let mut reader = XmlReader::from_reader(source);
    reader.config_mut().trim_text(false);

    let mut cells: HashMap<(usize, usize), Cell> = HashMap::new();
    let mut max_row = 0usize;
    let mut max_col = 0usize;
    let mut skipped = 0usize;

    let mut buf = Vec::new();
    let mut pending: Option<PendingCell> = None;
    let mut in_value = false;
    let mut in_inline = false;
    let mut in_inline_text = false;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"c" => {
                    let coord = attribute(&e, b"r")?.and_then(|r| parse_coordinate(&r));
                    let kind = attribute(&e, b"t")?.unwrap_or_default();
                    pending = Some(PendingCell {
                        coord,
                        kind,
                        raw: None,
                    });
                }
                b"v" => in_value = true,
                b"is" => in_inline = true,
                b"t" if in_inline => in_inline_text = true,
                b"rPh" => phonetic_depth += 1,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"c" => {
                    if let Some(cell) = pending.take() {
                        match finish_cell(cell, shared) {
                            Some(((row, col), value)) => {
                                max_row = max_row.max(row + 1);
                                max_col = max_col.max(col + 1);
                                cells.insert((row, col), value);
                            }
                            None => skipped += 1,
                        }
                    }
                }
                b"v" => in_value = false,
                b"is" => in_inline = false,
                b"t" => in_inline_text = false,
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                _ => {}
            },
            Event::Text(t) if in_value || (in_inline_text && phonetic_depth == 0) => {
                if let Some(cell) = pending.as_mut() {
                    cell.raw
                        .get_or_insert_with(String::new)
                        .push_str(&t.unescape()?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if skipped > 0 {
        debug!(skipped, "cells without coordinate or value");
    }

    let mut rows = vec![vec![Cell::Empty; max_col]; max_row];
    for ((row, col), value) in cells {
        rows[row][col] = value;
    }
    Ok(Matrix::from_rows(rows))
}

/// Zero-based position and typed value, or `None` when the cell is skipped
fn finish_cell(cell: PendingCell, shared: &[String]) -> Option<((usize, usize), Cell)> {
    let (row, col) = cell.coord?;
    let raw = cell.raw?;
    let value = match cell.kind.as_str() {
        "s" => match raw.trim().parse::<usize>().ok().and_then(|i| shared.get(i)) {
            Some(s) => Cell::text(s.as_str()),
            None => Cell::text(raw),
        },
        "b" => match raw.trim() {
            "1" | "true" | "TRUE" => Cell::Bool(true),
            "0" | "false" | "FALSE" => Cell::Bool(false),
            _ => Cell::text(raw),
        },
        "inlineStr" | "str" | "e" | "d" => Cell::text(raw),
        _ => numeric_or_text(raw),
    };
    if !value.is_present() {
        return None;
    }
    Some(((row - 1, col - 1), value))
}

/// Integer first, then float, else the text as-is
fn numeric_or_text(raw: String) -> Cell {
    let trimmed = raw.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Cell::Number(i as f64);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => Cell::Number(f),
        _ => Cell::text(raw),
    }
}
