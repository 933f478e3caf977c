//! Ingestion of the collected object dataset.
//!
//! The dataset is one big CSV with a row per drawn object across all
//! samples; rows are filtered down to the requested sample here. Quoting
//! follows the usual CSV rules (double quotes, doubled to escape, newlines
//! allowed inside quoted fields), which the inline text column needs.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use extent_alloc::{ObjKind, ObjRecord};
use log::debug;

/// Columns the simulation consumes; any other column is ignored.
const SAMPLE: &str = "sample";
const TYPE: &str = "type";
const CHAR_LENGTH: &str = "char_length";
const WIDTHS_CNT: &str = "widths_cnt";
const COORDS_CNT: &str = "coords_cnt";
const TEXT: &str = "text";
const PAGE: &str = "page";

pub fn load_records(path: &Path, sample: &str) -> Result<Vec<ObjRecord>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading dataset {}", path.display()))?;
    parse_records(&raw, sample)
}

fn parse_records(raw: &str, sample: &str) -> Result<Vec<ObjRecord>> {
    let mut rows = parse_csv(raw).into_iter();
    let header = match rows.next() {
        Some(header) => header,
        None => bail!("dataset has no header row"),
    };

    let col = |name: &str| -> Result<usize> {
        header
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("dataset is missing the `{}` column", name))
    };
    let sample_col = col(SAMPLE)?;
    let type_col = col(TYPE)?;
    let char_length_col = col(CHAR_LENGTH)?;
    let widths_col = col(WIDTHS_CNT)?;
    let coords_col = col(COORDS_CNT)?;
    let text_col = col(TEXT)?;
    let page_col = col(PAGE)?;

    let mut records = Vec::new();
    for (line_no, row) in rows.enumerate() {
        if row.iter().all(|field| field.is_empty()) {
            continue;
        }
        if row.get(sample_col).map(String::as_str) != Some(sample) {
            continue;
        }

        let kind = row.get(type_col).and_then(|code| ObjKind::from_code(code));
        let char_length = row.get(char_length_col).and_then(|f| parse_int(f));
        let widths_cnt = row.get(widths_col).and_then(|f| parse_int(f));
        let coords_cnt = row.get(coords_col).and_then(|f| parse_int(f));
        let page_no = row.get(page_col).and_then(|f| parse_int(f));

        match (kind, char_length, widths_cnt, coords_cnt, page_no) {
            (Some(kind), Some(char_length), Some(widths_cnt), Some(coords_cnt), Some(page_no)) => {
                records.push(ObjRecord {
                    kind,
                    char_length,
                    widths_cnt,
                    coords_cnt,
                    inline_text: row.get(text_col).cloned().unwrap_or_default(),
                    page_no: page_no.max(0) as u32,
                });
            }
            _ => {
                // Malformed rows are dropped, same as rows that derive a
                // non-positive object size later on.
                debug!("dropping malformed dataset row {}", line_no + 2);
            }
        }
    }

    Ok(records)
}

/// Integers in the dataset sometimes carry a float rendering (`3.0`).
fn parse_int(field: &str) -> Option<i64> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    field
        .parse::<i64>()
        .ok()
        .or_else(|| field.parse::<f64>().ok().map(|f| f as i64))
}

/// Minimal quote-aware CSV reader: commas split fields, double quotes wrap
/// a field, `""` escapes a quote, newlines are row separators only outside
/// quotes.
fn parse_csv(raw: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}
