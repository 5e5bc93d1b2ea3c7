//! Helpers for pulling values out of CLI output.
//!
//! Device output is line oriented. These helpers cover the shapes the
//! drivers need: `key: value` listings, a row picked by regex, and tables
//! with a known header, either whitespace separated or fixed width.

use indexmap::IndexMap;
use regex::Regex;

/// One parsed table row, keyed by header column.
pub type TableRow = IndexMap<String, String>;

/// Value of the first `key<delimiter>value` line whose trimmed key equals `key`.
///
/// ```
/// use netcommand::parsers::vertical_value;
///
/// let output = "uptime: 1d2h\nversion: 7.10.2 (stable)\n";
/// assert_eq!(vertical_value(output, "version", ':'), Some("7.10.2 (stable)"));
/// ```
pub fn vertical_value<'a>(data: &'a str, key: &str, delimiter: char) -> Option<&'a str> {
    data.lines().find_map(|row| {
        let (name, value) = row.split_once(delimiter)?;
        (name.trim() == key).then(|| value.trim())
    })
}

/// First capture group of the first line matching `pattern`.
pub fn regex_value<'a>(data: &'a str, pattern: &Regex) -> Option<&'a str> {
    data.lines().find_map(|row| {
        pattern
            .captures(row)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
    })
}

/// First line containing `text`.
pub fn match_text<'a>(data: &'a str, text: &str) -> Option<&'a str> {
    data.lines().find(|row| row.contains(text))
}

/// Rows of a whitespace separated table.
///
/// The header line is the first line whose leading whitespace-split
/// columns equal `header`; columns past the header are ignored.
/// `skip_after_header` lines after it (usually a dashed rule) are ignored,
/// as are blank lines. Rows with fewer fields than the header yield only
/// the columns present.
pub fn tabular(data: &str, header: &[&str], skip_after_header: usize) -> Vec<TableRow> {
    let mut lines = data.lines();
    let found = lines.by_ref().any(|row| {
        row.split_whitespace()
            .take(header.len())
            .eq(header.iter().copied())
    });
    if !found {
        return Vec::new();
    }

    lines
        .skip(skip_after_header)
        .filter(|row| !row.trim().is_empty())
        .map(|row| {
            header
                .iter()
                .zip(row.split_whitespace())
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect()
        })
        .collect()
}

/// Rows of a fixed-width table whose column boundaries are given by the
/// positions of the header names.
///
/// Header names may contain spaces (`SW Version`), so they are located by
/// substring search in order. The line following the header is treated as
/// a rule and skipped when it consists of dashes and spaces only.
pub fn fixed_width_tabular(data: &str, header: &[&str]) -> Vec<TableRow> {
    let mut lines = data.lines().peekable();
    let mut starts = None;

    for row in lines.by_ref() {
        if let Some(positions) = column_starts(row, header) {
            starts = Some(positions);
            break;
        }
    }
    let Some(starts) = starts else {
        return Vec::new();
    };

    if lines
        .peek()
        .is_some_and(|row| !row.trim().is_empty() && row.trim().chars().all(|c| c == '-' || c == ' '))
    {
        lines.next();
    }

    let mut rows = Vec::new();
    for row in lines {
        if row.trim().is_empty() {
            // The table ends at the first blank line.
            if !rows.is_empty() {
                break;
            }
            continue;
        }

        let record: TableRow = header
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let start = starts[i];
                let end = starts.get(i + 1).copied();
                (name.to_string(), slice_column(row, start, end).to_string())
            })
            .collect();
        rows.push(record);
    }
    rows
}

/// Byte offset of each header name in `row`, or `None` if any is missing.
fn column_starts(row: &str, header: &[&str]) -> Option<Vec<usize>> {
    let mut positions = Vec::with_capacity(header.len());
    let mut from = 0;
    for name in header {
        let offset = row.get(from..)?.find(name)?;
        positions.push(from + offset);
        from += offset + name.len();
    }
    Some(positions)
}

fn slice_column(row: &str, start: usize, end: Option<usize>) -> &str {
    let len = row.len();
    let start = start.min(len);
    let end = end.unwrap_or(len).min(len);
    match row.get(start..end) {
        Some(cell) => cell.trim(),
        // Column boundary fell inside a multi-byte character
        None => "",
    }
}
