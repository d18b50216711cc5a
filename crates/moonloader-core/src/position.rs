//! Conversions between byte offsets and 1-based line/column pairs, and
//! nearest-line resolution over sparse line tables.

use std::collections::BTreeMap;

/// Generated Lua line -> original source line.
pub type LineMap = BTreeMap<u32, u32>;

/// Convert a 0-based byte offset into a 1-based `(line, column)` pair.
///
/// The offset is clamped into `[0, text.len()]`; an offset equal to the
/// length denotes end-of-file. Columns count bytes from the last newline
/// at or before the offset.
pub fn offset_to_line_col(text: &str, offset: usize) -> (u32, u32) {
    let bytes = text.as_bytes();
    let end = offset.min(bytes.len());

    let mut line = 1u32;
    let mut line_start = 0usize;
    for (i, &b) in bytes[..end].iter().enumerate() {
        if b == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }

    (line, (end - line_start + 1) as u32)
}

/// Inverse of [`offset_to_line_col`]. Lines past the end resolve to
/// end-of-file, columns are clamped to the end of their line.
pub fn line_col_to_offset(text: &str, line: u32, column: u32) -> usize {
    let bytes = text.as_bytes();
    let mut current = 1u32;
    let mut line_start = 0usize;

    if line > 1 {
        let mut found = false;
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'\n' {
                current += 1;
                if current == line {
                    line_start = i + 1;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            return bytes.len();
        }
    }

    let line_end = bytes[line_start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| line_start + p)
        .unwrap_or(bytes.len());

    (line_start + column.saturating_sub(1) as usize).min(line_end)
}

/// Number of lines in `text`, counting a trailing partial line.
pub fn line_count(text: &str) -> u32 {
    text.bytes().filter(|&b| b == b'\n').count() as u32 + 1
}

/// Mapped value of the greatest key `<= query`, or `None` when the query
/// precedes every mapping.
pub fn nearest_line_at_or_before(line_map: &LineMap, query: u32) -> Option<u32> {
    line_map.range(..=query).next_back().map(|(_, &line)| line)
}
