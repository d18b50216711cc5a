use crate::position::{offset_to_line_col, LineMap};

/// Convert a MoonScript position table (generated line -> byte offset into
/// the original source) into a generated line -> original line map.
pub fn lines_from_offsets(posmap: &[(u32, usize)], source: &str) -> LineMap {
    posmap
        .iter()
        .map(|&(generated, offset)| (generated, offset_to_line_col(source, offset).0))
        .collect()
}
