use regex::Regex;
use std::sync::LazyLock;

use crate::position::LineMap;

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--\s*(\d+)\s*$").expect("line comment pattern is valid"));

/// Build a generated line -> original line map from the `-- <N>` comments
/// YueScript appends to generated lines. Lines without one are gaps.
pub fn lines_from_comments(code: &str) -> LineMap {
    code.lines()
        .enumerate()
        .filter_map(|(index, text)| {
            let caps = LINE_COMMENT.captures(text)?;
            let original = caps[1].parse::<u32>().ok().filter(|&n| n > 0)?;
            Some((index as u32 + 1, original))
        })
        .collect()
}
