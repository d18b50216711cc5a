/// Render a window of `source` around the 1-based `line`.
///
/// Shows up to `before` lines ahead of the error line and `after` lines
/// following it, strips the smallest indentation shared by the non-blank
/// lines of the window, and marks the error line with `>`. Returns `None`
/// when `line` is outside the source.
pub fn render_source_excerpt(source: &str, line: u32, before: u32, after: u32) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line as usize > lines.len() {
        return None;
    }

    let first = line.saturating_sub(before).max(1);
    let last = line.saturating_add(after).min(lines.len() as u32);
    let window = &lines[first as usize - 1..last as usize];

    let indent = window
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let width = last.to_string().len();

    let mut out = String::new();
    for (number, text) in (first..=last).zip(window) {
        let marker = if number == line { '>' } else { ' ' };
        let text = text.get(indent..).unwrap_or_else(|| text.trim_start());
        let rendered = format!("{} {:>width$} | {}", marker, number, text);
        out.push_str(rendered.trim_end());
        out.push('\n');
    }
    Some(out)
}
