//! Greedy word wrapping against font metrics.

use super::font::FontMetrics;

/// Packs words into lines no wider than `max_width`.
///
/// For each word the candidate `line + " " + word` is accepted when it fits;
/// otherwise the current line is committed and the word starts a new one. A
/// single word wider than `max_width` occupies its own line unbroken. Empty
/// input yields exactly one empty line, so callers always advance by at least
/// one line height.
pub fn wrap_text(text: &str, font: &dyn FontMetrics, size: f64, max_width: f64) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{line} {word}")
        };
        if font.text_width(&candidate, size) <= max_width {
            line = candidate;
        } else {
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            line = word.to_string();
        }
    }

    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}
