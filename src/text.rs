//! Text normalization helpers shared by the parser, the payload builder and
//! the renderer.
//!
//! Whitespace handling follows Unicode's definition (`char::is_whitespace`):
//! every run of whitespace collapses to one ASCII space and the ends are
//! trimmed.
//!
//! ```rust
//! use monthly_report::text::{collapse_whitespace, strip_tags};
//!
//! assert_eq!(collapse_whitespace("  hello \t  world \n"), "hello world");
//! assert_eq!(strip_tags("<b>hola</b> mundo"), "hola mundo");
//! ```

/// Collapses repeated whitespace, trims edges, and turns newlines into single
/// spaces. Returns an empty string for whitespace-only input.
pub fn collapse_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    for segment in text.split_whitespace() {
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        normalized.push_str(segment);
    }
    normalized
}

/// Removes every `<...>` sequence. Tags may span lines.
///
/// An unterminated `<` is kept verbatim together with the rest of the text,
/// so `"a < b"` survives unchanged.
pub fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        match rest[open + 1..].find('>') {
            Some(close) => {
                out.push_str(&rest[..open]);
                rest = &rest[open + 1 + close + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// `strip_tags` followed by `collapse_whitespace`.
pub fn clean_inline(text: &str) -> String {
    collapse_whitespace(&strip_tags(text))
}

/// Splits on `\n`, `\r\n`, `\r` and the Unicode line/paragraph separators.
/// Empty segments are yielded; callers filter them after normalization.
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\n', '\r', '\u{2028}', '\u{2029}'])
}
