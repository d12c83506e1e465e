//! Narrative-to-structure parsing.
//!
//! Turns markdown-lite narrative text into an ordered list of
//! [`ReportBlock`]s. Only three constructs are recognized:
//!
//! - `#`, `##`, `###` headings (longer runs clamp to level 3)
//! - bullet lines starting with `-`, `*` or a bullet glyph
//! - everything else is a paragraph, one per input line
//!
//! Parsing never fails: empty input yields a single placeholder paragraph.
//!
//! ```rust
//! use monthly_report::blocks::{parse_blocks, ReportBlock, HeadingLevel};
//!
//! let blocks = parse_blocks("# Title\n\nBody text.\n- a\n- b");
//! assert_eq!(blocks[0], ReportBlock::Heading { text: "Title".into(), level: HeadingLevel::H1 });
//! assert_eq!(blocks[1], ReportBlock::Paragraph { text: "Body text.".into() });
//! assert_eq!(blocks[2], ReportBlock::BulletGroup { items: vec!["a".into(), "b".into()] });
//! ```

use serde::{Deserialize, Serialize};

use crate::text::{clean_inline, collapse_whitespace, split_lines, strip_tags};

/// Placeholder paragraph emitted for empty narrative input.
pub const EMPTY_NARRATIVE_PLACEHOLDER: &str = "No content available.";

const BULLET_MARKERS: [char; 6] = ['-', '*', '\u{2022}', '\u{25E6}', '\u{25AA}', '\u{2023}'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeadingLevel {
    H1,
    H2,
    H3,
}

impl HeadingLevel {
    /// Maps a run of `#` characters to a level: 1 → H1, 2 → H2, 3+ → H3.
    pub fn from_marker_len(len: usize) -> Self {
        match len {
            0 | 1 => HeadingLevel::H1,
            2 => HeadingLevel::H2,
            _ => HeadingLevel::H3,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            HeadingLevel::H1 => 1,
            HeadingLevel::H2 => 2,
            HeadingLevel::H3 => 3,
        }
    }
}

/// A typed unit of parsed narrative content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportBlock {
    Heading { text: String, level: HeadingLevel },
    Paragraph { text: String },
    BulletGroup { items: Vec<String> },
}

impl ReportBlock {
    /// All text carried by the block, bullet items joined by spaces.
    pub fn plain_text(&self) -> String {
        match self {
            ReportBlock::Heading { text, .. } | ReportBlock::Paragraph { text } => text.clone(),
            ReportBlock::BulletGroup { items } => items.join(" "),
        }
    }
}

enum LineKind {
    Heading(HeadingLevel, String),
    Bullet(String),
    Paragraph(String),
    Skip,
}

fn classify(line: &str) -> LineKind {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes > 0 {
        let rest = &line[hashes..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            let text = clean_inline(rest);
            if text.is_empty() {
                return LineKind::Skip;
            }
            return LineKind::Heading(HeadingLevel::from_marker_len(hashes), text);
        }
    }

    let mut chars = line.chars();
    if let Some(first) = chars.next() {
        if BULLET_MARKERS.contains(&first) {
            let rest = chars.as_str();
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                let text = clean_inline(rest);
                if text.is_empty() {
                    return LineKind::Skip;
                }
                return LineKind::Bullet(text);
            }
        }
    }

    LineKind::Paragraph(line.to_string())
}

/// Parses narrative text into blocks, preserving source order.
pub fn parse_blocks(raw: &str) -> Vec<ReportBlock> {
    parse_blocks_with_placeholder(raw, EMPTY_NARRATIVE_PLACEHOLDER)
}

/// [`parse_blocks`] with a caller-chosen paragraph for empty input.
pub fn parse_blocks_with_placeholder(raw: &str, placeholder: &str) -> Vec<ReportBlock> {
    let stripped = strip_tags(raw);
    let whole = collapse_whitespace(&stripped);
    if whole.is_empty() {
        return vec![ReportBlock::Paragraph {
            text: placeholder.to_string(),
        }];
    }

    let mut blocks = Vec::new();
    let mut bullets: Vec<String> = Vec::new();

    for line in split_lines(&stripped) {
        let line = collapse_whitespace(line);
        if line.is_empty() {
            continue;
        }
        match classify(&line) {
            LineKind::Heading(level, text) => {
                flush_bullets(&mut bullets, &mut blocks);
                blocks.push(ReportBlock::Heading { text, level });
            }
            LineKind::Bullet(text) => bullets.push(text),
            LineKind::Paragraph(text) => {
                flush_bullets(&mut bullets, &mut blocks);
                blocks.push(ReportBlock::Paragraph { text });
            }
            LineKind::Skip => {}
        }
    }
    flush_bullets(&mut bullets, &mut blocks);

    if blocks.is_empty() {
        blocks.push(ReportBlock::Paragraph { text: whole });
    }
    blocks
}

fn flush_bullets(bullets: &mut Vec<String>, blocks: &mut Vec<ReportBlock>) {
    if !bullets.is_empty() {
        blocks.push(ReportBlock::BulletGroup {
            items: std::mem::take(bullets),
        });
    }
}

/// Picks the document title: explicit title, else the first H1 heading, else
/// `default`. The result is always whitespace-normalized.
pub fn resolve_title(explicit: Option<&str>, blocks: &[ReportBlock], default: &str) -> String {
    if let Some(title) = explicit.map(collapse_whitespace).filter(|t| !t.is_empty()) {
        return title;
    }
    blocks
        .iter()
        .find_map(|block| match block {
            ReportBlock::Heading {
                text,
                level: HeadingLevel::H1,
            } => Some(collapse_whitespace(text)),
            _ => None,
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| collapse_whitespace(default))
}
