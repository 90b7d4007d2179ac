//! Line reconstruction from positioned text fragments.
//!
//! Document backends hand over glyph runs with baseline origins, in whatever
//! order the content stream drew them. Runs sharing a baseline (within a
//! tolerance) are joined into one line, and lines are then put into reading
//! order by vertical position. Page origin is bottom-left, so larger `y`
//! means higher on the page.

use crate::normalizer::{clean_line, is_word_char};
use serde::{Deserialize, Serialize};

/// Baseline difference (layout units) still treated as the same line.
pub const DEFAULT_SAME_LINE_TOLERANCE: f32 = 2.0;

/// One atomic run of characters with its baseline origin on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub content: String,
    pub origin_x: f32,
    pub origin_y: f32,
    /// Forces a line break before this fragment is appended.
    pub ends_line: bool,
}

impl TextFragment {
    pub fn new(content: impl Into<String>, origin_x: f32, origin_y: f32) -> Self {
        Self {
            content: content.into(),
            origin_x,
            origin_y,
            ends_line: false,
        }
    }

    pub fn ending_line(mut self) -> Self {
        self.ends_line = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub vertical_position: f32,
    pub text: String,
}

/// Group one page's fragments into cleaned lines in top-to-bottom order.
pub fn reconstruct_lines(fragments: &[TextFragment], tolerance: f32) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut anchor: Option<f32> = None;
    let mut buffer = String::new();

    for fragment in fragments {
        if fragment.content.is_empty() {
            continue;
        }
        let y = fragment.origin_y;
        let anchor_y = *anchor.get_or_insert(y);
        if (y - anchor_y).abs() > tolerance || fragment.ends_line {
            flush_line(&mut lines, &mut buffer, anchor_y);
            anchor = Some(y);
        }
        if needs_space(&buffer, &fragment.content) {
            buffer.push(' ');
        }
        buffer.push_str(&fragment.content);
    }
    flush_line(&mut lines, &mut buffer, anchor.unwrap_or(0.0));

    // Stable sort: lines with equal baselines keep their drawing order.
    lines.sort_by(|a, b| b.vertical_position.total_cmp(&a.vertical_position));
    lines
}

fn flush_line(lines: &mut Vec<Line>, buffer: &mut String, vertical_position: f32) {
    if !buffer.trim().is_empty() {
        let text = clean_line(buffer);
        // A line made only of leader dots cleans down to nothing.
        if !text.is_empty() {
            lines.push(Line {
                vertical_position,
                text,
            });
        }
    }
    buffer.clear();
}

/// Runs split mid-phrase lose their separating space; restore it between two
/// word characters but never next to punctuation.
fn needs_space(buffer: &str, next: &str) -> bool {
    match (buffer.chars().next_back(), next.chars().next()) {
        (Some(prev), Some(first)) => is_word_char(prev) && is_word_char(first),
        _ => false,
    }
}
