//! Marks the word under the playback cursor.

use serde::Serialize;

/// The text split into the parts before, at and after the cursor word.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Highlight {
    pub before: String,
    pub word: String,
    pub after: String,
}

impl Highlight {
    pub fn is_empty(&self) -> bool {
        self.word.is_empty()
    }
}

/// Find the whitespace-delimited word covering `offset` (a char index).
///
/// The offset is clamped to the text length. An offset on whitespace moves
/// forward to the next word; when only whitespace follows, the span stays
/// at the clamped offset and may be empty. Concatenating the three parts
/// always yields `text`.
pub fn highlight_word(text: &str, offset: usize) -> Highlight {
    let chars: Vec<char> = text.chars().collect();
    let (start, end) = word_span(&chars, offset);
    Highlight {
        before: chars[..start].iter().collect(),
        word: chars[start..end].iter().collect(),
        after: chars[end..].iter().collect(),
    }
}

/// Char range `[start, end)` of the word at `offset`; empty when the offset
/// sits in trailing whitespace or at the end of a word-less tail.
pub fn word_span(chars: &[char], offset: usize) -> (usize, usize) {
    let mut idx = offset.min(chars.len());
    if chars.get(idx).is_some_and(|ch| ch.is_whitespace()) {
        if let Some(step) = chars[idx..].iter().position(|ch| !ch.is_whitespace()) {
            idx += step;
        }
    }
    let start = chars[..idx]
        .iter()
        .rposition(|ch| ch.is_whitespace())
        .map_or(0, |pos| pos + 1);
    let end = chars[idx..]
        .iter()
        .position(|ch| ch.is_whitespace())
        .map_or(chars.len(), |pos| idx + pos);
    (start, end)
}
