//! Splits document text into bounded chunks for a speech backend.
//!
//! Offsets and lengths are counted in `char`s, the same unit the playback
//! cursor uses.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1600;
pub const DEFAULT_MIN_BREAK_OFFSET: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingOptions {
    pub max_chunk_chars: usize,
    /// A sentence or word break is only taken this far past the chunk start.
    pub min_break_offset: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            min_break_offset: DEFAULT_MIN_BREAK_OFFSET,
        }
    }
}

/// A contiguous slice of the document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechChunk {
    pub text: String,
    pub start_offset: usize,
}

impl SpeechChunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Partition `text` into chunks of at most `max_chunk_chars` characters.
///
/// Each cut prefers the last `.` in the window, then the last space, as long
/// as it lies beyond `min_break_offset`; otherwise the window is cut where it
/// ends, mid-word if need be. Concatenating the chunks yields `text`.
pub fn split_into_chunks(text: &str, options: &ChunkingOptions) -> Vec<SpeechChunk> {
    if text.is_empty() {
        return Vec::new();
    }
    let max = options.max_chunk_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max {
        return vec![SpeechChunk {
            text: text.to_string(),
            start_offset: 0,
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let naive_end = (start + max).min(chars.len());
        let end = find_break(&chars, start, naive_end, options.min_break_offset)
            .unwrap_or(naive_end);
        chunks.push(SpeechChunk {
            text: chars[start..end].iter().collect(),
            start_offset: start,
        });
        start = end;
    }
    tracing::debug!(
        chunks = chunks.len(),
        chars = chars.len(),
        max,
        "Segmented text for speech"
    );
    chunks
}

fn find_break(chars: &[char], start: usize, naive_end: usize, min_offset: usize) -> Option<usize> {
    let earliest = start.saturating_add(min_offset).saturating_add(1);
    if earliest >= naive_end {
        return None;
    }
    let window = &chars[earliest..naive_end];
    window
        .iter()
        .rposition(|ch| *ch == '.')
        .or_else(|| window.iter().rposition(|ch| *ch == ' '))
        .map(|pos| earliest + pos + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(chunks: &[SpeechChunk]) -> String {
        chunks.iter().map(|chunk| chunk.text.as_str()).collect()
    }

    fn sample_text(len: usize) -> String {
        let sentence = "The narrator reads every page aloud. ";
        sentence.chars().cycle().take(len).collect()
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_into_chunks("Hello there.", &ChunkingOptions::default());
        assert_eq!(
            chunks,
            vec![SpeechChunk {
                text: "Hello there.".to_string(),
                start_offset: 0
            }]
        );
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_into_chunks("", &ChunkingOptions::default()).is_empty());
    }

    #[test]
    fn first_chunk_ends_on_sentence_boundary_past_minimum() {
        let text = sample_text(5000);
        let chunks = split_into_chunks(&text, &ChunkingOptions::default());
        let first = &chunks[0];
        let len = first.char_len();
        assert!(len > 200 && len <= 1600, "unexpected chunk length {len}");
        assert!(first.text.ends_with('.'));
        assert_eq!(joined(&chunks), text);
    }

    #[test]
    fn falls_back_to_space_then_hard_cut() {
        let words: String = "word ".repeat(500);
        let chunks = split_into_chunks(&words, &ChunkingOptions::default());
        assert!(chunks[0].text.ends_with(' '));

        let solid = "x".repeat(4000);
        let chunks = split_into_chunks(&solid, &ChunkingOptions::default());
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_offset).collect();
        assert_eq!(starts, vec![0, 1600, 3200]);
    }

    #[test]
    fn ignores_breaks_too_close_to_chunk_start() {
        let mut text = String::from("Hi. ");
        text.push_str(&"y".repeat(2000));
        let chunks = split_into_chunks(&text, &ChunkingOptions::default());
        assert_eq!(chunks[0].char_len(), 1600);
    }

    #[test]
    fn offsets_track_chunk_positions() {
        let text = sample_text(4321);
        let chunks = split_into_chunks(&text, &ChunkingOptions::default());
        let mut expected_start = 0;
        for chunk in &chunks {
            assert_eq!(chunk.start_offset, expected_start);
            expected_start += chunk.char_len();
        }
        assert_eq!(expected_start, text.chars().count());
    }

    #[test]
    fn round_trips_for_any_limit() {
        let texts = [
            sample_text(3333),
            "ünïcödé wörds ándâ mörê. ".repeat(120),
            "no-breaks-at-all".repeat(90),
        ];
        for text in &texts {
            for max in [1, 2, 7, 150, 201, 202, 999, 1600, 10_000] {
                let options = ChunkingOptions {
                    max_chunk_chars: max,
                    min_break_offset: DEFAULT_MIN_BREAK_OFFSET,
                };
                let chunks = split_into_chunks(text, &options);
                assert_eq!(&joined(&chunks), text, "max={max}");
                assert!(chunks.iter().all(|c| c.char_len() <= max && !c.text.is_empty()));
            }
        }
    }
}
