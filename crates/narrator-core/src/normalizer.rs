//! Single-line cleanup applied to every reconstructed line.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_DOTTED_LEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:\s?\.\s?){3,}").unwrap());
static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([,.;:!?])").unwrap());
static RE_SPACE_AFTER_OPEN_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([(\[{])\s+").unwrap());

/// Clean one raw line of text.
///
/// Whitespace runs collapse to a single space, table-of-contents leaders
/// (`. . . .`) become one space, spaces before `, . ; : ! ?` and after
/// `( [ {` are dropped, and the result is trimmed.
pub fn clean_line(raw: &str) -> String {
    let text = RE_WHITESPACE_RUN.replace_all(raw, " ");
    let text = RE_DOTTED_LEADER.replace_all(&text, " ");
    let text = RE_SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    let text = RE_SPACE_AFTER_OPEN_BRACKET.replace_all(&text, "$1");
    text.trim().to_string()
}

/// Letters in any script, or ASCII digits.
pub fn is_word_char(ch: char) -> bool {
    ch.is_alphabetic() || ch.is_ascii_digit()
}
