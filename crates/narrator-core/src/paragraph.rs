//! Re-joins words hyphenated across line breaks and assembles page text.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_HYPHEN_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z\p{L}]-$").unwrap());
static RE_LOWERCASE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z\p{Ll}]").unwrap());

/// Merge `happi-` + `ness` style breaks in one left-to-right pass.
///
/// A merged line is not re-examined against the line after the one it
/// consumed; scanning resumes from there.
pub fn merge_hyphenated_lines(lines: &[String]) -> Vec<String> {
    let mut merged = Vec::with_capacity(lines.len());
    let mut idx = 0;
    while idx < lines.len() {
        let current = &lines[idx];
        if let Some(next) = lines.get(idx + 1) {
            if RE_HYPHEN_END.is_match(current) && RE_LOWERCASE_START.is_match(next) {
                let mut joined = current[..current.len() - 1].to_string();
                joined.push_str(next.trim_start());
                merged.push(joined);
                idx += 2;
                continue;
            }
        }
        merged.push(current.clone());
        idx += 1;
    }
    merged
}

/// Newline-join a page's lines, merging hyphenation breaks when enabled.
pub fn join_page(lines: &[String], merge_hyphenation: bool) -> String {
    if merge_hyphenation {
        merge_hyphenated_lines(lines).join("\n")
    } else {
        lines.join("\n")
    }
}
