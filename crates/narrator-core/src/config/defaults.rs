pub(crate) fn default_log_level() -> crate::config::LogLevel {
    crate::config::LogLevel::Info
}

pub(crate) fn default_same_line_tolerance() -> f32 {
    crate::layout::DEFAULT_SAME_LINE_TOLERANCE
}

pub(crate) fn default_merge_hyphenation() -> bool {
    true
}

pub(crate) fn default_fold_compatibility_forms() -> bool {
    true
}

pub(crate) fn default_max_chunk_chars() -> usize {
    crate::chunking::DEFAULT_MAX_CHUNK_CHARS
}

pub(crate) fn default_min_break_offset() -> usize {
    crate::chunking::DEFAULT_MIN_BREAK_OFFSET
}

pub(crate) fn default_paced_words_per_minute() -> f64 {
    170.0
}

pub(crate) fn default_tts_model() -> String {
    "/usr/share/piper-voices/en/en_US/ryan/high/en_US-ryan-high.onnx".to_string()
}

pub(crate) fn default_tts_espeak_path() -> String {
    "/usr/share".to_string()
}

pub(crate) fn default_library_dir() -> String {
    ".cache/library".to_string()
}
