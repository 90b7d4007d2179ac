use serde::Deserialize;

use crate::chunking::ChunkingOptions;
use crate::extractor::{ExtractionOptions, PageFailurePolicy};

pub const MIN_TTS_RATE: f32 = 0.5;
pub const MAX_TTS_RATE: f32 = 2.0;
pub const MIN_TTS_PITCH: f32 = 0.0;
pub const MAX_TTS_PITCH: f32 = 2.0;

/// High-level app configuration; deserializable from TOML.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AppConfig {
    #[serde(default = "crate::config::defaults::default_log_level")]
    pub log_level: LogLevel,
    #[serde(default = "crate::config::defaults::default_same_line_tolerance")]
    pub same_line_tolerance: f32,
    #[serde(default = "crate::config::defaults::default_merge_hyphenation")]
    pub merge_hyphenation: bool,
    #[serde(default = "crate::config::defaults::default_fold_compatibility_forms")]
    pub fold_compatibility_forms: bool,
    #[serde(default)]
    pub page_failure_policy: PageFailurePolicy,
    #[serde(default = "crate::config::defaults::default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "crate::config::defaults::default_min_break_offset")]
    pub min_break_offset: usize,
    #[serde(default)]
    pub tts_backend: TtsBackendKind,
    #[serde(default)]
    pub tts_voice: Option<String>,
    #[serde(default)]
    pub tts_lang: Option<String>,
    #[serde(default)]
    pub tts_rate: Option<f32>,
    #[serde(default)]
    pub tts_pitch: Option<f32>,
    #[serde(default = "crate::config::defaults::default_paced_words_per_minute")]
    pub paced_words_per_minute: f64,
    #[serde(default = "crate::config::defaults::default_tts_model")]
    pub tts_model_path: String,
    #[serde(default = "crate::config::defaults::default_tts_espeak_path")]
    pub tts_espeak_path: String,
    #[serde(default = "crate::config::defaults::default_library_dir")]
    pub library_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: crate::config::defaults::default_log_level(),
            same_line_tolerance: crate::config::defaults::default_same_line_tolerance(),
            merge_hyphenation: crate::config::defaults::default_merge_hyphenation(),
            fold_compatibility_forms: crate::config::defaults::default_fold_compatibility_forms(),
            page_failure_policy: PageFailurePolicy::default(),
            max_chunk_chars: crate::config::defaults::default_max_chunk_chars(),
            min_break_offset: crate::config::defaults::default_min_break_offset(),
            tts_backend: TtsBackendKind::default(),
            tts_voice: None,
            tts_lang: None,
            tts_rate: None,
            tts_pitch: None,
            paced_words_per_minute: crate::config::defaults::default_paced_words_per_minute(),
            tts_model_path: crate::config::defaults::default_tts_model(),
            tts_espeak_path: crate::config::defaults::default_tts_espeak_path(),
            library_dir: crate::config::defaults::default_library_dir(),
        }
    }
}

impl AppConfig {
    pub fn extraction_options(&self) -> ExtractionOptions {
        ExtractionOptions {
            same_line_tolerance: self.same_line_tolerance.max(0.0),
            merge_hyphenation: self.merge_hyphenation,
            page_failure_policy: self.page_failure_policy,
        }
    }

    pub fn chunking_options(&self) -> ChunkingOptions {
        ChunkingOptions {
            max_chunk_chars: self.max_chunk_chars.max(1),
            min_break_offset: self.min_break_offset,
        }
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            voice_id: self.tts_voice.clone(),
            rate: self.tts_rate,
            pitch: self.tts_pitch,
            lang: self.tts_lang.clone(),
        }
        .clamped()
    }
}

/// Per-utterance voice options. Absent fields leave the backend default.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, serde::Serialize)]
pub struct VoiceSettings {
    pub voice_id: Option<String>,
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub lang: Option<String>,
}

impl VoiceSettings {
    pub fn clamped(self) -> Self {
        Self {
            rate: self.rate.map(|rate| rate.clamp(MIN_TTS_RATE, MAX_TTS_RATE)),
            pitch: self
                .pitch
                .map(|pitch| pitch.clamp(MIN_TTS_PITCH, MAX_TTS_PITCH)),
            ..self
        }
    }

    /// Rate with the backend default of 1.0 filled in.
    pub fn effective_rate(&self) -> f32 {
        self.rate.unwrap_or(1.0)
    }
}

/// Which speech backend the front end drives.
#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TtsBackendKind {
    #[default]
    Paced,
    Piper,
}

impl std::fmt::Display for TtsBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TtsBackendKind::Paced => "paced",
            TtsBackendKind::Piper => "piper",
        };
        write!(f, "{}", label)
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
