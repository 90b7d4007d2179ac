//! Configuration loading for the narrator.
//!
//! All user-tunable settings are centralized here and loaded from
//! `conf/config.toml` if present. Any missing or invalid entries fall back to
//! sensible defaults so extraction and playback can still run.

mod defaults;
mod io;
mod models;

pub use io::{load_config, parse_config, serialize_config};
pub use models::{
    AppConfig, LogLevel, MAX_TTS_PITCH, MAX_TTS_RATE, MIN_TTS_PITCH, MIN_TTS_RATE,
    TtsBackendKind, VoiceSettings,
};
