//! Concrete speech backends for the command-line reader.

mod paced;
#[cfg(feature = "piper")]
mod piper;

pub use paced::PacedBackend;

use anyhow::Result;
use narrator_core::config::{AppConfig, TtsBackendKind};
use narrator_core::playback::SpeechBackend;
use std::time::Duration;

/// Poll interval for utterance workers waiting on pause or cancel.
pub(crate) const WORKER_POLL: Duration = Duration::from_millis(8);

pub fn build_backend(config: &AppConfig) -> Result<Box<dyn SpeechBackend>> {
    tracing::info!(backend = %config.tts_backend, "Creating speech backend");
    match config.tts_backend {
        TtsBackendKind::Paced => Ok(Box::new(PacedBackend::new(
            config.paced_words_per_minute,
            config.tts_lang.clone(),
        ))),
        TtsBackendKind::Piper => build_piper(config),
    }
}

#[cfg(feature = "piper")]
fn build_piper(config: &AppConfig) -> Result<Box<dyn SpeechBackend>> {
    let backend = piper::PiperBackend::new(
        config.tts_model_path.clone().into(),
        config.tts_espeak_path.clone().into(),
        std::path::Path::new(&config.library_dir).join("tts"),
    )?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "piper"))]
fn build_piper(_config: &AppConfig) -> Result<Box<dyn SpeechBackend>> {
    Err(narrator_core::PlaybackError::BackendUnavailable(
        "this build does not include the `piper` feature".to_string(),
    )
    .into())
}

/// Char offsets at which each whitespace-delimited word starts.
pub(crate) fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut prev_is_space = true;
    for (idx, ch) in text.chars().enumerate() {
        let is_space = ch.is_whitespace();
        if prev_is_space && !is_space {
            starts.push(idx);
        }
        prev_is_space = is_space;
    }
    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_starts_skip_whitespace_runs() {
        assert_eq!(word_starts("the  quick\nfox "), vec![0, 5, 11]);
        assert_eq!(word_starts("  lead"), vec![2]);
        assert!(word_starts("   ").is_empty());
        assert_eq!(word_starts("é ü"), vec![0, 2]);
    }

    #[test]
    fn paced_backend_is_the_default() {
        let backend = build_backend(&AppConfig::default()).expect("paced backend");
        assert!(!backend.voices().is_empty());
    }
}
