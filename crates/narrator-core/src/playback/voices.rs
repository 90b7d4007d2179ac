use crate::config::VoiceSettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    /// BCP 47 tag, e.g. `en-US`.
    pub lang: String,
}

impl Voice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// Pick the voice for a session: exact id, then language prefix, then the
/// backend's first voice. `None` only when `voices` is empty.
pub fn resolve_voice(voices: &[Voice], settings: &VoiceSettings) -> Option<Voice> {
    if let Some(id) = settings.voice_id.as_deref() {
        if let Some(voice) = voices.iter().find(|voice| voice.id == id) {
            debug!(voice = %voice.id, "Resolved voice by id");
            return Some(voice.clone());
        }
        warn!(requested = id, "Requested voice not found, falling back");
    }
    if let Some(lang) = settings.lang.as_deref() {
        let prefix = lang.to_ascii_lowercase();
        if let Some(voice) = voices
            .iter()
            .find(|voice| voice.lang.to_ascii_lowercase().starts_with(&prefix))
        {
            debug!(voice = %voice.id, lang, "Resolved voice by language");
            return Some(voice.clone());
        }
    }
    voices.first().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voices() -> Vec<Voice> {
        vec![
            Voice::new("en-us-amy", "Amy", "en-US"),
            Voice::new("de-thorsten", "Thorsten", "de-DE"),
            Voice::new("en-gb-alan", "Alan", "en-GB"),
        ]
    }

    fn settings(voice_id: Option<&str>, lang: Option<&str>) -> VoiceSettings {
        VoiceSettings {
            voice_id: voice_id.map(str::to_string),
            lang: lang.map(str::to_string),
            ..VoiceSettings::default()
        }
    }

    #[test]
    fn prefers_exact_id() {
        let voice = resolve_voice(&voices(), &settings(Some("en-gb-alan"), Some("de")));
        assert_eq!(voice.map(|v| v.id), Some("en-gb-alan".to_string()));
    }

    #[test]
    fn falls_back_to_language_prefix() {
        let voice = resolve_voice(&voices(), &settings(None, Some("de")));
        assert_eq!(voice.map(|v| v.name), Some("Thorsten".to_string()));

        let voice = resolve_voice(&voices(), &settings(Some("missing"), Some("EN-gb")));
        assert_eq!(voice.map(|v| v.name), Some("Alan".to_string()));
    }

    #[test]
    fn defaults_to_first_voice() {
        let voice = resolve_voice(&voices(), &settings(None, Some("fr")));
        assert_eq!(voice.map(|v| v.name), Some("Amy".to_string()));
        assert_eq!(resolve_voice(&[], &VoiceSettings::default()), None);
    }
}
