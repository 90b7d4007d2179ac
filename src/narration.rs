//! Terminal read-aloud loop: drives a playback session and redraws the
//! current word with a little surrounding context.

use anyhow::{Result, anyhow};
use narrator_core::config::{AppConfig, VoiceSettings};
use narrator_core::highlight::word_span;
use narrator_core::playback::{PlaybackEvent, PlaybackSession, PlaybackState, SpeechBackend};
use narrator_core::{CancellationToken, SessionHandle};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

const CONTEXT_CHARS: usize = 32;
const EVENT_WAIT: Duration = Duration::from_millis(50);

/// Ctrl-C target shared between the signal handler and whatever is running.
#[derive(Clone, Default)]
pub struct Interrupt {
    token: CancellationToken,
    session: Arc<Mutex<Option<SessionHandle>>>,
}

impl Interrupt {
    pub fn install() -> Result<Self> {
        let interrupt = Self::default();
        let handler = interrupt.clone();
        ctrlc::set_handler(move || handler.trigger())
            .map_err(|err| anyhow!("Installing Ctrl-C handler: {err}"))?;
        Ok(interrupt)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn trigger(&self) {
        warn!("Interrupt received, stopping");
        self.token.cancel();
        if let Ok(guard) = self.session.lock() {
            if let Some(handle) = guard.as_ref() {
                handle.cancel();
            }
        }
    }

    fn attach(&self, handle: SessionHandle) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(handle);
        }
    }

    fn detach(&self) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = None;
        }
    }
}

/// Speak `text` to completion, cancellation or failure.
pub fn narrate(
    text: &str,
    config: &AppConfig,
    backend: Box<dyn SpeechBackend>,
    interrupt: &Interrupt,
) -> Result<()> {
    let settings: VoiceSettings = config.voice_settings();
    let mut session = PlaybackSession::new(backend, config.chunking_options());
    let events = session.subscribe();
    interrupt.attach(session.handle());
    if interrupt.token().is_cancelled() {
        session.handle().cancel();
    }

    session.start(text, settings)?;
    info!(chunks = session.chunks().len(), "Narration started");

    let chars: Vec<char> = text.chars().collect();
    let mut out = std::io::stdout().lock();
    let mut failure = None;
    let mut cancelled = false;
    let mut last_offset = 0;
    loop {
        for event in events.try_iter() {
            match event {
                PlaybackEvent::Cursor(offset) => {
                    last_offset = offset;
                    let line = render_context(&chars, offset);
                    write!(out, "\r\x1b[2K{line}")?;
                    out.flush()?;
                }
                PlaybackEvent::Paused => info!("Narration paused"),
                PlaybackEvent::Resumed => info!("Narration resumed"),
                PlaybackEvent::Cancelled => cancelled = true,
                PlaybackEvent::Failed(reason) => failure = Some(reason),
                PlaybackEvent::Started { .. }
                | PlaybackEvent::ChunkStarted { .. }
                | PlaybackEvent::Finished => {}
            }
        }
        if session.state() == PlaybackState::Idle {
            break;
        }
        session.next_message_timeout(EVENT_WAIT);
    }
    writeln!(out)?;
    interrupt.detach();

    if let Some(reason) = failure {
        return Err(anyhow!("Narration failed: {reason}"));
    }
    if cancelled {
        info!(cursor = last_offset, "Narration cancelled");
    } else {
        info!("Narration finished");
    }
    Ok(())
}

/// One terminal line around the word at `offset`, the word in reverse video.
pub fn render_context(chars: &[char], offset: usize) -> String {
    if chars.is_empty() {
        return String::new();
    }
    let (start, end) = word_span(chars, offset);
    let left = start.saturating_sub(CONTEXT_CHARS);
    let right = (end + CONTEXT_CHARS).min(chars.len());
    let flatten = |slice: &[char]| -> String {
        slice
            .iter()
            .map(|ch| if ch.is_whitespace() { ' ' } else { *ch })
            .collect()
    };
    let word = if start == end {
        String::new()
    } else {
        format!("\x1b[7m{}\x1b[0m", flatten(&chars[start..end]))
    };
    format!(
        "{}{}{}{}{}",
        if left > 0 { "…" } else { "" },
        flatten(&chars[left..start]),
        word,
        flatten(&chars[end..right]),
        if right < chars.len() { "…" } else { "" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::PacedBackend;

    #[test]
    fn renders_word_in_reverse_video() {
        let chars: Vec<char> = "the quick\nbrown fox".chars().collect();
        assert_eq!(
            render_context(&chars, 4),
            "the \x1b[7mquick\x1b[0m brown fox"
        );
        assert_eq!(render_context(&[], 0), "");
    }

    #[test]
    fn trailing_whitespace_renders_without_marker() {
        let chars: Vec<char> = "done  ".chars().collect();
        assert_eq!(render_context(&chars, 6), "done  ");
    }

    #[test]
    fn trims_long_context() {
        let text = format!("{} target {}", "a".repeat(100), "b".repeat(100));
        let chars: Vec<char> = text.chars().collect();
        let line = render_context(&chars, 102);
        assert!(line.starts_with('…') && line.ends_with('…'));
        assert!(line.contains("\x1b[7mtarget\x1b[0m"));
    }

    #[test]
    fn narrates_with_paced_backend() {
        let config = AppConfig::default();
        let backend = Box::new(PacedBackend::new(600_000.0, None));
        narrate("A short line to read.", &config, backend, &Interrupt::default())
            .expect("narration should finish");
    }

    #[test]
    fn pre_cancelled_interrupt_stops_narration() {
        let config = AppConfig::default();
        let interrupt = Interrupt::default();
        interrupt.token.cancel();
        let backend = Box::new(PacedBackend::new(1.0, None));
        narrate("This would take minutes.", &config, backend, &interrupt)
            .expect("cancel is not a failure");
    }
}
