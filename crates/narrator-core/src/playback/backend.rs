//! Contract between the playback session and a speech engine.

use super::SessionMessage;
use super::voices::Voice;
use crate::cancellation::Generation;
use crate::error::PlaybackError;
use std::sync::mpsc::Sender;

/// One chunk's worth of speech, with the voice options resolved for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<Voice>,
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
}

/// Progress reported by a backend while it speaks an utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Char offset reached within the utterance text.
    Boundary { char_index: usize },
    Finished,
    Failed(String),
}

/// Event channel handed to the backend for a single utterance.
///
/// Every event is stamped with the generation and chunk it was issued for,
/// so events that outlive a cancel are recognisable as stale. Sending after
/// the session is gone is a no-op.
#[derive(Debug, Clone)]
pub struct UtteranceSink {
    generation: Generation,
    chunk: usize,
    tx: Sender<SessionMessage>,
}

impl UtteranceSink {
    pub(crate) fn new(generation: Generation, chunk: usize, tx: Sender<SessionMessage>) -> Self {
        Self {
            generation,
            chunk,
            tx,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn chunk_index(&self) -> usize {
        self.chunk
    }

    pub fn boundary(&self, char_index: usize) {
        self.send(BackendEvent::Boundary { char_index });
    }

    pub fn finished(&self) {
        self.send(BackendEvent::Finished);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.send(BackendEvent::Failed(reason.into()));
    }

    fn send(&self, event: BackendEvent) {
        let _ = self.tx.send(SessionMessage::Backend {
            generation: self.generation,
            chunk: self.chunk,
            event,
        });
    }
}

/// A single-voice speech engine. The session never issues a second
/// utterance before the previous one reported `finished`, was cancelled, or
/// failed.
pub trait SpeechBackend: Send {
    /// Voices currently available. May be empty while the engine warms up.
    fn voices(&self) -> Vec<Voice>;

    /// Begin speaking. Progress and completion go through `sink`, possibly
    /// from another thread; this call should return promptly.
    fn speak(&mut self, utterance: Utterance, sink: UtteranceSink) -> Result<(), PlaybackError>;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Stop the current utterance immediately.
    fn cancel(&mut self);
}
