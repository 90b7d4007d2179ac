//! Playback session: speaks chunked text through a [`SpeechBackend`] and
//! publishes a global cursor as the backend reports progress.
//!
//! The session is the single owner of the backend handle, the generation
//! counter and the cursor. Backend events and remote commands arrive on one
//! channel and are applied in order by [`PlaybackSession::run_until_idle`] or
//! [`PlaybackSession::process_pending`]. Each utterance carries the generation
//! it was issued under; anything tagged with an older generation is dropped.

mod backend;
mod voices;

pub use backend::{BackendEvent, SpeechBackend, Utterance, UtteranceSink};
pub use voices::{Voice, resolve_voice};

use crate::cancellation::Generation;
use crate::chunking::{ChunkingOptions, SpeechChunk, split_into_chunks};
use crate::config::VoiceSettings;
use crate::error::PlaybackError;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Speaking,
    Paused,
}

/// Notifications broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { chunks: usize },
    ChunkStarted { index: usize, start_offset: usize },
    Cursor(usize),
    Paused,
    Resumed,
    Finished,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    Pause,
    Resume,
    Cancel,
}

#[derive(Debug)]
pub(crate) enum SessionMessage {
    Backend {
        generation: Generation,
        chunk: usize,
        event: BackendEvent,
    },
    Command(SessionCommand),
}

/// Thread-safe remote control for a session. Requests are queued and applied
/// by the session's control loop.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: Sender<SessionMessage>,
}

impl SessionHandle {
    pub fn pause(&self) {
        self.send(SessionCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(SessionCommand::Resume);
    }

    pub fn cancel(&self) {
        self.send(SessionCommand::Cancel);
    }

    fn send(&self, command: SessionCommand) {
        let _ = self.tx.send(SessionMessage::Command(command));
    }
}

type CursorCallback = Box<dyn FnMut(usize) + Send>;

pub struct PlaybackSession {
    backend: Box<dyn SpeechBackend>,
    chunking: ChunkingOptions,
    state: PlaybackState,
    generation: Generation,
    chunks: Vec<SpeechChunk>,
    current_chunk: usize,
    cursor: usize,
    voice: Option<Voice>,
    settings: VoiceSettings,
    tx: Sender<SessionMessage>,
    rx: Receiver<SessionMessage>,
    subscribers: Vec<Sender<PlaybackEvent>>,
    cursor_callback: Option<CursorCallback>,
}

impl PlaybackSession {
    pub fn new(backend: Box<dyn SpeechBackend>, chunking: ChunkingOptions) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            backend,
            chunking,
            state: PlaybackState::Idle,
            generation: Generation::default(),
            chunks: Vec::new(),
            current_chunk: 0,
            cursor: 0,
            voice: None,
            settings: VoiceSettings::default(),
            tx,
            rx,
            subscribers: Vec::new(),
            cursor_callback: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Global char offset last reported by the backend in this session.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn chunks(&self) -> &[SpeechChunk] {
        &self.chunks
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn set_cursor_callback(&mut self, callback: impl FnMut(usize) + Send + 'static) {
        self.cursor_callback = Some(Box::new(callback));
    }

    /// Begin speaking `text`, cancelling whatever was playing.
    ///
    /// Empty text finishes at once without touching the backend. Fails with
    /// [`PlaybackError::BackendUnavailable`] when no voice can be resolved,
    /// before any utterance is issued.
    pub fn start(&mut self, text: &str, settings: VoiceSettings) -> Result<(), PlaybackError> {
        if self.state != PlaybackState::Idle {
            self.cancel();
        }
        let generation = self.generation.advance();
        self.cursor = 0;
        self.current_chunk = 0;
        self.chunks = split_into_chunks(text, &self.chunking);
        let settings = settings.clamped();

        if self.chunks.is_empty() {
            info!(%generation, "Nothing to speak");
            self.broadcast(PlaybackEvent::Started { chunks: 0 });
            self.broadcast(PlaybackEvent::Finished);
            return Ok(());
        }

        let voices = self.backend.voices();
        let Some(voice) = resolve_voice(&voices, &settings) else {
            self.abandon();
            return Err(PlaybackError::BackendUnavailable(
                "no voices available".to_string(),
            ));
        };

        info!(
            %generation,
            chunks = self.chunks.len(),
            chars = text.chars().count(),
            voice = %voice.id,
            "Starting playback session"
        );
        self.voice = Some(voice);
        self.settings = settings;
        self.state = PlaybackState::Speaking;
        self.broadcast(PlaybackEvent::Started {
            chunks: self.chunks.len(),
        });
        if let Err(err) = self.speak_current() {
            self.backend.cancel();
            self.abandon();
            return Err(err);
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Speaking {
            debug!(state = ?self.state, "Ignoring pause request");
            return;
        }
        self.backend.pause();
        self.state = PlaybackState::Paused;
        info!(generation = %self.generation, cursor = self.cursor, "Playback paused");
        self.broadcast(PlaybackEvent::Paused);
    }

    pub fn resume(&mut self) {
        if self.state != PlaybackState::Paused {
            debug!(state = ?self.state, "Ignoring resume request");
            return;
        }
        self.backend.resume();
        self.state = PlaybackState::Speaking;
        info!(generation = %self.generation, cursor = self.cursor, "Playback resumed");
        self.broadcast(PlaybackEvent::Resumed);
    }

    /// Stop speaking, reset the cursor and return to `Idle`. Events still in
    /// flight for the cancelled utterance are discarded when they arrive.
    pub fn cancel(&mut self) {
        let was_active = self.state != PlaybackState::Idle;
        if was_active {
            self.backend.cancel();
        }
        let stopped_at = self.cursor;
        self.abandon();
        if was_active {
            info!(
                generation = %self.generation,
                cursor = stopped_at,
                "Playback cancelled"
            );
            self.broadcast(PlaybackEvent::Cancelled);
        }
    }

    /// Block until the session returns to `Idle`.
    pub fn run_until_idle(&mut self) {
        while self.state != PlaybackState::Idle {
            match self.rx.recv() {
                Ok(message) => self.handle_message(message),
                Err(_) => break,
            }
        }
    }

    /// Apply every queued message without blocking. Returns how many were
    /// handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.rx.try_recv() {
            self.handle_message(message);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for one message and apply it. Returns whether a
    /// message was handled.
    pub fn next_message_timeout(&mut self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => {
                self.handle_message(message);
                true
            }
            Err(_) => false,
        }
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Command(SessionCommand::Pause) => self.pause(),
            SessionMessage::Command(SessionCommand::Resume) => self.resume(),
            SessionMessage::Command(SessionCommand::Cancel) => self.cancel(),
            SessionMessage::Backend {
                generation,
                chunk,
                event,
            } => self.handle_backend_event(generation, chunk, event),
        }
    }

    fn handle_backend_event(&mut self, generation: Generation, chunk: usize, event: BackendEvent) {
        if generation != self.generation
            || chunk != self.current_chunk
            || self.state == PlaybackState::Idle
        {
            warn!(
                %generation,
                current = %self.generation,
                chunk,
                ?event,
                "Ignoring stale speech event"
            );
            return;
        }
        match event {
            BackendEvent::Boundary { char_index } => self.advance_cursor(char_index),
            BackendEvent::Finished => self.on_chunk_finished(),
            BackendEvent::Failed(reason) => {
                warn!(%generation, chunk, "Speech backend failed: {reason}");
                self.backend.cancel();
                self.abandon();
                self.broadcast(PlaybackEvent::Failed(reason));
            }
        }
    }

    fn advance_cursor(&mut self, char_index: usize) {
        let Some(chunk) = self.chunks.get(self.current_chunk) else {
            return;
        };
        let offset = chunk.start_offset + char_index.min(chunk.char_len());
        if offset < self.cursor {
            debug!(offset, cursor = self.cursor, "Ignoring backwards boundary");
            return;
        }
        self.cursor = offset;
        if let Some(callback) = self.cursor_callback.as_mut() {
            callback(offset);
        }
        self.broadcast(PlaybackEvent::Cursor(offset));
    }

    fn on_chunk_finished(&mut self) {
        debug!(
            generation = %self.generation,
            chunk = self.current_chunk,
            "Chunk finished"
        );
        self.current_chunk += 1;
        if self.current_chunk >= self.chunks.len() {
            self.state = PlaybackState::Idle;
            info!(
                generation = %self.generation,
                chunks = self.chunks.len(),
                "Playback finished"
            );
            self.broadcast(PlaybackEvent::Finished);
            return;
        }
        if let Err(err) = self.speak_current() {
            warn!(chunk = self.current_chunk, "Failed to start next chunk: {err}");
            self.backend.cancel();
            self.abandon();
            self.broadcast(PlaybackEvent::Failed(err.to_string()));
        }
    }

    fn speak_current(&mut self) -> Result<(), PlaybackError> {
        let Some(chunk) = self.chunks.get(self.current_chunk) else {
            return Ok(());
        };
        let utterance = Utterance {
            text: chunk.text.clone(),
            voice: self.voice.clone(),
            rate: self.settings.rate,
            pitch: self.settings.pitch,
        };
        let start_offset = chunk.start_offset;
        debug!(
            generation = %self.generation,
            chunk = self.current_chunk,
            offset = start_offset,
            chars = chunk.char_len(),
            "Speaking chunk"
        );
        let sink = UtteranceSink::new(self.generation, self.current_chunk, self.tx.clone());
        self.broadcast(PlaybackEvent::ChunkStarted {
            index: self.current_chunk,
            start_offset,
        });
        self.backend.speak(utterance, sink)
    }

    /// Drop the current session without leaving a chunk in flight.
    fn abandon(&mut self) {
        self.generation.advance();
        self.state = PlaybackState::Idle;
        self.cursor = 0;
    }

    fn broadcast(&mut self, event: PlaybackEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        voices: Vec<Voice>,
        spoken: Vec<(Utterance, UtteranceSink)>,
        calls: Vec<&'static str>,
        voice_queries: usize,
    }

    /// Records every request; tests drive progress through the stored sinks.
    struct ScriptedBackend(Arc<Mutex<Script>>);

    impl SpeechBackend for ScriptedBackend {
        fn voices(&self) -> Vec<Voice> {
            let mut script = self.0.lock().unwrap();
            script.voice_queries += 1;
            script.voices.clone()
        }

        fn speak(&mut self, utterance: Utterance, sink: UtteranceSink) -> Result<(), PlaybackError> {
            let mut script = self.0.lock().unwrap();
            script.calls.push("speak");
            script.spoken.push((utterance, sink));
            Ok(())
        }

        fn pause(&mut self) {
            self.0.lock().unwrap().calls.push("pause");
        }

        fn resume(&mut self) {
            self.0.lock().unwrap().calls.push("resume");
        }

        fn cancel(&mut self) {
            self.0.lock().unwrap().calls.push("cancel");
        }
    }

    fn scripted_session(voices: Vec<Voice>) -> (PlaybackSession, Arc<Mutex<Script>>) {
        let script = Arc::new(Mutex::new(Script {
            voices,
            ..Script::default()
        }));
        let session = PlaybackSession::new(
            Box::new(ScriptedBackend(Arc::clone(&script))),
            ChunkingOptions::default(),
        );
        (session, script)
    }

    fn english() -> Vec<Voice> {
        vec![Voice::new("amy", "Amy", "en-US")]
    }

    fn sink(script: &Arc<Mutex<Script>>, idx: usize) -> UtteranceSink {
        script.lock().unwrap().spoken[idx].1.clone()
    }

    #[test]
    fn cursor_is_global_and_non_decreasing_across_chunks() {
        let (mut session, script) = scripted_session(english());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        session.set_cursor_callback(move |offset| recorder.lock().unwrap().push(offset));

        let text = "x".repeat(2000);
        session.start(&text, VoiceSettings::default()).unwrap();
        assert_eq!(session.chunks().len(), 2);
        assert_eq!(session.chunks()[1].start_offset, 1600);

        let first = sink(&script, 0);
        first.boundary(0);
        first.boundary(50);
        first.boundary(100);
        first.finished();
        session.process_pending();
        assert_eq!(script.lock().unwrap().spoken.len(), 2);

        let second = sink(&script, 1);
        second.boundary(0);
        second.boundary(30);
        second.finished();
        session.process_pending();

        assert_eq!(*seen.lock().unwrap(), vec![0, 50, 100, 1600, 1630]);
        assert_eq!(session.cursor(), 1630);
        assert_eq!(session.state(), PlaybackState::Idle);
    }

    #[test]
    fn broadcasts_lifecycle_events() {
        let (mut session, script) = scripted_session(english());
        let events = session.subscribe();
        session.start("Short text.", VoiceSettings::default()).unwrap();
        let first = sink(&script, 0);
        first.boundary(6);
        first.finished();
        session.run_until_idle();

        let received: Vec<PlaybackEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                PlaybackEvent::Started { chunks: 1 },
                PlaybackEvent::ChunkStarted {
                    index: 0,
                    start_offset: 0
                },
                PlaybackEvent::Cursor(6),
                PlaybackEvent::Finished,
            ]
        );
    }

    #[test]
    fn chunks_are_spoken_one_at_a_time() {
        let (mut session, script) = scripted_session(english());
        session.start(&"y".repeat(5000), VoiceSettings::default()).unwrap();
        session.process_pending();
        assert_eq!(script.lock().unwrap().spoken.len(), 1);
        sink(&script, 0).boundary(10);
        session.process_pending();
        assert_eq!(script.lock().unwrap().spoken.len(), 1);
    }

    #[test]
    fn stale_generation_events_are_ignored() {
        let (mut session, script) = scripted_session(english());
        let text = "z".repeat(2000);
        session.start(&text, VoiceSettings::default()).unwrap();
        let old = sink(&script, 0);

        session.start(&text, VoiceSettings::default()).unwrap();
        assert!(old.generation() < session.generation());
        old.boundary(90);
        old.finished();
        session.process_pending();

        assert_eq!(session.cursor(), 0);
        assert_eq!(script.lock().unwrap().spoken.len(), 2);
        assert_eq!(session.state(), PlaybackState::Speaking);
    }

    #[test]
    fn late_completion_after_cancel_does_not_advance() {
        let (mut session, script) = scripted_session(english());
        let events = session.subscribe();
        session.start(&"w".repeat(3000), VoiceSettings::default()).unwrap();
        let first = sink(&script, 0);

        session.cancel();
        first.finished();
        session.process_pending();

        let script = script.lock().unwrap();
        assert_eq!(script.spoken.len(), 1);
        assert_eq!(script.calls, vec!["speak", "cancel"]);
        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(events.try_iter().last(), Some(PlaybackEvent::Cancelled));
    }

    #[test]
    fn cancel_mid_chunk_resets_cursor() {
        let (mut session, script) = scripted_session(english());
        session.start(&"v".repeat(2000), VoiceSettings::default()).unwrap();
        let first = sink(&script, 0);
        first.boundary(120);
        session.process_pending();
        assert_eq!(session.cursor(), 120);

        session.cancel();
        assert_eq!(session.cursor(), 0);
        first.boundary(140);
        session.process_pending();
        assert_eq!(session.cursor(), 0);
    }

    #[test]
    fn empty_text_finishes_without_backend() {
        let (mut session, script) = scripted_session(Vec::new());
        let events = session.subscribe();
        session.start("", VoiceSettings::default()).unwrap();
        assert_eq!(session.state(), PlaybackState::Idle);

        let script = script.lock().unwrap();
        assert_eq!(script.voice_queries, 0);
        assert!(script.calls.is_empty());
        let received: Vec<PlaybackEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![PlaybackEvent::Started { chunks: 0 }, PlaybackEvent::Finished]
        );
    }

    #[test]
    fn missing_voices_fail_fast() {
        let (mut session, script) = scripted_session(Vec::new());
        let before = session.generation();
        let err = session
            .start("hello", VoiceSettings::default())
            .expect_err("no voices should fail");
        assert!(matches!(err, PlaybackError::BackendUnavailable(_)));
        assert_eq!(session.state(), PlaybackState::Idle);
        assert!(session.generation() > before);
        assert!(script.lock().unwrap().spoken.is_empty());
    }

    #[test]
    fn pause_and_resume_keep_cursor() {
        let (mut session, script) = scripted_session(english());
        session.start("one two three", VoiceSettings::default()).unwrap();
        sink(&script, 0).boundary(4);
        session.process_pending();

        let handle = session.handle();
        handle.pause();
        session.process_pending();
        assert_eq!(session.state(), PlaybackState::Paused);
        assert_eq!(session.cursor(), 4);

        handle.resume();
        session.process_pending();
        assert_eq!(session.state(), PlaybackState::Speaking);
        assert_eq!(session.cursor(), 4);
        assert_eq!(script.lock().unwrap().calls, vec!["speak", "pause", "resume"]);
    }

    #[test]
    fn handle_cancel_from_another_thread_ends_run() {
        let (mut session, _script) = scripted_session(english());
        session.start("never finishes", VoiceSettings::default()).unwrap();
        let handle = session.handle();
        let worker = std::thread::spawn(move || handle.cancel());
        session.run_until_idle();
        worker.join().unwrap();
        assert_eq!(session.state(), PlaybackState::Idle);
    }

    #[test]
    fn backend_failure_returns_to_idle() {
        let (mut session, script) = scripted_session(english());
        let events = session.subscribe();
        session.start(&"v".repeat(2000), VoiceSettings::default()).unwrap();
        sink(&script, 0).failed("audio device lost");
        session.run_until_idle();

        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(
            events.try_iter().last(),
            Some(PlaybackEvent::Failed("audio device lost".to_string()))
        );
        assert_eq!(script.lock().unwrap().spoken.len(), 1);
    }

    #[test]
    fn utterances_carry_resolved_voice_and_clamped_rate() {
        let (mut session, script) = scripted_session(vec![
            Voice::new("amy", "Amy", "en-US"),
            Voice::new("eva", "Eva", "de-DE"),
        ]);
        let settings = VoiceSettings {
            lang: Some("de".to_string()),
            rate: Some(4.0),
            ..VoiceSettings::default()
        };
        session.start("Guten Tag.", settings).unwrap();
        let script = script.lock().unwrap();
        let utterance = &script.spoken[0].0;
        assert_eq!(utterance.voice.as_ref().map(|v| v.id.as_str()), Some("eva"));
        assert_eq!(utterance.rate, Some(2.0));
        assert_eq!(utterance.pitch, None);
    }
}
