//! Silent backend that walks the text at a reading pace.
//!
//! Useful without audio hardware: boundaries arrive at the speed a voice
//! would reach them, so the highlighted word moves as if spoken.

use super::{WORKER_POLL, word_starts};
use narrator_core::CancellationToken;
use narrator_core::error::PlaybackError;
use narrator_core::playback::{SpeechBackend, Utterance, UtteranceSink, Voice};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

pub struct PacedBackend {
    words_per_minute: f64,
    voice: Voice,
    current: Option<UtteranceWorker>,
}

struct UtteranceWorker {
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PacedBackend {
    pub fn new(words_per_minute: f64, lang: Option<String>) -> Self {
        let lang = lang.unwrap_or_else(|| "en-US".to_string());
        Self {
            words_per_minute: words_per_minute.max(1.0),
            voice: Voice::new("paced", format!("Paced reader ({lang})"), lang),
            current: None,
        }
    }

    fn word_delay(&self, rate: f32) -> Duration {
        let rate = f64::from(rate).max(0.1);
        Duration::from_secs_f64(60.0 / (self.words_per_minute * rate))
    }

    fn stop_current(&mut self) {
        if let Some(worker) = self.current.take() {
            worker.cancel.cancel();
            if worker.handle.join().is_err() {
                tracing::warn!("Paced utterance worker panicked");
            }
        }
    }
}

impl SpeechBackend for PacedBackend {
    fn voices(&self) -> Vec<Voice> {
        vec![self.voice.clone()]
    }

    fn speak(&mut self, utterance: Utterance, sink: UtteranceSink) -> Result<(), PlaybackError> {
        self.stop_current();
        let delay = self.word_delay(utterance.rate.unwrap_or(1.0));
        let cancel = CancellationToken::new();
        let paused = Arc::new(AtomicBool::new(false));
        debug!(
            generation = %sink.generation(),
            chunk = sink.chunk_index(),
            delay_ms = delay.as_millis() as u64,
            "Starting paced utterance"
        );

        let worker_cancel = cancel.clone();
        let worker_paused = Arc::clone(&paused);
        let handle = thread::Builder::new()
            .name("paced-utterance".to_string())
            .spawn(move || {
                for offset in word_starts(&utterance.text) {
                    sink.boundary(offset);
                    if !wait(delay, &worker_paused, &worker_cancel) {
                        return;
                    }
                }
                if !worker_cancel.is_cancelled() {
                    sink.finished();
                }
            })
            .map_err(|err| PlaybackError::Backend(format!("spawning utterance worker: {err}")))?;

        self.current = Some(UtteranceWorker {
            cancel,
            paused,
            handle,
        });
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(worker) = &self.current {
            worker.paused.store(true, Ordering::Release);
        }
    }

    fn resume(&mut self) {
        if let Some(worker) = &self.current {
            worker.paused.store(false, Ordering::Release);
        }
    }

    fn cancel(&mut self) {
        self.stop_current();
    }
}

impl Drop for PacedBackend {
    fn drop(&mut self) {
        self.stop_current();
    }
}

/// Sleep for `delay` of unpaused time. Returns `false` once cancelled.
fn wait(delay: Duration, paused: &AtomicBool, cancel: &CancellationToken) -> bool {
    let mut remaining = delay;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return false;
        }
        let step = remaining.min(WORKER_POLL);
        thread::sleep(step);
        if !paused.load(Ordering::Acquire) {
            remaining = remaining.saturating_sub(step);
        }
    }
    !cancel.is_cancelled()
}
