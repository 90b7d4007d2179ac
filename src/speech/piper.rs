//! Piper neural voice played through rodio.
//!
//! One long-lived thread owns the synthesizer and renders chunks to WAV files
//! cached by content hash. Each utterance then gets its own playback thread
//! that drives a rodio sink and reports word boundaries by interpolating the
//! clip duration over the chunk's characters.

use super::{WORKER_POLL, word_starts};
use anyhow::{Context, Result};
use narrator_core::CancellationToken;
use narrator_core::error::PlaybackError;
use narrator_core::playback::{SpeechBackend, Utterance, UtteranceSink, Voice};
use piper_rs::from_config_path;
use piper_rs::synth::{AudioOutputConfig, PiperSpeechSynthesizer};
use rodio::{Decoder, OutputStream, Sink};
use sha2::{Digest, Sha256};
use std::env;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

struct SynthJob {
    text: String,
    path: PathBuf,
    output_config: Option<AudioOutputConfig>,
    reply: Sender<Result<(), String>>,
}

pub struct PiperBackend {
    model_path: PathBuf,
    cache_dir: PathBuf,
    voice: Voice,
    jobs: Sender<SynthJob>,
    current: Option<UtteranceWorker>,
}

struct UtteranceWorker {
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PiperBackend {
    pub fn new(model_path: PathBuf, espeak_path: PathBuf, cache_dir: PathBuf) -> Result<Self> {
        let espeak_path = sanitize_espeak_root(espeak_path);
        if env::var_os("PIPER_ESPEAKNG_DATA_DIRECTORY").is_none() {
            // Safe because this runs on the main thread before any utterance worker exists.
            unsafe {
                env::set_var("PIPER_ESPEAKNG_DATA_DIRECTORY", &espeak_path);
            }
        }
        let config_path = resolve_piper_config(&model_path);
        if !config_path.exists() {
            anyhow::bail!(
                "Piper config not found at {} (expected from {})",
                config_path.display(),
                model_path.display()
            );
        }
        let voice = voice_from_config(&model_path, &config_path);
        info!(
            model = %model_path.display(),
            espeak_root = %espeak_path.display(),
            voice = %voice.id,
            lang = %voice.lang,
            "Initializing Piper backend"
        );

        let jobs = spawn_synth_thread(config_path)?;
        Ok(Self {
            model_path,
            cache_dir,
            voice,
            jobs,
            current: None,
        })
    }

    fn stop_current(&mut self) {
        if let Some(worker) = self.current.take() {
            worker.cancel.cancel();
            if worker.handle.join().is_err() {
                warn!("Piper playback worker panicked");
            }
        }
    }
}

impl SpeechBackend for PiperBackend {
    fn voices(&self) -> Vec<Voice> {
        vec![self.voice.clone()]
    }

    fn speak(&mut self, utterance: Utterance, sink: UtteranceSink) -> Result<(), PlaybackError> {
        self.stop_current();
        let rate = utterance.rate.unwrap_or(1.0);
        let path = cache_path(&self.cache_dir, &self.model_path, &utterance, rate);
        let job = PlaybackJob {
            output_config: output_config(rate, utterance.pitch),
            text: utterance.text,
            path,
            jobs: self.jobs.clone(),
        };

        let cancel = CancellationToken::new();
        let paused = Arc::new(AtomicBool::new(false));
        let worker_cancel = cancel.clone();
        let worker_paused = Arc::clone(&paused);
        let handle = thread::Builder::new()
            .name("piper-playback".to_string())
            .spawn(move || {
                if let Err(err) = job.run(&sink, &worker_paused, &worker_cancel) {
                    if !worker_cancel.is_cancelled() {
                        sink.failed(format!("{err:#}"));
                    }
                }
            })
            .map_err(|err| PlaybackError::Backend(format!("spawning playback worker: {err}")))?;

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

impl Drop for PiperBackend {
    fn drop(&mut self) {
        self.stop_current();
    }
}

struct PlaybackJob {
    text: String,
    path: PathBuf,
    output_config: Option<AudioOutputConfig>,
    jobs: Sender<SynthJob>,
}

impl PlaybackJob {
    fn run(
        mut self,
        sink: &UtteranceSink,
        paused: &AtomicBool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.path.exists() {
            self.synthesize(cancel)?;
        } else {
            debug!(path = %self.path.display(), "Using cached utterance audio");
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        let duration = clip_duration(&self.path);
        let (_stream, handle) = OutputStream::try_default().context("Opening audio output")?;
        let player = Sink::try_new(&handle).context("Creating sink")?;
        let reader = BufReader::new(File::open(&self.path)?);
        player.append(Decoder::new(reader).context("Decoding utterance audio")?);
        player.play();

        let total_chars = self.text.chars().count().max(1) as f64;
        let mut pending = word_starts(&self.text).into_iter().peekable();
        let mut elapsed = Duration::ZERO;
        let mut was_paused = false;
        loop {
            if cancel.is_cancelled() {
                player.stop();
                return Ok(());
            }
            let is_paused = paused.load(Ordering::Acquire);
            if is_paused != was_paused {
                if is_paused {
                    player.pause();
                } else {
                    player.play();
                }
                was_paused = is_paused;
            }
            while let Some(&offset) = pending.peek() {
                let due = duration.mul_f64(offset as f64 / total_chars);
                if due > elapsed {
                    break;
                }
                sink.boundary(offset);
                pending.next();
            }
            if player.empty() {
                break;
            }
            thread::sleep(WORKER_POLL);
            if !is_paused {
                elapsed += WORKER_POLL;
            }
        }
        for offset in pending {
            sink.boundary(offset);
        }
        sink.finished();
        Ok(())
    }

    fn synthesize(&mut self, cancel: &CancellationToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Creating TTS cache directory")?;
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.jobs
            .send(SynthJob {
                text: self.text.clone(),
                path: self.path.clone(),
                output_config: self.output_config.take(),
                reply: reply_tx,
            })
            .map_err(|_| anyhow::anyhow!("Piper synthesis thread has stopped"))?;
        loop {
            match reply_rx.recv_timeout(WORKER_POLL) {
                Ok(result) => return result.map_err(|err| anyhow::anyhow!(err)),
                Err(RecvTimeoutError::Timeout) if cancel.is_cancelled() => return Ok(()),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    anyhow::bail!("Piper synthesis thread has stopped")
                }
            }
        }
    }
}

fn spawn_synth_thread(config_path: PathBuf) -> Result<Sender<SynthJob>> {
    let (jobs_tx, jobs_rx) = mpsc::channel::<SynthJob>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
    thread::Builder::new()
        .name("piper-synth".to_string())
        .spawn(move || {
            let piper = match from_config_path(&config_path)
                .context("Loading Piper model")
                .and_then(|model| {
                    PiperSpeechSynthesizer::new(model).context("Preparing Piper synthesizer")
                }) {
                Ok(piper) => {
                    let _ = ready_tx.send(Ok(()));
                    piper
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(format!("{err:#}")));
                    return;
                }
            };
            run_synth_loop(&piper, jobs_rx);
        })
        .context("Spawning Piper synthesis thread")?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(jobs_tx),
        Ok(Err(err)) => Err(anyhow::anyhow!(err)),
        Err(_) => Err(anyhow::anyhow!("Piper synthesis thread exited during startup")),
    }
}

fn run_synth_loop(piper: &PiperSpeechSynthesizer, jobs: Receiver<SynthJob>) {
    for job in jobs {
        debug!(
            path = %job.path.display(),
            chars = job.text.chars().count(),
            "Synthesizing chunk with Piper"
        );
        let partial = partial_path(&job.path);
        let rendered = piper
            .synthesize_to_file(&partial, job.text, job.output_config)
            .map_err(|err| format!("Synthesizing audio: {err}"));
        let _ = job.reply.send(publish_render(&partial, &job.path, rendered));
    }
    debug!("Piper synthesis thread shutting down");
}

/// Scratch file a render is written to before it becomes a cache entry.
fn partial_path(path: &Path) -> PathBuf {
    path.with_extension("part.wav")
}

/// Move a finished render into place; a cache path only ever holds whole clips.
fn publish_render(
    partial: &Path,
    path: &Path,
    rendered: Result<(), String>,
) -> Result<(), String> {
    match rendered {
        Ok(()) => fs::rename(partial, path)
            .map_err(|err| format!("Storing audio at {}: {err}", path.display())),
        Err(err) => {
            let _ = fs::remove_file(partial);
            Err(err)
        }
    }
}

fn output_config(rate: f32, pitch: Option<f32>) -> Option<AudioOutputConfig> {
    let rate = ((rate - 1.0).abs() > f32::EPSILON).then(|| speed_to_rate_percent(rate));
    let pitch = pitch
        .filter(|pitch| (pitch - 1.0).abs() > f32::EPSILON)
        .map(pitch_to_percent);
    if rate.is_none() && pitch.is_none() {
        return None;
    }
    Some(AudioOutputConfig {
        rate,
        volume: None,
        pitch,
        appended_silence_ms: None,
    })
}

fn cache_path(base: &Path, model_path: &Path, utterance: &Utterance, rate: f32) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(model_path.as_os_str().to_string_lossy().as_bytes());
    hasher.update(utterance.text.as_bytes());
    hasher.update(rate.to_le_bytes());
    hasher.update(utterance.pitch.unwrap_or(1.0).to_le_bytes());
    let hash = format!("{:x}", hasher.finalize());
    base.join(format!("tts-{hash}.wav"))
}

fn clip_duration(path: &Path) -> Duration {
    match hound::WavReader::open(path) {
        Ok(reader) => {
            let spec = reader.spec();
            Duration::from_secs_f64(reader.duration() as f64 / f64::from(spec.sample_rate.max(1)))
        }
        Err(err) => {
            warn!(path = %path.display(), "Could not read clip duration: {err}");
            Duration::from_secs(1)
        }
    }
}

/// Voice metadata from the model's `.onnx.json`.
fn voice_from_config(model_path: &Path, config_path: &Path) -> Voice {
    let id = model_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().trim_end_matches(".onnx").to_string())
        .unwrap_or_else(|| "piper".to_string());
    let parsed: Option<serde_json::Value> = fs::read_to_string(config_path)
        .ok()
        .and_then(|data| serde_json::from_str(&data).ok());
    let lang = parsed
        .as_ref()
        .and_then(|value| value.pointer("/language/code"))
        .and_then(|code| code.as_str())
        .map(|code| code.replace('_', "-"))
        .unwrap_or_else(|| "en".to_string());
    let name = parsed
        .as_ref()
        .and_then(|value| value.get("dataset"))
        .and_then(|name| name.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| id.clone());
    Voice::new(id, name, lang)
}

/// Piper expects the parent directory that contains `espeak-ng-data/phonindex`.
fn sanitize_espeak_root(path: PathBuf) -> PathBuf {
    if path
        .file_name()
        .map(|n| n == "espeak-ng-data")
        .unwrap_or(false)
    {
        if let Some(parent) = path.parent() {
            debug!(
                original = %path.display(),
                sanitized = %parent.display(),
                "Trimming espeak-ng-data suffix"
            );
            return parent.to_path_buf();
        }
    }
    path
}

fn resolve_piper_config(model_path: &Path) -> PathBuf {
    if model_path
        .extension()
        .map(|ext| ext == "onnx")
        .unwrap_or(false)
    {
        return model_path.with_extension("onnx.json");
    }
    model_path.to_path_buf()
}

fn speed_to_rate_percent(speed: f32) -> u8 {
    let clamped = speed.clamp(0.5, 5.5);
    let percent = ((clamped - 0.5) / 5.0) * 100.0;
    percent.round().clamp(0.0, 100.0) as u8
}

fn pitch_to_percent(pitch: f32) -> u8 {
    (pitch.clamp(0.0, 2.0) * 50.0).round() as u8
}
