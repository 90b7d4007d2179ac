//! Command-line definition.

use clap::{Args, Parser, Subcommand};
use narrator_core::config::{AppConfig, LogLevel};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "conf/config.toml";

#[derive(Debug, Parser)]
#[command(name = "pdf-narrator")]
#[command(about = "Extract readable text from PDFs and read it aloud", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Override the maximum characters per spoken chunk
    #[arg(long, global = true)]
    pub max_chunk_chars: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the reconstructed text of a PDF
    Extract {
        file: PathBuf,

        /// Print a JSON summary instead of plain text
        #[arg(long)]
        json: bool,

        /// Write output to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read a PDF aloud, highlighting the current word
    Read {
        file: PathBuf,

        #[command(flatten)]
        voice: VoiceArgs,
    },

    /// List voices offered by the configured speech backend
    Voices,

    /// Manage stored documents
    Library {
        #[command(subcommand)]
        command: LibraryCommands,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum LibraryCommands {
    /// Store a PDF in the library
    Add {
        file: PathBuf,

        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// List stored documents, newest first
    List,

    /// Delete a stored document
    Remove { id: String },

    /// Read a stored document aloud
    Read {
        id: String,

        #[command(flatten)]
        voice: VoiceArgs,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Write the default configuration
    Init {
        path: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct VoiceArgs {
    /// Voice id
    #[arg(long)]
    pub voice: Option<String>,

    /// Language tag used when no voice id matches, e.g. `en` or `de-DE`
    #[arg(long)]
    pub lang: Option<String>,

    /// Speech rate, 0.5 to 2.0
    #[arg(long)]
    pub rate: Option<f32>,

    /// Speech pitch, 0.0 to 2.0
    #[arg(long)]
    pub pitch: Option<f32>,
}

impl Cli {
    /// Fold the global flags into a loaded config.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(max) = self.max_chunk_chars {
            config.max_chunk_chars = max;
        }
    }
}

impl VoiceArgs {
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(voice) = &self.voice {
            config.tts_voice = Some(voice.clone());
        }
        if let Some(lang) = &self.lang {
            config.tts_lang = Some(lang.clone());
        }
        if let Some(rate) = self.rate {
            config.tts_rate = Some(rate);
        }
        if let Some(pitch) = self.pitch {
            config.tts_pitch = Some(pitch);
        }
    }
}
