//! Entry point for the PDF narrator.
//!
//! Responsibilities here are intentionally minimal:
//! - Parse command-line arguments.
//! - Load user configuration from `conf/config.toml` (or `--config`).
//! - Dispatch to extraction, narration, library or config commands.

mod cli;
mod narration;
mod speech;

use crate::cli::{Cli, Commands, ConfigCommands, LibraryCommands, VoiceArgs};
use crate::narration::{Interrupt, narrate};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use narrator_core::config::{AppConfig, load_config, serialize_config};
use narrator_core::{
    ExtractionOutcome, LibraryStore, PdfDocument, ProgressUpdate, document_id, extract_document,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

const EMPTY_DOCUMENT_MESSAGE: &str = "No extractable text found";

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config);
    cli.apply_overrides(&mut config);
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        config = %cli.config.display(),
        level = %config.log_level,
        backend = %config.tts_backend,
        "Starting PDF narrator"
    );

    match cli.command {
        Commands::Extract { file, json, output } => {
            let interrupt = Interrupt::install()?;
            extract_command(&file, json, output.as_deref(), &config, &interrupt)
        }
        Commands::Read { file, voice } => {
            let interrupt = Interrupt::install()?;
            let bytes = fs::read(&file).with_context(|| format!("Reading {}", file.display()))?;
            read_command(&bytes, voice, config, &interrupt)
        }
        Commands::Voices => voices_command(&config),
        Commands::Library { command } => library_command(command, config),
        Commands::Config {
            command: ConfigCommands::Init { path, force },
        } => config_init_command(path.unwrap_or(cli.config), force),
    }
}

#[derive(Serialize)]
struct ExtractSummary<'a> {
    title: Option<String>,
    pages: usize,
    chars: usize,
    text: &'a str,
}

fn extract_command(
    file: &Path,
    json: bool,
    output: Option<&Path>,
    config: &AppConfig,
    interrupt: &Interrupt,
) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("Reading {}", file.display()))?;
    let (document, outcome) = extract_bytes(&bytes, config, interrupt)?;
    let rendered = match &outcome {
        ExtractionOutcome::Empty { pages } => {
            info!(pages, "Nothing to print");
            println!("{EMPTY_DOCUMENT_MESSAGE}");
            return Ok(());
        }
        ExtractionOutcome::Text(extracted) if json => {
            let summary = ExtractSummary {
                title: document.title(),
                pages: extracted.pages.len(),
                chars: extracted.char_count(),
                text: &extracted.text,
            };
            serde_json::to_string_pretty(&summary).context("Serializing extraction summary")?
        }
        ExtractionOutcome::Text(extracted) => extracted.text.clone(),
    };

    match output {
        Some(path) => {
            fs::write(path, rendered.as_bytes())
                .with_context(|| format!("Writing {}", path.display()))?;
            info!(path = %path.display(), "Wrote extracted text");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn extract_bytes(
    bytes: &[u8],
    config: &AppConfig,
    interrupt: &Interrupt,
) -> Result<(PdfDocument, ExtractionOutcome)> {
    let document = PdfDocument::load_mem(bytes)?
        .with_compatibility_folding(config.fold_compatibility_forms);
    let mut report = |update: ProgressUpdate| {
        debug!(page = update.page, total = update.total, "Extraction progress");
    };
    let outcome = extract_document(
        &document,
        &config.extraction_options(),
        Some(&mut report),
        Some(interrupt.token()),
    )?;
    Ok((document, outcome))
}

fn read_command(
    bytes: &[u8],
    voice: VoiceArgs,
    mut config: AppConfig,
    interrupt: &Interrupt,
) -> Result<()> {
    voice.apply_to(&mut config);
    let (document, outcome) = extract_bytes(bytes, &config, interrupt)?;
    let ExtractionOutcome::Text(extracted) = outcome else {
        println!("{EMPTY_DOCUMENT_MESSAGE}");
        return Ok(());
    };
    if let Some(title) = document.title() {
        println!("{title}");
    }
    let backend = speech::build_backend(&config)?;
    narrate(&extracted.text, &config, backend, interrupt)
}

fn voices_command(config: &AppConfig) -> Result<()> {
    let backend = speech::build_backend(config)?;
    let voices = backend.voices();
    if voices.is_empty() {
        warn!(backend = %config.tts_backend, "Backend reports no voices");
    }
    for voice in voices {
        println!("{}\t{}\t{}", voice.id, voice.lang, voice.name);
    }
    Ok(())
}

fn library_command(command: LibraryCommands, config: AppConfig) -> Result<()> {
    let store = LibraryStore::open(&config.library_dir)?;
    match command {
        LibraryCommands::Add { file, name } => {
            let bytes = fs::read(&file).with_context(|| format!("Reading {}", file.display()))?;
            let name = name
                .or_else(|| {
                    file.file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .unwrap_or_else(|| "document.pdf".to_string());
            let meta = store.save(&document_id(&bytes), &name, &bytes)?;
            println!("{}\t{}", meta.id, meta.name);
        }
        LibraryCommands::List => {
            for meta in store.list()? {
                println!(
                    "{}\t{}\t{} bytes\t{}",
                    meta.id, meta.name, meta.size, meta.created_at
                );
            }
        }
        LibraryCommands::Remove { id } => {
            if !store.delete(&id)? {
                return Err(anyhow!("No document with id {id}"));
            }
        }
        LibraryCommands::Read { id, voice } => {
            let meta = store
                .meta(&id)?
                .ok_or_else(|| anyhow!("No document with id {id}"))?;
            info!(id = %meta.id, name = %meta.name, size = meta.size, "Reading stored document");
            let bytes = store
                .get(&id)?
                .ok_or_else(|| anyhow!("Stored file for {id} is missing"))?;
            let interrupt = Interrupt::install()?;
            read_command(&bytes, voice, config, &interrupt)?;
        }
    }
    Ok(())
}

fn config_init_command(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists; pass --force to overwrite",
            path.display()
        ));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Creating {}", parent.display()))?;
    }
    let contents = serialize_config(&AppConfig::default())?;
    fs::write(&path, contents).with_context(|| format!("Writing {}", path.display()))?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    debug!("Logging initialized; override level with config.log_level or RUST_LOG");
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        debug!(%level, "Applied log level from config");
    }
}
