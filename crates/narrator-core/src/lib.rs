//! Core of the PDF narrator: turns positioned page text into a clean reading
//! stream and speaks it chunk by chunk with a live cursor.

pub mod cancellation;
pub mod chunking;
pub mod config;
pub mod error;
pub mod extractor;
pub mod highlight;
pub mod layout;
pub mod library;
pub mod normalizer;
pub mod paragraph;
pub mod pdf;
pub mod playback;

pub use cancellation::{CancellationToken, Generation};
pub use chunking::{ChunkingOptions, SpeechChunk, split_into_chunks};
pub use error::{ExtractionError, PlaybackError};
pub use extractor::{
    DocumentSource, ExtractedText, ExtractionOptions, ExtractionOutcome, PageFailurePolicy,
    ProgressUpdate, extract_document,
};
pub use highlight::{Highlight, highlight_word};
pub use layout::{Line, TextFragment, reconstruct_lines};
pub use library::{LibraryStore, StoredDocumentMeta, document_id};
pub use pdf::PdfDocument;
pub use playback::{
    PlaybackEvent, PlaybackSession, PlaybackState, SessionHandle, SpeechBackend, Utterance,
    UtteranceSink, Voice,
};
