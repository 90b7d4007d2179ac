//! Error taxonomy shared by extraction and playback.
//!
//! An empty document is deliberately absent here: it is a successful
//! extraction reported as [`crate::extractor::ExtractionOutcome::Empty`].

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// The source bytes could not be parsed as a document.
    #[error("failed to load document: {0}")]
    Load(String),
    /// A page's content stream could not be read.
    #[error("failed to extract page {page}: {reason}")]
    Page { page: usize, reason: String },
    #[error("extraction cancelled")]
    Cancelled,
}

impl From<lopdf::Error> for ExtractionError {
    fn from(err: lopdf::Error) -> Self {
        ExtractionError::Load(err.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    /// No speech backend, or no voice could be resolved. Raised before any
    /// utterance is issued.
    #[error("speech backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("speech backend error: {0}")]
    Backend(String),
}
