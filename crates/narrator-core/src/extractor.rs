//! Document-level text extraction.
//!
//! Walks the pages of a [`DocumentSource`] one at a time, rebuilds lines from
//! positioned fragments, repairs hyphenation and joins everything into one
//! text stream with a blank line between pages. Pages are never reordered.

use crate::cancellation::CancellationToken;
use crate::error::ExtractionError;
use crate::layout::{DEFAULT_SAME_LINE_TOLERANCE, TextFragment, reconstruct_lines};
use crate::paragraph::join_page;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const PAGE_SEPARATOR: &str = "\n\n";

/// Anything that can hand out positioned text per page.
pub trait DocumentSource {
    fn page_count(&self) -> usize;

    /// Fragments of page `page` (1-based), in backend order.
    fn page_fragments(&self, page: usize) -> Result<Vec<TextFragment>, ExtractionError>;
}

/// What to do when a single page cannot be read.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PageFailurePolicy {
    /// Fail the whole extraction.
    #[default]
    Abort,
    /// Substitute empty text for the page and carry on.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionOptions {
    pub same_line_tolerance: f32,
    pub merge_hyphenation: bool,
    pub page_failure_policy: PageFailurePolicy,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            same_line_tolerance: DEFAULT_SAME_LINE_TOLERANCE,
            merge_hyphenation: true,
            page_failure_policy: PageFailurePolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub page: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedText {
    pub pages: Vec<String>,
    pub text: String,
}

impl ExtractedText {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Successful extraction result. `Empty` means the document parsed but holds
/// no extractable characters, e.g. a scanned image-only file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Text(ExtractedText),
    Empty { pages: usize },
}

impl ExtractionOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            ExtractionOutcome::Text(extracted) => Some(&extracted.text),
            ExtractionOutcome::Empty { .. } => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ExtractionOutcome::Empty { .. })
    }
}

/// Rebuild the text of one page from its fragments.
pub fn page_text(fragments: &[TextFragment], options: &ExtractionOptions) -> String {
    let lines: Vec<String> = reconstruct_lines(fragments, options.same_line_tolerance)
        .into_iter()
        .map(|line| line.text)
        .collect();
    join_page(&lines, options.merge_hyphenation)
}

pub fn extract_document(
    source: &dyn DocumentSource,
    options: &ExtractionOptions,
    mut progress: Option<&mut dyn FnMut(ProgressUpdate)>,
    cancel: Option<&CancellationToken>,
) -> Result<ExtractionOutcome, ExtractionError> {
    let total = source.page_count();
    info!(pages = total, "Extracting document text");

    let mut pages = Vec::with_capacity(total);
    for page in 1..=total {
        if let Some(token) = cancel {
            token.check_cancelled("extract_page")?;
        }
        let text = match source.page_fragments(page) {
            Ok(fragments) => {
                let text = page_text(&fragments, options);
                debug!(
                    page,
                    fragments = fragments.len(),
                    chars = text.chars().count(),
                    "Extracted page"
                );
                text
            }
            Err(err) => match options.page_failure_policy {
                PageFailurePolicy::Abort => return Err(err),
                PageFailurePolicy::Skip => {
                    warn!(page, "Skipping unreadable page: {err}");
                    String::new()
                }
            },
        };
        pages.push(text);
        if let Some(report) = progress.as_mut() {
            report(ProgressUpdate { page, total });
        }
    }

    let text = pages.join(PAGE_SEPARATOR);
    if text.trim().is_empty() {
        info!(pages = total, "Document has no extractable text");
        return Ok(ExtractionOutcome::Empty { pages: total });
    }
    let extracted = ExtractedText { pages, text };
    info!(
        pages = total,
        total_chars = extracted.char_count(),
        "Finished extracting document text"
    );
    Ok(ExtractionOutcome::Text(extracted))
}
