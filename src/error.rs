//! Error types for the pdf2md-vision library.
//!
//! Two error types mirror the two failure scopes of a batch run:
//!
//! * [`Pdf2MdError`]: **document-fatal**: the document cannot be finished
//!   (unreadable PDF, page render failed, the model returned nothing).
//!   Returned as `Err(Pdf2MdError)` from [`crate::Converter::convert_document`]
//!   and recorded per document by [`crate::Converter::convert_directory`],
//!   which then moves on to the next file.
//!
//! * [`PageError`]: **page-scoped**: one page failed while the converter runs
//!   with [`crate::config::PageFailurePolicy::Skip`]. Stored in
//!   [`crate::output::DocumentOutput::failed_pages`] so callers can see which
//!   pages are missing from the written Markdown.
//!
//! Text and table extraction failures ([`Pdf2MdError::Extraction`]) never
//! reach the caller: [`crate::pipeline::extract`] logs them and continues
//! with an empty result.

use std::path::PathBuf;
use thiserror::Error;

/// All document-fatal errors returned by the library.
#[derive(Debug, Error)]
pub enum Pdf2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The PDF could not be opened or parsed.
    #[error("Failed to read PDF '{path}': {detail}")]
    DocumentRead { path: PathBuf, detail: String },

    /// The input directory could not be listed.
    #[error("Cannot read input directory '{path}': {source}")]
    InputDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An earlier document in the batch already uses this output name.
    #[error("'{path}' would overwrite the output of '{first}' (same file stem); skipped")]
    DuplicateDocumentName { path: PathBuf, first: PathBuf },

    /// Every selected page index lies outside the document.
    #[error("No selected page is in range (document has {total} pages)")]
    PageOutOfRange { total: usize },

    // ── Rasterisation errors ──────────────────────────────────────────────
    /// The external renderer exited non-zero, could not be spawned or timed out.
    #[error("Rendering failed for page {page}: {detail}\nIs poppler-utils (pdftocairo) installed?")]
    RenderingFailed { page: usize, detail: String },

    /// The renderer succeeded but no `page_N-*.png` file appeared.
    #[error("Expected PNG file not found for page {page} in '{dir}'")]
    MissingRenderOutput { page: usize, dir: PathBuf },

    /// The rendered image could not be read back for the model request.
    #[error("Failed to load page image '{path}': {detail}")]
    ImageLoad { path: PathBuf, detail: String },

    /// Text or table extraction failed for a page.
    #[error("Extraction failed for page {page}: {detail}")]
    Extraction { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The provider returned an error for the page request.
    #[error("LLM API error on page {page}: {message}")]
    LlmApiError { page: usize, message: String },

    /// The model answered with no usable content.
    #[error("Received empty content from the model for page {page}")]
    EmptyResponse { page: usize },

    /// The model call did not finish within `api_timeout_secs`.
    #[error("API call timed out after {secs}s on page {page}")]
    ApiTimeout { page: usize, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A cache entry could not be read or written.
    #[error("Cache I/O failed for '{path}': {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The working directory could not be prepared.
    #[error("Failed to prepare working directory '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2MdError {
    /// The 1-based page this error is attached to, if any.
    pub fn page(&self) -> Option<usize> {
        match self {
            Pdf2MdError::RenderingFailed { page, .. }
            | Pdf2MdError::MissingRenderOutput { page, .. }
            | Pdf2MdError::Extraction { page, .. }
            | Pdf2MdError::LlmApiError { page, .. }
            | Pdf2MdError::EmptyResponse { page }
            | Pdf2MdError::ApiTimeout { page, .. } => Some(*page),
            _ => None,
        }
    }
}

/// A page that was skipped under [`crate::config::PageFailurePolicy::Skip`].
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page image could not be produced.
    #[error("Page {page}: rendering failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The model call failed or returned nothing.
    #[error("Page {page}: description failed: {detail}")]
    DescribeFailed { page: usize, detail: String },

    /// Any other failure while processing the page.
    #[error("Page {page}: {detail}")]
    Other { page: usize, detail: String },
}

impl PageError {
    /// Classify a document-level error raised while processing `page`.
    pub fn from_error(page: usize, err: &Pdf2MdError) -> Self {
        let detail = err.to_string();
        match err {
            Pdf2MdError::RenderingFailed { .. }
            | Pdf2MdError::MissingRenderOutput { .. }
            | Pdf2MdError::ImageLoad { .. } => PageError::RenderFailed { page, detail },
            Pdf2MdError::LlmApiError { .. }
            | Pdf2MdError::EmptyResponse { .. }
            | Pdf2MdError::ApiTimeout { .. } => PageError::DescribeFailed { page, detail },
            _ => PageError::Other { page, detail },
        }
    }

    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::DescribeFailed { page, .. }
            | PageError::Other { page, .. } => *page,
        }
    }
}
