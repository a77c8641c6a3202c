//! Output types produced by the converter.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The result of processing one page.
///
/// Built once after the page has been rendered, extracted and described;
/// the assembler consumes it when writing the document's Markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    /// Markdown description of the page, as returned by the model (or cache).
    pub content: String,
    /// Rendered PNG of the page.
    pub page_image: PathBuf,
    /// 1-based page index within the source document.
    pub page: usize,
    /// File name of the source document, e.g. `manual.pdf`.
    pub source: String,
}

/// Counters for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    /// Pages in the PDF.
    pub total_pages: usize,
    /// Pages selected for conversion.
    pub selected_pages: usize,
    /// Pages whose description came from a model call.
    pub described_pages: usize,
    /// Pages whose description was served from the working directory.
    pub cached_pages: usize,
    /// Pages left out under `PageFailurePolicy::Skip`.
    pub failed_pages: usize,
    /// Wall-clock time for the document.
    pub duration_ms: u64,
}

/// A successfully converted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutput {
    /// Source PDF.
    pub source: PathBuf,
    /// Written Markdown file (`<stem>.md` in the output directory).
    pub markdown_path: PathBuf,
    /// Per-document cache directory (`<stem>_pages/`).
    pub pages_dir: PathBuf,
    /// Page results in page order.
    pub pages: Vec<PageResult>,
    /// Pages skipped under `PageFailurePolicy::Skip`.
    pub failed_pages: Vec<PageError>,
    pub stats: DocumentStats,
}

/// Result of [`crate::inspect`]: what is known about a PDF without converting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub source: PathBuf,
    pub page_count: usize,
}

/// Outcome of one document inside a directory batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Converted {
        source: PathBuf,
        markdown_path: PathBuf,
        stats: DocumentStats,
    },
    Failed {
        source: PathBuf,
        error: String,
    },
}

impl DocumentOutcome {
    pub fn source(&self) -> &PathBuf {
        match self {
            DocumentOutcome::Converted { source, .. } | DocumentOutcome::Failed { source, .. } => {
                source
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DocumentOutcome::Converted { .. })
    }
}

/// Result of [`crate::Converter::convert_directory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// One entry per `*.pdf` found, in file-name order.
    pub documents: Vec<DocumentOutcome>,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.documents.iter().filter(|d| d.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.documents.len() - self.succeeded()
    }
}
