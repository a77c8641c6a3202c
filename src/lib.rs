//! # pdf2md-vision
//!
//! Convert directories of PDF documents to Markdown with a vision language
//! model.
//!
//! Text layers lose figures and mangle tables; images alone make the model
//! guess at small print. Each page is therefore sent as all three: the
//! rendered image, the raw text, and the tables a detector found. The model
//! answers with one Markdown description per page, and the pages are joined
//! into a single `.md` file per PDF.
//!
//! ## Pipeline
//!
//! ```text
//! name.pdf
//!  │
//!  ├─ 1. Render    page → PNG via pdftocairo          (name_pages/page_N-*.png)
//!  ├─ 2. Extract   text via pdfium, tables via camelot (page_text_N.txt, page_tables_N.txt)
//!  ├─ 3. Describe  image + text + tables → vision LLM (page_description_N.txt)
//!  └─ 4. Assemble  strip fences, add page footers     (name.md)
//! ```
//!
//! Every intermediate file is a cache entry: a rerun reuses whatever exists
//! and only does the missing work, so an interrupted batch resumes where it
//! stopped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2md_vision::{ConversionConfig, Converter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY and friends.
//!     let converter = Converter::from_config(ConversionConfig::default())?;
//!     let report = converter.convert_directory("papers/", "markdown/").await?;
//!     eprintln!("{} converted, {} failed", report.succeeded(), report.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## External tools
//!
//! | Tool | Used for | Required |
//! |------|----------|----------|
//! | `pdftocairo` (poppler-utils) | page images | yes |
//! | pdfium shared library | page count, text layer | yes |
//! | Python 3 with `camelot-py` | tables | no; disable with `extract_tables(false)` |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md` binary (clap, indicatif, anyhow, tracing-subscriber, dotenvy) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{ArtifactCache, ArtifactKey, ArtifactKind, FsArtifactCache, MemoryArtifactCache};
pub use config::{ConversionConfig, ConversionConfigBuilder, PageFailurePolicy, PageSelection};
pub use convert::{inspect, Converter};
pub use error::{PageError, Pdf2MdError};
pub use output::{BatchReport, DocumentInfo, DocumentOutcome, DocumentOutput, DocumentStats, PageResult};
pub use pipeline::extract::{PdfReader, Table, TableExtractor};
pub use pipeline::llm::{PageDescriber, PageDescriptionRequest};
pub use pipeline::render::PageRasterizer;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, PageStream};
