//! Configuration types for PDF-to-Markdown conversion.
//!
//! Everything the pipeline needs to know is collected in [`ConversionConfig`]
//! and fixed when a [`crate::Converter`] is constructed. Nothing is read from
//! global state afterwards; the only environment lookups (API keys, provider
//! overrides, `PDFIUM_LIB_PATH`) happen once, inside
//! [`crate::Converter::from_config`].

use crate::error::Pdf2MdError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a conversion run.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2md_vision::{ConversionConfig, PageFailurePolicy};
///
/// let config = ConversionConfig::builder()
///     .work_dir("/tmp/pdf2md-work")
///     .dpi(150)
///     .model("gpt-4.1")
///     .page_failure(PageFailurePolicy::Skip)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Root of the per-document `name_pages/` cache directories.
    ///
    /// `None` means "use the output directory", which keeps images and cached
    /// text next to the Markdown they produced.
    pub work_dir: Option<PathBuf>,

    /// Rendering DPI passed to `pdftocairo -r`. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest rendered edge in pixels (`pdftocairo -scale-to`). Default: None.
    ///
    /// When set it replaces the DPI-derived size, which keeps oversized pages
    /// (posters, drawings) within vision API upload limits.
    pub max_rendered_pixels: Option<u32>,

    /// Renderer executable. Default: `pdftocairo`.
    pub pdftocairo_path: PathBuf,

    /// Python interpreter used to drive camelot. Default: `python3`.
    pub python_exe: PathBuf,

    /// Run table extraction. Default: true.
    pub extract_tables: bool,

    /// Explicit pdfium library directory. Falls back to `PDFIUM_LIB_PATH`,
    /// then the working directory, then the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// LLM model identifier, e.g. "gpt-4.1", "gpt-4o".
    /// If None, uses [`crate::convert::DEFAULT_MODEL`] (`gpt-4.1-mini`) for a
    /// named provider or an `OPENAI_API_KEY` setup, otherwise the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 (deterministic transcription).
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    ///
    /// A dense page with tables and figure descriptions easily exceeds 2 000
    /// tokens; too low a budget truncates the description mid-sentence.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses [`crate::prompts::SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// What a failed page does to its document. Default: abort.
    pub page_failure: PageFailurePolicy,

    /// Documents converted at once by the directory driver. Default: 1.
    ///
    /// Pages inside a document are always sequential.
    pub document_concurrency: usize,

    /// Per-page model call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Per-page `pdftocairo` timeout in seconds. Default: 120.
    pub render_timeout_secs: u64,

    /// Per-page camelot timeout in seconds. Default: 300.
    pub table_timeout_secs: u64,

    /// Optional observer for per-page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            dpi: 150,
            max_rendered_pixels: None,
            pdftocairo_path: PathBuf::from("pdftocairo"),
            python_exe: PathBuf::from("python3"),
            extract_tables: true,
            pdfium_lib_path: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            system_prompt: None,
            pages: PageSelection::default(),
            page_failure: PageFailurePolicy::default(),
            document_concurrency: 1,
            api_timeout_secs: 120,
            render_timeout_secs: 120,
            table_timeout_secs: 300,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("work_dir", &self.work_dir)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pdftocairo_path", &self.pdftocairo_path)
            .field("python_exe", &self.python_exe)
            .field("extract_tables", &self.extract_tables)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("pages", &self.pages)
            .field("page_failure", &self.page_failure)
            .field("document_concurrency", &self.document_concurrency)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = Some(px.max(100));
        self
    }

    pub fn pdftocairo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdftocairo_path = path.into();
        self
    }

    pub fn python_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.python_exe = path.into();
        self
    }

    pub fn extract_tables(mut self, v: bool) -> Self {
        self.config.extract_tables = v;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn page_failure(mut self, policy: PageFailurePolicy) -> Self {
        self.config.page_failure = policy;
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs;
        self
    }

    pub fn table_timeout_secs(mut self, secs: u64) -> Self {
        self.config.table_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2MdError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_tokens == 0 {
            return Err(Pdf2MdError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 || c.render_timeout_secs == 0 || c.table_timeout_secs == 0 {
            return Err(Pdf2MdError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.pdftocairo_path.as_os_str().is_empty() {
            return Err(Pdf2MdError::InvalidConfig(
                "pdftocairo path must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What happens to a document when one of its pages fails.
///
/// A page can fail to render (`pdftocairo` error, no PNG produced) or to be
/// described (API error, timeout, empty response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageFailurePolicy {
    /// Stop the document at the first failed page; no Markdown is written.
    /// Other documents in a batch are unaffected. (default)
    #[default]
    Abort,
    /// Log the failure, leave the page out of the Markdown and continue.
    Skip,
}

/// Specifies which pages of the PDF to convert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 1-indexed
    /// page numbers that exist in a document of `total_pages` pages.
    pub fn to_page_numbers(&self, total_pages: usize) -> Vec<usize> {
        let mut pages: Vec<usize> = match self {
            PageSelection::All => (1..=total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![*p]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1);
                let e = (*end).min(total_pages);
                (s..=e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .copied()
                .filter(|&p| p >= 1 && p <= total_pages)
                .collect(),
        };
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}
