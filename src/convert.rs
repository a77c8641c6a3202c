//! Document and directory conversion.
//!
//! A [`Converter`] owns the four collaborators (PDF reader, rasteriser,
//! table extractor, describer) plus an optional cache override, all behind
//! traits. [`Converter::from_config`] wires up the real ones; tests swap
//! any of them with `with_*`.
//!
//! ## Per page
//!
//! ```text
//! rasterise ──▶ description cached? ──yes──▶ PageResult
//!                        │ no
//!                        ▼
//!        extract text + tables (cached) ──▶ encode image ──▶ describe ──▶ store
//! ```
//!
//! Pages run strictly in order. The document's Markdown is written only
//! after the last page, through a temporary file and a rename.

use crate::cache::{cached, pages_dir_name, ArtifactCache, ArtifactKey, ArtifactKind, FsArtifactCache};
use crate::config::{ConversionConfig, PageFailurePolicy, PageSelection};
use crate::error::{PageError, Pdf2MdError};
use crate::output::{BatchReport, DocumentInfo, DocumentOutcome, DocumentOutput, DocumentStats, PageResult};
use crate::pipeline::encode::load_page_image;
use crate::pipeline::extract::{
    extract_page_content, CamelotTableExtractor, NoTableExtractor, PdfReader, PdfiumReader,
    TableExtractor,
};
use crate::pipeline::llm::{validate_description, PageDescriber, PageDescriptionRequest, VisionDescriber};
use crate::pipeline::postprocess::assemble;
use crate::pipeline::render::{PageRasterizer, PdftocairoRasterizer};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::collections::hash_map::{Entry, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Converts PDFs to Markdown.
///
/// Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct Converter {
    config: Arc<ConversionConfig>,
    reader: Arc<dyn PdfReader>,
    rasterizer: Arc<dyn PageRasterizer>,
    tables: Arc<dyn TableExtractor>,
    describer: Arc<dyn PageDescriber>,
    cache: Option<Arc<dyn ArtifactCache>>,
}

/// Identity of the document being converted, shared by its pages.
#[derive(Debug, Clone)]
pub(crate) struct DocumentContext {
    pub pdf_path: PathBuf,
    /// File name, e.g. `manual.pdf`.
    pub source: String,
    /// File stem, e.g. `manual`; the cache key and output name.
    pub stem: String,
    /// `<work root>/<stem>_pages`
    pub pages_dir: PathBuf,
}

impl Converter {
    /// Converter with the real reader, rasteriser and table extractor taken
    /// from `config`, describing pages with `describer`.
    pub fn new(config: ConversionConfig, describer: Arc<dyn PageDescriber>) -> Self {
        let reader = PdfiumReader::new(pdfium_lib_dir(&config));
        let rasterizer = PdftocairoRasterizer::from_config(&config);
        let tables: Arc<dyn TableExtractor> = if config.extract_tables {
            Arc::new(CamelotTableExtractor::new(
                config.python_exe.clone(),
                Duration::from_secs(config.table_timeout_secs),
            ))
        } else {
            Arc::new(NoTableExtractor)
        };

        Self {
            config: Arc::new(config),
            reader: Arc::new(reader),
            rasterizer: Arc::new(rasterizer),
            tables,
            describer,
            cache: None,
        }
    }

    /// Converter using the LLM provider resolved from `config` and the
    /// environment.
    pub fn from_config(config: ConversionConfig) -> Result<Self, Pdf2MdError> {
        let provider = resolve_provider(&config)?;
        let describer = VisionDescriber::from_config(provider, &config);
        Ok(Self::new(config, Arc::new(describer)))
    }

    pub fn with_reader(mut self, reader: Arc<dyn PdfReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_table_extractor(mut self, tables: Arc<dyn TableExtractor>) -> Self {
        self.tables = tables;
        self
    }

    /// Store text artefacts in `cache` instead of the working directory.
    /// Page images are still written to `<work root>/<stem>_pages/`.
    pub fn with_cache(mut self, cache: Arc<dyn ArtifactCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Where `<stem>_pages/` directories go for a run writing to `output_dir`.
    pub fn work_root(&self, output_dir: &Path) -> PathBuf {
        self.config
            .work_dir
            .clone()
            .unwrap_or_else(|| output_dir.to_path_buf())
    }

    pub(crate) fn cache_for(&self, work_root: &Path) -> Arc<dyn ArtifactCache> {
        match &self.cache {
            Some(cache) => Arc::clone(cache),
            None => Arc::new(FsArtifactCache::new(work_root)),
        }
    }

    /// Open `pdf_path`, select its pages and create its pages directory.
    pub(crate) async fn open_document(
        &self,
        pdf_path: &Path,
        work_root: &Path,
    ) -> Result<(DocumentContext, usize, Vec<usize>), Pdf2MdError> {
        let total_pages = self.reader.page_count(pdf_path).await?;
        let pages = self.config.pages.to_page_numbers(total_pages);
        if pages.is_empty() && !matches!(self.config.pages, PageSelection::All) {
            return Err(Pdf2MdError::PageOutOfRange { total: total_pages });
        }

        let stem = document_stem(pdf_path);
        let source = pdf_path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| stem.clone());
        let pages_dir = work_root.join(pages_dir_name(&stem));

        tokio::fs::create_dir_all(&pages_dir)
            .await
            .map_err(|e| Pdf2MdError::WorkDir {
                path: pages_dir.clone(),
                source: e,
            })?;

        let doc = DocumentContext {
            pdf_path: pdf_path.to_path_buf(),
            source,
            stem,
            pages_dir,
        };
        Ok((doc, total_pages, pages))
    }

    /// Rasterise, extract and describe one page.
    ///
    /// Returns the result and whether the description came from the cache.
    pub(crate) async fn process_page(
        &self,
        doc: &DocumentContext,
        page: usize,
        cache: &dyn ArtifactCache,
    ) -> Result<(PageResult, bool), Pdf2MdError> {
        let page_image = self
            .rasterizer
            .rasterize(&doc.pdf_path, page, &doc.pages_dir)
            .await?;

        let key = ArtifactKey::new(doc.stem.as_str(), page, ArtifactKind::Description);
        let description = cached(cache, &key, || {
            self.describe_page(doc, page, &page_image, cache, &key)
        })
        .await?;

        info!("Page data from page {} ready", page);
        Ok((
            PageResult {
                content: description.value,
                page_image,
                page,
                source: doc.source.clone(),
            },
            description.hit,
        ))
    }

    async fn describe_page(
        &self,
        doc: &DocumentContext,
        page: usize,
        page_image: &Path,
        cache: &dyn ArtifactCache,
        key: &ArtifactKey,
    ) -> Result<String, Pdf2MdError> {
        let content = extract_page_content(
            self.reader.as_ref(),
            self.tables.as_ref(),
            cache,
            &doc.pdf_path,
            key,
        )
        .await?;
        let image = load_page_image(page_image).await?;

        let request = PageDescriptionRequest {
            page,
            source: &doc.source,
            image,
            text: &content.text,
            tables_markdown: &content.tables_markdown,
        };
        let description = self.describer.describe(&request).await?;
        validate_description(page, description)
    }

    /// Convert one PDF into `<output_dir>/<stem>.md`.
    ///
    /// # Errors
    /// An unreadable PDF, any page failure under
    /// [`PageFailurePolicy::Abort`], or an I/O failure writing the output.
    /// Nothing is written to `output_dir` in those cases.
    pub async fn convert_document(
        &self,
        pdf_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<DocumentOutput, Pdf2MdError> {
        let pdf_path = pdf_path.as_ref();
        let result = self.convert_document_inner(pdf_path, output_dir.as_ref()).await;

        if let Some(cb) = &self.config.progress_callback {
            let source = pdf_path.to_string_lossy();
            match &result {
                Ok(_) => cb.on_document_complete(&source, None),
                Err(e) => cb.on_document_complete(&source, Some(&e.to_string())),
            }
        }
        result
    }

    async fn convert_document_inner(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<DocumentOutput, Pdf2MdError> {
        let start = Instant::now();
        info!("Converting {}", pdf_path.display());

        let work_root = self.work_root(output_dir);
        let (doc, total_pages, selected) = self.open_document(pdf_path, &work_root).await?;
        let cache = self.cache_for(&work_root);
        let cb = self.config.progress_callback.as_ref();
        let source_label = pdf_path.to_string_lossy();

        if let Some(cb) = cb {
            cb.on_document_start(&source_label, selected.len());
        }
        debug!("{}: {} of {} pages selected", doc.source, selected.len(), total_pages);

        let mut stats = DocumentStats {
            total_pages,
            selected_pages: selected.len(),
            ..Default::default()
        };
        let mut pages = Vec::with_capacity(selected.len());
        let mut failed_pages = Vec::new();

        for &page in &selected {
            if let Some(cb) = cb {
                cb.on_page_start(&source_label, page, total_pages);
            }

            match self.process_page(&doc, page, cache.as_ref()).await {
                Ok((result, hit)) => {
                    if hit {
                        stats.cached_pages += 1;
                    } else {
                        stats.described_pages += 1;
                    }
                    if let Some(cb) = cb {
                        cb.on_page_complete(&source_label, page, total_pages, hit);
                    }
                    pages.push(result);
                }
                Err(e) => {
                    if let Some(cb) = cb {
                        cb.on_page_error(&source_label, page, total_pages, &e.to_string());
                    }
                    match self.config.page_failure {
                        PageFailurePolicy::Abort => return Err(e),
                        PageFailurePolicy::Skip => {
                            warn!("{}: skipping page {}: {}", doc.source, page, e);
                            failed_pages.push(PageError::from_error(page, &e));
                        }
                    }
                }
            }
        }

        let markdown = assemble(&pages);
        let markdown_path = output_dir.join(format!("{}.md", doc.stem));
        write_atomic(&markdown_path, &markdown).await?;

        stats.failed_pages = failed_pages.len();
        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Wrote {} ({} pages, {} cached, {}ms)",
            markdown_path.display(),
            pages.len(),
            stats.cached_pages,
            stats.duration_ms
        );

        Ok(DocumentOutput {
            source: doc.pdf_path,
            markdown_path,
            pages_dir: doc.pages_dir,
            pages,
            failed_pages,
            stats,
        })
    }

    fn reject_duplicate(&self, pdf: &Path, first: PathBuf) -> Pdf2MdError {
        let err = Pdf2MdError::DuplicateDocumentName {
            path: pdf.to_path_buf(),
            first,
        };
        if let Some(cb) = &self.config.progress_callback {
            cb.on_document_complete(&pdf.to_string_lossy(), Some(&err.to_string()));
        }
        err
    }

    /// Convert every `*.pdf` directly inside `input_dir`.
    ///
    /// The working directory is prepared first (see [`prepare_work_dir`]).
    /// Each document runs in its own failure scope: a failure is logged and
    /// recorded in the report, and the batch carries on. Only an unusable
    /// input or working directory fails the whole call.
    pub async fn convert_directory(
        &self,
        input_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<BatchReport, Pdf2MdError> {
        let start = Instant::now();
        let output_dir = output_dir.as_ref();

        let pdfs = list_pdfs(input_dir.as_ref()).await?;
        let stems: Vec<String> = pdfs.iter().map(|p| document_stem(p)).collect();
        prepare_work_dir(&self.work_root(output_dir), &stems).await?;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| Pdf2MdError::OutputWriteFailed {
                path: output_dir.to_path_buf(),
                source: e,
            })?;

        info!("Found {} PDF file(s) in {}", pdfs.len(), input_dir.as_ref().display());
        if let Some(cb) = &self.config.progress_callback {
            cb.on_batch_start(pdfs.len());
        }

        let claims = first_claims(&pdfs, &stems);
        let documents: Vec<DocumentOutcome> = stream::iter(pdfs.into_iter().zip(claims))
            .map(|(pdf, first)| async move {
                let result = match first {
                    Some(first) => Err(self.reject_duplicate(&pdf, first)),
                    None => self.convert_document(&pdf, output_dir).await,
                };
                match result {
                    Ok(out) => DocumentOutcome::Converted {
                        source: out.source,
                        markdown_path: out.markdown_path,
                        stats: out.stats,
                    },
                    Err(e) => {
                        error!("Error processing {}: {}", pdf.display(), e);
                        DocumentOutcome::Failed {
                            source: pdf,
                            error: e.to_string(),
                        }
                    }
                }
            })
            .buffered(self.config.document_concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport {
            documents,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Batch complete: {} converted, {} failed, {}ms",
            report.succeeded(),
            report.failed(),
            report.duration_ms
        );
        Ok(report)
    }
}

/// Output name and cache directory stem of a PDF: `manual.pdf` → `manual`.
pub fn document_stem(pdf_path: &Path) -> String {
    pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

/// For each document, the earlier document that already owns its stem.
///
/// Stems are compared case-insensitively: `Report.pdf` and `report.PDF`
/// would share `report_pages/` on a case-insensitive file system.
fn first_claims(pdfs: &[PathBuf], stems: &[String]) -> Vec<Option<PathBuf>> {
    let mut owners: HashMap<String, &PathBuf> = HashMap::new();
    pdfs.iter()
        .zip(stems)
        .map(|(pdf, stem)| match owners.entry(stem.to_lowercase()) {
            Entry::Occupied(owner) => Some((*owner.get()).clone()),
            Entry::Vacant(slot) => {
                slot.insert(pdf);
                None
            }
        })
        .collect()
}

/// Page count of a PDF, without a model or any rendering.
pub async fn inspect(
    pdf_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<DocumentInfo, Pdf2MdError> {
    let pdf_path = pdf_path.as_ref();
    let reader = PdfiumReader::new(pdfium_lib_dir(config));
    let page_count = reader.page_count(pdf_path).await?;
    Ok(DocumentInfo {
        source: pdf_path.to_path_buf(),
        page_count,
    })
}

/// Create the working root and remove stale output of the given documents.
///
/// Only `<stem>.md` and `<stem>.md.tmp` for the listed stems are removed;
/// other files are left alone, and `<stem>_pages/` directories hold the page
/// cache and survive, so a rerun resumes.
pub async fn prepare_work_dir(dir: &Path, stems: &[String]) -> Result<(), Pdf2MdError> {
    let work_err = |e: std::io::Error| Pdf2MdError::WorkDir {
        path: dir.to_path_buf(),
        source: e,
    };

    tokio::fs::create_dir_all(dir).await.map_err(work_err)?;

    let mut entries = tokio::fs::read_dir(dir).await.map_err(work_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(work_err)? {
        let path = entry.path();
        let is_file = entry.file_type().await.map_err(work_err)?.is_file();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let is_output = stems
            .iter()
            .any(|stem| name == format!("{stem}.md") || name == format!("{stem}.md.tmp"));
        if is_file && is_output {
            debug!("Removing {}", path.display());
            tokio::fs::remove_file(&path).await.map_err(work_err)?;
        }
    }
    Ok(())
}

/// `*.pdf` files directly inside `dir` (extension matched case-insensitively),
/// sorted by path.
pub async fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, Pdf2MdError> {
    let dir_err = |e: std::io::Error| Pdf2MdError::InputDirUnreadable {
        path: dir.to_path_buf(),
        source: e,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(dir_err)?;
    let mut pdfs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(dir_err)? {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && entry.file_type().await.map_err(dir_err)?.is_file() {
            pdfs.push(path);
        }
    }
    pdfs.sort();
    Ok(pdfs)
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), Pdf2MdError> {
    let write_err = |e: std::io::Error| Pdf2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
}

fn pdfium_lib_dir(config: &ConversionConfig) -> Option<PathBuf> {
    config.pdfium_lib_path.clone().or_else(|| {
        std::env::var_os("PDFIUM_LIB_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    })
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Pdf2MdError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2MdError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, most specific first:
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model` (or [`DEFAULT_MODEL`]).
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI, when `OPENAI_API_KEY` is set.
/// 5. Whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, Pdf2MdError> {
    if let Some(provider) = &config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(name) = &config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2MdError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY (or another provider's key), or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
