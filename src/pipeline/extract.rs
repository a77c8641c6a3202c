//! Page content extraction: raw text via pdfium, tables via camelot.
//!
//! Both halves are best-effort. A failing text layer or a crashing table
//! extractor is logged and turns into an empty result; the page still gets
//! rendered and described from its image. Whatever was extracted (including
//! the empty fallback) is cached, so a rerun does not retry extraction.

use crate::cache::{cached, ArtifactCache, ArtifactKey, ArtifactKind};
use crate::error::Pdf2MdError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

// ── PDF reader ───────────────────────────────────────────────────────────

/// Opens PDFs and reads their text layer.
#[async_trait]
pub trait PdfReader: Send + Sync {
    /// Number of pages; fails with [`Pdf2MdError::DocumentRead`] when the
    /// file is not a readable PDF.
    async fn page_count(&self, pdf_path: &Path) -> Result<usize, Pdf2MdError>;

    /// Text of page `page` (1-based).
    async fn page_text(&self, pdf_path: &Path, page: usize) -> Result<String, Pdf2MdError>;
}

/// [`PdfReader`] over pdfium. Each call binds pdfium and opens the document
/// on the blocking pool; pdfium handles are not `Send`.
#[derive(Debug, Clone, Default)]
pub struct PdfiumReader {
    lib_dir: Option<PathBuf>,
}

impl PdfiumReader {
    /// `lib_dir` is the directory holding the platform pdfium library; `None`
    /// tries the current directory, then the system library.
    pub fn new(lib_dir: Option<PathBuf>) -> Self {
        Self { lib_dir }
    }

    fn bind(lib_dir: Option<&Path>) -> Result<Pdfium, Pdf2MdError> {
        let bindings = match lib_dir {
            Some(dir) => {
                let dir = dir.to_string_lossy().to_string();
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
            }
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| Pdf2MdError::PdfiumBindingFailed(e.to_string()))?;

        Ok(Pdfium::new(bindings))
    }

    fn page_count_blocking(lib_dir: Option<&Path>, pdf_path: &Path) -> Result<usize, Pdf2MdError> {
        let pdfium = Self::bind(lib_dir)?;
        let document =
            pdfium
                .load_pdf_from_file(pdf_path, None)
                .map_err(|e| Pdf2MdError::DocumentRead {
                    path: pdf_path.to_path_buf(),
                    detail: format!("{:?}", e),
                })?;
        Ok(document.pages().len() as usize)
    }

    fn page_text_blocking(
        lib_dir: Option<&Path>,
        pdf_path: &Path,
        page: usize,
    ) -> Result<String, Pdf2MdError> {
        let extraction = |detail: String| Pdf2MdError::Extraction { page, detail };

        let pdfium = Self::bind(lib_dir)?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| extraction(format!("{:?}", e)))?;
        let pdf_page = document
            .pages()
            .get(page.saturating_sub(1) as u16)
            .map_err(|e| extraction(format!("{:?}", e)))?;
        let text = pdf_page
            .text()
            .map_err(|e| extraction(format!("{:?}", e)))?;
        Ok(text.all())
    }
}

#[async_trait]
impl PdfReader for PdfiumReader {
    async fn page_count(&self, pdf_path: &Path) -> Result<usize, Pdf2MdError> {
        let lib_dir = self.lib_dir.clone();
        let path = pdf_path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::page_count_blocking(lib_dir.as_deref(), &path))
            .await
            .map_err(|e| Pdf2MdError::Internal(format!("Page count task panicked: {}", e)))?
    }

    async fn page_text(&self, pdf_path: &Path, page: usize) -> Result<String, Pdf2MdError> {
        let lib_dir = self.lib_dir.clone();
        let path = pdf_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            Self::page_text_blocking(lib_dir.as_deref(), &path, page)
        })
        .await
        .map_err(|e| Pdf2MdError::Internal(format!("Text extraction task panicked: {}", e)))?
    }
}

// ── Tables ───────────────────────────────────────────────────────────────

/// A detected table as a grid of cell strings, first row as header.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Render as a GFM pipe table. Short rows are padded; pipes and line
    /// breaks inside cells are escaped so the grid stays intact.
    pub fn to_markdown(&self) -> String {
        let cols = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        if cols == 0 {
            return String::new();
        }

        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        for (row_idx, row) in self.rows.iter().enumerate() {
            let cells: Vec<String> = (0..cols)
                .map(|c| row.get(c).map(|s| escape_cell(s)).unwrap_or_default())
                .collect();
            lines.push(format!("| {} |", cells.join(" | ")));

            if row_idx == 0 {
                lines.push(format!("|{}", "---|".repeat(cols)));
            }
        }
        lines.join("\n")
    }
}

fn escape_cell(cell: &str) -> String {
    cell.trim()
        .replace('|', "\\|")
        .replace("\r\n", " ")
        .replace('\n', " ")
}

/// Join tables with a blank line, skipping empty grids.
pub fn tables_to_markdown(tables: &[Table]) -> String {
    tables
        .iter()
        .map(Table::to_markdown)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Detects tables on one page.
#[async_trait]
pub trait TableExtractor: Send + Sync {
    async fn extract_tables(&self, pdf_path: &Path, page: usize) -> Result<Vec<Table>, Pdf2MdError>;
}

/// Always reports zero tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTableExtractor;

#[async_trait]
impl TableExtractor for NoTableExtractor {
    async fn extract_tables(&self, _pdf_path: &Path, _page: usize) -> Result<Vec<Table>, Pdf2MdError> {
        Ok(Vec::new())
    }
}

/// Inline driver for camelot: prints every table on the page as a JSON grid.
const CAMELOT_SCRIPT: &str = r#"
import json, sys
import camelot
tables = camelot.read_pdf(sys.argv[1], pages=sys.argv[2])
json.dump([t.df.astype(str).values.tolist() for t in tables], sys.stdout)
"#;

/// [`TableExtractor`] that runs camelot in a Python subprocess.
#[derive(Debug, Clone)]
pub struct CamelotTableExtractor {
    python_exe: PathBuf,
    timeout: Duration,
}

impl CamelotTableExtractor {
    pub fn new(python_exe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            python_exe: python_exe.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TableExtractor for CamelotTableExtractor {
    async fn extract_tables(&self, pdf_path: &Path, page: usize) -> Result<Vec<Table>, Pdf2MdError> {
        let extraction = |detail: String| Pdf2MdError::Extraction { page, detail };
        debug!(
            "camelot: {} page {} via {}",
            pdf_path.display(),
            page,
            self.python_exe.display()
        );

        let mut cmd = Command::new(&self.python_exe);
        cmd.arg("-c")
            .arg(CAMELOT_SCRIPT)
            .arg(pdf_path)
            .arg(page.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| extraction(format!("camelot timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| extraction(format!("failed to run {}: {}", self.python_exe.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(extraction(format!(
                "camelot exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| extraction(format!("unparseable camelot output: {}", e)))
    }
}

// ── Cached, degrading extraction ─────────────────────────────────────────

/// Text and tables of one page, ready to inline into the model prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContent {
    pub text: String,
    pub tables_markdown: String,
}

/// Extract (or load from cache) the text and tables of `key.page`.
///
/// Extraction errors never propagate; only cache I/O errors do.
pub async fn extract_page_content(
    reader: &dyn PdfReader,
    tables: &dyn TableExtractor,
    cache: &dyn ArtifactCache,
    pdf_path: &Path,
    key: &ArtifactKey,
) -> Result<PageContent, Pdf2MdError> {
    let page = key.page;

    let text = cached(cache, &key.with_kind(ArtifactKind::Text), || async {
        Ok::<_, Pdf2MdError>(match reader.page_text(pdf_path, page).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Error extracting text from page {}: {}", page, e);
                String::new()
            }
        })
    })
    .await?
    .value;

    let tables_markdown = cached(cache, &key.with_kind(ArtifactKind::Tables), || async {
        Ok::<_, Pdf2MdError>(match tables.extract_tables(pdf_path, page).await {
            Ok(found) => {
                debug!("Page {}: {} table(s)", page, found.len());
                tables_to_markdown(&found)
            }
            Err(e) => {
                warn!("Error extracting tables from page {}: {}", page, e);
                String::new()
            }
        })
    })
    .await?
    .value;

    Ok(PageContent {
        text,
        tables_markdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryArtifactCache;

    struct BrokenReader;

    #[async_trait]
    impl PdfReader for BrokenReader {
        async fn page_count(&self, _pdf_path: &Path) -> Result<usize, Pdf2MdError> {
            Ok(1)
        }

        async fn page_text(&self, _pdf_path: &Path, page: usize) -> Result<String, Pdf2MdError> {
            Err(Pdf2MdError::Extraction {
                page,
                detail: "no text layer".into(),
            })
        }
    }

    struct TwoTables;

    #[async_trait]
    impl TableExtractor for TwoTables {
        async fn extract_tables(&self, _pdf_path: &Path, _page: usize) -> Result<Vec<Table>, Pdf2MdError> {
            Ok(vec![
                Table::new(vec![vec!["a".into(), "b".into()], vec!["1".into(), "2".into()]]),
                Table::new(vec![vec!["x".into()]]),
            ])
        }
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn table_markdown_has_header_separator() {
        let t = Table::new(vec![
            vec![s("Quarter"), s("Units")],
            vec![s("Q1"), s("1,500")],
        ]);
        assert_eq!(
            t.to_markdown(),
            "| Quarter | Units |\n|---|---|\n| Q1 | 1,500 |"
        );
    }

    #[test]
    fn table_markdown_pads_and_escapes() {
        let t = Table::new(vec![vec![s("a|b"), s("c")], vec![s("line\nbreak")]]);
        assert_eq!(
            t.to_markdown(),
            "| a\\|b | c |\n|---|---|\n| line break |  |"
        );
    }

    #[test]
    fn empty_table_renders_nothing() {
        assert_eq!(Table::new(vec![]).to_markdown(), "");
        assert_eq!(tables_to_markdown(&[Table::new(vec![vec![]])]), "");
    }

    #[test]
    fn camelot_json_deserialises_into_tables() {
        let tables: Vec<Table> =
            serde_json::from_str(r#"[[["h1","h2"],["v1","v2"]],[["only"]]]"#).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].rows[1], vec![s("v1"), s("v2")]);
    }

    #[tokio::test]
    async fn text_failure_degrades_to_empty_and_is_cached() {
        let cache = MemoryArtifactCache::new();
        let key = ArtifactKey::new("doc", 2, ArtifactKind::Description);
        let content = extract_page_content(
            &BrokenReader,
            &TwoTables,
            &cache,
            Path::new("doc.pdf"),
            &key,
        )
        .await
        .unwrap();

        assert_eq!(content.text, "");
        assert_eq!(
            content.tables_markdown,
            "| a | b |\n|---|---|\n| 1 | 2 |\n\n| x |\n|---|"
        );
        assert_eq!(cache.get(&key.with_kind(ArtifactKind::Text)).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn cached_content_is_reused_verbatim() {
        let cache = MemoryArtifactCache::new();
        let key = ArtifactKey::new("doc", 1, ArtifactKind::Description);
        cache.insert(key.with_kind(ArtifactKind::Text), "cached text");
        cache.insert(key.with_kind(ArtifactKind::Tables), "");

        let content = extract_page_content(
            &BrokenReader,
            &TwoTables,
            &cache,
            Path::new("doc.pdf"),
            &key,
        )
        .await
        .unwrap();
        assert_eq!(content.text, "cached text");
        assert_eq!(content.tables_markdown, "");
    }

    #[tokio::test]
    async fn missing_python_degrades_to_no_tables() {
        let cache = MemoryArtifactCache::new();
        let key = ArtifactKey::new("doc", 1, ArtifactKind::Description);
        let camelot = CamelotTableExtractor::new("/nonexistent/python3", Duration::from_secs(5));
        let content = extract_page_content(
            &BrokenReader,
            &camelot,
            &cache,
            Path::new("doc.pdf"),
            &key,
        )
        .await
        .unwrap();
        assert_eq!(content, PageContent::default());
    }
}
