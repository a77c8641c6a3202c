//! Converter behaviour end to end, on fake collaborators.
//!
//! "PDFs" here are text files: `pages=N` declares a readable document with
//! N pages, `pages=N notext` one whose text layer fails, anything else is
//! unreadable. The rasteriser writes a real 4x4 PNG so image loading runs
//! for real.

use async_trait::async_trait;
use futures::StreamExt;
use pdf2md_vision::{
    convert_stream, ArtifactKey, ArtifactKind, ConversionConfig, ConversionProgressCallback,
    Converter, DocumentOutcome, MemoryArtifactCache, PageDescriber, PageDescriptionRequest,
    PageError, PageFailurePolicy, PageRasterizer, PageSelection, PdfReader, Pdf2MdError, Table,
    TableExtractor,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Fakes ────────────────────────────────────────────────────────────────

struct FakeReader;

impl FakeReader {
    fn parse(pdf_path: &Path) -> Result<(usize, bool), Pdf2MdError> {
        let raw = std::fs::read_to_string(pdf_path).unwrap_or_default();
        let mut parts = raw.split_whitespace();
        let pages = parts
            .next()
            .and_then(|p| p.strip_prefix("pages="))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Pdf2MdError::DocumentRead {
                path: pdf_path.to_path_buf(),
                detail: "not a PDF".into(),
            })?;
        Ok((pages, parts.next() == Some("notext")))
    }
}

#[async_trait]
impl PdfReader for FakeReader {
    async fn page_count(&self, pdf_path: &Path) -> Result<usize, Pdf2MdError> {
        Self::parse(pdf_path).map(|(n, _)| n)
    }

    async fn page_text(&self, pdf_path: &Path, page: usize) -> Result<String, Pdf2MdError> {
        let (_, broken) = Self::parse(pdf_path)?;
        if broken {
            return Err(Pdf2MdError::Extraction {
                page,
                detail: "no text layer".into(),
            });
        }
        Ok(format!("raw text {page}"))
    }
}

#[derive(Default)]
struct FakeRasterizer {
    renders: AtomicUsize,
}

#[async_trait]
impl PageRasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        _pdf_path: &Path,
        page: usize,
        out_dir: &Path,
    ) -> Result<PathBuf, Pdf2MdError> {
        if let Some(existing) = pdf2md_vision::pipeline::render::find_rendered_page(out_dir, page)? {
            return Ok(existing);
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        let path = out_dir.join(format!("page_{page}-{page}.png"));
        image::RgbImage::from_pixel(4, 4, image::Rgb([255, 255, 255]))
            .save(&path)
            .map_err(|e| Pdf2MdError::RenderingFailed {
                page,
                detail: e.to_string(),
            })?;
        Ok(path)
    }
}

struct FakeTables;

#[async_trait]
impl TableExtractor for FakeTables {
    async fn extract_tables(&self, _pdf_path: &Path, page: usize) -> Result<Vec<Table>, Pdf2MdError> {
        Ok(vec![Table::new(vec![
            vec!["col".into()],
            vec![format!("row {page}")],
        ])])
    }
}

/// Answers with a fenced description; returns "" for pages in `empty_pages`.
#[derive(Default)]
struct FakeDescriber {
    calls: AtomicUsize,
    empty_pages: HashSet<usize>,
    seen: Mutex<Vec<(usize, String, String)>>,
}

impl FakeDescriber {
    fn empty_on(pages: &[usize]) -> Self {
        Self {
            empty_pages: pages.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageDescriber for FakeDescriber {
    async fn describe(&self, request: &PageDescriptionRequest<'_>) -> Result<String, Pdf2MdError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((
            request.page,
            request.text.to_string(),
            request.tables_markdown.to_string(),
        ));
        assert_eq!(request.image.mime_type, "image/png");

        if self.empty_pages.contains(&request.page) {
            return Ok(String::new());
        }
        Ok(format!(
            "```markdown\n# {} page {}\n\n{}\n```",
            request.source, request.page, request.text
        ))
    }
}

struct Harness {
    dir: tempfile::TempDir,
    rasterizer: Arc<FakeRasterizer>,
    describer: Arc<FakeDescriber>,
    converter: Converter,
}

impl Harness {
    fn new(config: ConversionConfig, describer: FakeDescriber) -> Self {
        let rasterizer = Arc::new(FakeRasterizer::default());
        let describer = Arc::new(describer);
        let converter = Converter::new(config, describer.clone())
            .with_reader(Arc::new(FakeReader))
            .with_rasterizer(rasterizer.clone())
            .with_table_extractor(Arc::new(FakeTables));
        Self {
            dir: tempfile::tempdir().unwrap(),
            rasterizer,
            describer,
            converter,
        }
    }

    fn basic() -> Self {
        Self::new(ConversionConfig::default(), FakeDescriber::default())
    }

    fn pdf(&self, name: &str, contents: &str) -> PathBuf {
        let input = self.dir.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        let path = input.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn input_dir(&self) -> PathBuf {
        self.dir.path().join("in")
    }

    fn out(&self) -> PathBuf {
        self.dir.path().join("out")
    }
}

// ── Document assembly ────────────────────────────────────────────────────

#[tokio::test]
async fn writes_markdown_with_footers_in_page_order() {
    let h = Harness::basic();
    let pdf = h.pdf("report.pdf", "pages=3");

    let out = h.converter.convert_document(&pdf, h.out()).await.unwrap();
    assert_eq!(out.markdown_path, h.out().join("report.md"));
    assert_eq!(out.pages.len(), 3);
    assert!(out.pages.iter().all(|p| p.source == "report.pdf"));

    let md = std::fs::read_to_string(&out.markdown_path).unwrap();
    assert_eq!(
        md,
        "# report.pdf page 1\n\nraw text 1\n\n---\n_Page 1_\n\
         # report.pdf page 2\n\nraw text 2\n\n---\n_Page 2_\n\
         # report.pdf page 3\n\nraw text 3\n\n---\n_Page 3_\n"
    );

    let positions: Vec<usize> = (1..=3)
        .map(|n| md.find(&format!("_Page {n}_")).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(!md.contains("```"));
}

#[tokio::test]
async fn second_run_is_identical_and_makes_no_calls() {
    let h = Harness::basic();
    let pdf = h.pdf("doc.pdf", "pages=2");

    let first = h.converter.convert_document(&pdf, h.out()).await.unwrap();
    let md1 = std::fs::read(&first.markdown_path).unwrap();
    assert_eq!(h.describer.calls(), 2);
    assert_eq!(h.rasterizer.renders.load(Ordering::SeqCst), 2);
    assert_eq!(first.stats.described_pages, 2);

    let second = h.converter.convert_document(&pdf, h.out()).await.unwrap();
    let md2 = std::fs::read(&second.markdown_path).unwrap();
    assert_eq!(md1, md2);
    assert_eq!(h.describer.calls(), 2);
    assert_eq!(h.rasterizer.renders.load(Ordering::SeqCst), 2);
    assert_eq!(second.stats.cached_pages, 2);
    assert_eq!(second.stats.described_pages, 0);
}

#[tokio::test]
async fn cached_description_is_used_verbatim() {
    let h = Harness::basic();
    let pdf = h.pdf("doc.pdf", "pages=3");
    let pages_dir = h.out().join("doc_pages");
    std::fs::create_dir_all(&pages_dir).unwrap();
    std::fs::write(pages_dir.join("page_description_2.txt"), "X").unwrap();

    let out = h.converter.convert_document(&pdf, h.out()).await.unwrap();
    assert_eq!(out.pages[1].content, "X");
    assert_eq!(h.describer.calls(), 2);
    assert!(h
        .describer
        .seen
        .lock()
        .unwrap()
        .iter()
        .all(|(page, _, _)| *page != 2));

    let md = std::fs::read_to_string(&out.markdown_path).unwrap();
    assert!(md.contains("_Page 1_\nX\n\n---\n_Page 2_\n"));
}

#[tokio::test]
async fn artefacts_are_laid_out_per_page() {
    let h = Harness::basic();
    let pdf = h.pdf("doc.pdf", "pages=1");
    h.converter.convert_document(&pdf, h.out()).await.unwrap();

    let pages_dir = h.out().join("doc_pages");
    assert!(pages_dir.join("page_1-1.png").exists());
    assert_eq!(
        std::fs::read_to_string(pages_dir.join("page_text_1.txt")).unwrap(),
        "raw text 1"
    );
    assert_eq!(
        std::fs::read_to_string(pages_dir.join("page_tables_1.txt")).unwrap(),
        "| col |\n|---|\n| row 1 |"
    );
    assert!(std::fs::read_to_string(pages_dir.join("page_description_1.txt"))
        .unwrap()
        .starts_with("```markdown\n"));
}

#[tokio::test]
async fn failed_text_extraction_still_describes_page() {
    let h = Harness::basic();
    let pdf = h.pdf("scan.pdf", "pages=2 notext");

    let out = h.converter.convert_document(&pdf, h.out()).await.unwrap();
    assert_eq!(out.pages.len(), 2);
    assert_eq!(h.describer.calls(), 2);

    let seen = h.describer.seen.lock().unwrap();
    assert!(seen.iter().all(|(_, text, tables)| text.is_empty() && !tables.is_empty()));
    assert_eq!(
        std::fs::read_to_string(h.out().join("scan_pages").join("page_text_1.txt")).unwrap(),
        ""
    );
}

#[tokio::test]
async fn work_dir_overrides_cache_location() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let h = Harness::new(
        ConversionConfig::builder().work_dir(&work).build().unwrap(),
        FakeDescriber::default(),
    );
    let pdf = h.pdf("doc.pdf", "pages=1");

    let out = h.converter.convert_document(&pdf, h.out()).await.unwrap();
    assert_eq!(out.pages_dir, work.join("doc_pages"));
    assert!(work.join("doc_pages").join("page_description_1.txt").exists());
    assert!(h.out().join("doc.md").exists());
    assert!(!h.out().join("doc_pages").exists());
}

#[tokio::test]
async fn memory_cache_keeps_text_off_disk() {
    let h = Harness::basic();
    let cache = Arc::new(MemoryArtifactCache::new());
    let converter = h.converter.clone().with_cache(cache.clone());
    let pdf = h.pdf("doc.pdf", "pages=1");

    converter.convert_document(&pdf, h.out()).await.unwrap();
    assert_eq!(cache.len(), 3);
    assert_eq!(
        cache
            .get(&ArtifactKey::new("doc", 1, ArtifactKind::Text))
            .as_deref(),
        Some("raw text 1")
    );
    assert!(!h.out().join("doc_pages").join("page_text_1.txt").exists());
    assert!(h.out().join("doc_pages").join("page_1-1.png").exists());
}

// ── Page selection and failures ──────────────────────────────────────────

#[tokio::test]
async fn page_selection_keeps_physical_numbers() {
    let h = Harness::new(
        ConversionConfig::builder()
            .pages(PageSelection::Range(2, 3))
            .build()
            .unwrap(),
        FakeDescriber::default(),
    );
    let pdf = h.pdf("doc.pdf", "pages=4");

    let out = h.converter.convert_document(&pdf, h.out()).await.unwrap();
    let md = std::fs::read_to_string(&out.markdown_path).unwrap();
    assert!(!md.contains("_Page 1_"));
    assert!(md.contains("_Page 2_") && md.contains("_Page 3_"));
    assert!(!md.contains("_Page 4_"));
    assert_eq!(out.stats.total_pages, 4);
    assert_eq!(out.stats.selected_pages, 2);
}

#[tokio::test]
async fn selection_outside_document_is_an_error() {
    let h = Harness::new(
        ConversionConfig::builder()
            .pages(PageSelection::Single(9))
            .build()
            .unwrap(),
        FakeDescriber::default(),
    );
    let pdf = h.pdf("doc.pdf", "pages=2");
    let err = h.converter.convert_document(&pdf, h.out()).await.unwrap_err();
    assert!(matches!(err, Pdf2MdError::PageOutOfRange { total: 2 }));
}

#[tokio::test]
async fn empty_response_aborts_document_by_default() {
    let h = Harness::new(ConversionConfig::default(), FakeDescriber::empty_on(&[2]));
    let pdf = h.pdf("doc.pdf", "pages=3");

    let err = h.converter.convert_document(&pdf, h.out()).await.unwrap_err();
    assert!(matches!(err, Pdf2MdError::EmptyResponse { page: 2 }));
    assert!(!h.out().join("doc.md").exists());
    // Page 3 is never attempted; page 1's description stays cached.
    assert_eq!(h.describer.calls(), 2);
    assert!(h.out().join("doc_pages").join("page_description_1.txt").exists());
    assert!(!h.out().join("doc_pages").join("page_description_2.txt").exists());
}

#[tokio::test]
async fn skip_policy_leaves_failed_page_out() {
    let h = Harness::new(
        ConversionConfig::builder()
            .page_failure(PageFailurePolicy::Skip)
            .build()
            .unwrap(),
        FakeDescriber::empty_on(&[2]),
    );
    let pdf = h.pdf("doc.pdf", "pages=3");

    let out = h.converter.convert_document(&pdf, h.out()).await.unwrap();
    assert_eq!(out.pages.iter().map(|p| p.page).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(out.failed_pages.len(), 1);
    assert!(matches!(out.failed_pages[0], PageError::DescribeFailed { page: 2, .. }));
    assert_eq!(out.stats.failed_pages, 1);

    let md = std::fs::read_to_string(&out.markdown_path).unwrap();
    assert!(md.contains("_Page 1_") && md.contains("_Page 3_"));
    assert!(!md.contains("_Page 2_"));
}

// ── Directory driver ─────────────────────────────────────────────────────

#[tokio::test]
async fn unreadable_document_does_not_stop_the_batch() {
    let h = Harness::basic();
    h.pdf("1-first.pdf", "pages=1");
    h.pdf("2-broken.pdf", "garbage");
    h.pdf("3-third.pdf", "pages=2");
    h.pdf("notes.txt", "pages=1");

    let report = h
        .converter
        .convert_directory(h.input_dir(), h.out())
        .await
        .unwrap();

    assert_eq!(report.documents.len(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(report.documents[0].is_success());
    assert!(matches!(
        &report.documents[1],
        DocumentOutcome::Failed { source, error }
            if source.ends_with("2-broken.pdf") && error.contains("not a PDF")
    ));
    assert!(report.documents[2].is_success());

    assert!(h.out().join("1-first.md").exists());
    assert!(!h.out().join("2-broken.md").exists());
    assert!(h.out().join("3-third.md").exists());
}

#[tokio::test]
async fn concurrent_documents_keep_report_order() {
    let h = Harness::new(
        ConversionConfig::builder()
            .document_concurrency(3)
            .build()
            .unwrap(),
        FakeDescriber::default(),
    );
    for name in ["a.pdf", "b.pdf", "c.pdf", "d.pdf"] {
        h.pdf(name, "pages=2");
    }

    let report = h
        .converter
        .convert_directory(h.input_dir(), h.out())
        .await
        .unwrap();
    let names: Vec<_> = report
        .documents
        .iter()
        .map(|d| d.source().file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.pdf", "b.pdf", "c.pdf", "d.pdf"]);
    assert_eq!(h.describer.calls(), 8);
}

#[tokio::test]
async fn directory_run_clears_own_stale_files_but_resumes_from_cache() {
    let h = Harness::basic();
    h.pdf("doc.pdf", "pages=2");

    h.converter
        .convert_directory(h.input_dir(), h.out())
        .await
        .unwrap();
    std::fs::write(h.out().join("doc.md.tmp"), "interrupted").unwrap();
    std::fs::write(h.out().join("README.md"), "not ours").unwrap();

    let report = h
        .converter
        .convert_directory(h.input_dir(), h.out())
        .await
        .unwrap();
    assert!(!h.out().join("doc.md.tmp").exists());
    assert_eq!(std::fs::read_to_string(h.out().join("README.md")).unwrap(), "not ours");
    assert!(h.out().join("doc.md").exists());
    assert_eq!(h.describer.calls(), 2);
    match &report.documents[0] {
        DocumentOutcome::Converted { stats, .. } => assert_eq!(stats.cached_pages, 2),
        other => panic!("unexpected {other:?}"),
    }
}

// Both names can only coexist on a case-sensitive file system.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn documents_sharing_a_stem_do_not_share_output() {
    let h = Harness::basic();
    h.pdf("report.PDF", "pages=1");
    h.pdf("report.pdf", "pages=2");

    let report = h
        .converter
        .convert_directory(h.input_dir(), h.out())
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 1);
    assert!(report.documents[0].is_success());
    assert!(matches!(
        &report.documents[1],
        DocumentOutcome::Failed { source, error }
            if source.ends_with("report.pdf") && error.contains("same file stem")
    ));
    let md = std::fs::read_to_string(h.out().join("report.md")).unwrap();
    assert!(md.contains("_Page 1_"));
    assert!(!md.contains("_Page 2_"));
    assert_eq!(h.describer.calls(), 1);
}

#[tokio::test]
async fn missing_input_directory_fails_the_call() {
    let h = Harness::basic();
    let err = h
        .converter
        .convert_directory(h.dir.path().join("nope"), h.out())
        .await
        .unwrap_err();
    assert!(matches!(err, Pdf2MdError::InputDirUnreadable { .. }));
}

// ── Progress and streaming ───────────────────────────────────────────────

#[derive(Default)]
struct Events(Mutex<Vec<String>>);

impl ConversionProgressCallback for Events {
    fn on_batch_start(&self, total_documents: usize) {
        self.0.lock().unwrap().push(format!("batch {total_documents}"));
    }
    fn on_document_start(&self, _source: &str, total_pages: usize) {
        self.0.lock().unwrap().push(format!("doc {total_pages}"));
    }
    fn on_page_complete(&self, _source: &str, page: usize, _total: usize, cached: bool) {
        self.0.lock().unwrap().push(format!("page {page} {cached}"));
    }
    fn on_page_error(&self, _source: &str, page: usize, _total: usize, _error: &str) {
        self.0.lock().unwrap().push(format!("error {page}"));
    }
    fn on_document_complete(&self, _source: &str, error: Option<&str>) {
        self.0
            .lock()
            .unwrap()
            .push(format!("done {}", if error.is_some() { "err" } else { "ok" }));
    }
}

#[tokio::test]
async fn progress_events_follow_the_batch() {
    let events = Arc::new(Events::default());
    let h = Harness::new(
        ConversionConfig::builder()
            .progress_callback(events.clone())
            .build()
            .unwrap(),
        FakeDescriber::empty_on(&[2]),
    );
    h.pdf("a.pdf", "pages=1");
    h.pdf("b.pdf", "pages=2");
    h.pdf("c.pdf", "broken");

    h.converter
        .convert_directory(h.input_dir(), h.out())
        .await
        .unwrap();

    let got = events.0.lock().unwrap().clone();
    assert_eq!(
        got,
        vec![
            "batch 3",
            "doc 1",
            "page 1 false",
            "done ok",
            "doc 2",
            "page 1 false",
            "error 2",
            "done err",
            "done err",
        ]
    );
}

#[tokio::test]
async fn stream_yields_pages_in_order_without_writing_markdown() {
    let h = Harness::basic();
    let pdf = h.pdf("doc.pdf", "pages=3");

    let stream = convert_stream(&h.converter, &pdf, h.out()).await.unwrap();
    let pages: Vec<_> = stream.collect().await;
    let numbers: Vec<usize> = pages.iter().map(|r| r.as_ref().unwrap().page).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(pages[0].as_ref().unwrap().content.starts_with("```markdown"));
    assert!(!h.out().join("doc.md").exists());
    assert!(h.out().join("doc_pages").join("page_description_3.txt").exists());
}

#[tokio::test]
async fn stream_stops_after_first_failure_under_abort() {
    let h = Harness::new(ConversionConfig::default(), FakeDescriber::empty_on(&[2]));
    let pdf = h.pdf("doc.pdf", "pages=3");

    let items: Vec<_> = convert_stream(&h.converter, &pdf, h.out())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(items[1], Err(PageError::DescribeFailed { page: 2, .. })));
    assert_eq!(h.describer.calls(), 2);
    assert_eq!(h.rasterizer.renders.load(Ordering::SeqCst), 2);
    assert!(!h.out().join("doc_pages").join("page_3-3.png").exists());
}

#[tokio::test]
async fn stream_of_unreadable_document_fails_up_front() {
    let h = Harness::basic();
    let pdf = h.pdf("bad.pdf", "%PDF-garbage");
    let err = convert_stream(&h.converter, &pdf, h.out()).await.err().unwrap();
    assert!(matches!(err, Pdf2MdError::DocumentRead { .. }));
}
