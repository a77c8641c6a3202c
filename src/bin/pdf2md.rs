//! CLI binary for pdf2md-vision.
//!
//! Maps flags onto `ConversionConfig`, converts a directory of PDFs (or a
//! single PDF) and prints a summary or a JSON report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2md_vision::{
    inspect, BatchReport, ConversionConfig, ConversionProgressCallback, Converter, DocumentOutcome,
    PageFailurePolicy, PageSelection, ProgressCallback,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over all pages of all documents. Its length grows as each
/// document is opened; a document that fails early advances the bar by its
/// unprocessed pages so the bar still ends full.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Pages not yet reported, per document.
    remaining: Mutex<HashMap<String, usize>>,
    page_started: Mutex<Option<Instant>>,
    cached: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            remaining: Mutex::new(HashMap::new()),
            page_started: Mutex::new(None),
            cached: AtomicUsize::new(0),
        })
    }

    fn page_done(&self, source: &str) {
        if let Ok(mut remaining) = self.remaining.lock() {
            if let Some(n) = remaining.get_mut(source) {
                *n = n.saturating_sub(1);
            }
        }
        self.bar.inc(1);
    }

    fn page_elapsed(&self) -> String {
        let secs = self
            .page_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

fn short_name(source: &str) -> String {
    Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string())
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_documents} document(s)…"))
        ));
    }

    fn on_document_start(&self, source: &str, total_pages: usize) {
        if let Ok(mut remaining) = self.remaining.lock() {
            remaining.insert(source.to_string(), total_pages);
        }
        self.bar.inc_length(total_pages as u64);
        self.bar.set_message(short_name(source));
    }

    fn on_page_start(&self, source: &str, page: usize, _total_pages: usize) {
        if let Ok(mut started) = self.page_started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(format!("{} p.{page}", short_name(source)));
    }

    fn on_page_complete(&self, source: &str, page: usize, total_pages: usize, cached: bool) {
        if cached {
            self.cached.fetch_add(1, Ordering::SeqCst);
        }
        self.bar.println(format!(
            "  {} {} page {:>3}/{:<3} {}  {}",
            green("✓"),
            short_name(source),
            page,
            total_pages,
            if cached { dim("cached") } else { String::new() },
            self.page_elapsed(),
        ));
        self.page_done(source);
    }

    fn on_page_error(&self, source: &str, page: usize, total_pages: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {} page {:>3}/{:<3}  {}  {}",
            red("✗"),
            short_name(source),
            page,
            total_pages,
            red(&msg),
            self.page_elapsed(),
        ));
        self.page_done(source);
    }

    fn on_document_complete(&self, source: &str, error: Option<&str>) {
        let left = self
            .remaining
            .lock()
            .ok()
            .and_then(|mut r| r.remove(source))
            .unwrap_or(0);
        self.bar.inc(left as u64);

        match error {
            None => self
                .bar
                .println(format!("{} {}", green("✔"), bold(&short_name(source)))),
            Some(e) => self.bar.println(format!(
                "{} {}  {}",
                red("✘"),
                bold(&short_name(source)),
                red(e.lines().next().unwrap_or(e))
            )),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every PDF in a directory into ./pdf2md-output
  pdf2md papers/

  # Choose the output directory and keep page caches elsewhere
  pdf2md papers/ -o markdown/ --work-dir /tmp/pdf2md-work

  # A single document, first five pages only
  pdf2md report.pdf --pages 1-5

  # Leave failed pages out instead of abandoning the document
  pdf2md papers/ --on-page-error skip

  # Use a specific model
  pdf2md --provider openai --model gpt-4.1 papers/

  # Page count only (no API key needed)
  pdf2md --inspect-only report.pdf

  # Machine-readable batch report
  pdf2md --json papers/ > report.json

WORKING DIRECTORY:
  For every input name.pdf the working directory holds name_pages/ with
    page_N-*.png             rendered page
    page_text_N.txt          text layer
    page_tables_N.txt        tables as Markdown
    page_description_N.txt   the model's answer
  Existing files are reused. Rerunning after an interruption only does the
  missing work; delete a file to have it regenerated.

REQUIREMENTS:
  pdftocairo   (poppler-utils) for page images
  libpdfium    for text; set PDFIUM_LIB_PATH to its directory if not installed
  python3 + camelot-py for tables (optional, --no-tables to skip)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (also read from .env)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Provider used when --provider is not given
  EDGEQUAKE_MODEL         Model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Log filter, overrides --verbose/--quiet
"#;

/// Convert directories of PDF files to Markdown using a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md",
    version,
    about = "Convert directories of PDF files to Markdown using a vision LLM",
    long_about = "Convert every PDF in a directory (or a single PDF) to Markdown. Each page is \
rendered, its text and tables are extracted, and all three are sent to a vision language model \
that writes the page as Markdown. Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and \
any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory of PDF files, or a single PDF file.
    input: PathBuf,

    /// Directory for the generated Markdown files.
    #[arg(short, long, env = "PDF2MD_OUTPUT", default_value = "pdf2md-output")]
    output: PathBuf,

    /// Where per-document page caches go. Default: the output directory.
    #[arg(long, env = "PDF2MD_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2MD_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Cap the longest edge of rendered pages, in pixels.
    #[arg(long, env = "PDF2MD_MAX_PIXELS")]
    max_pixels: Option<u32>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2MD_PAGES", default_value = "all")]
    pages: String,

    /// What a failed page does to its document.
    #[arg(long, env = "PDF2MD_ON_PAGE_ERROR", value_enum, default_value = "abort")]
    on_page_error: PageFailureArg,

    /// Documents converted at the same time.
    #[arg(short, long, env = "PDF2MD_JOBS", default_value_t = 1)]
    jobs: usize,

    /// Skip table extraction.
    #[arg(long, env = "PDF2MD_NO_TABLES")]
    no_tables: bool,

    /// Python interpreter with camelot installed.
    #[arg(long, env = "PDF2MD_PYTHON", default_value = "python3")]
    python: PathBuf,

    /// pdftocairo executable.
    #[arg(long, env = "PDF2MD_PDFTOCAIRO", default_value = "pdftocairo")]
    pdftocairo: PathBuf,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF2MD_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2MD_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "PDF2MD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Per-page pdftocairo timeout in seconds.
    #[arg(long, env = "PDF2MD_RENDER_TIMEOUT", default_value_t = 120)]
    render_timeout: u64,

    /// Per-page camelot timeout in seconds.
    #[arg(long, env = "PDF2MD_TABLE_TIMEOUT", default_value_t = 300)]
    table_timeout: u64,

    /// Print the batch report as JSON on stdout.
    #[arg(long, env = "PDF2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Print page counts only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PageFailureArg {
    Abort,
    Skip,
}

impl From<PageFailureArg> for PageFailurePolicy {
    fn from(v: PageFailureArg) -> Self {
        match v {
            PageFailureArg::Abort => PageFailurePolicy::Abort,
            PageFailureArg::Skip => PageFailurePolicy::Skip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; credentials may come from the real environment.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO logs would interleave with the progress bar, so the bar implies
    // errors-only unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None).await?;
        let pdfs = input_pdfs(&cli.input).await?;
        let mut infos = Vec::with_capacity(pdfs.len());
        for pdf in &pdfs {
            infos.push(
                inspect(pdf, &config)
                    .await
                    .with_context(|| format!("Failed to inspect {}", pdf.display()))?,
            );
        }

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&infos).context("Failed to serialize page counts")?
            );
        } else {
            for info in &infos {
                println!("{:>5} pages  {}", info.page_count, info.source.display());
            }
        }
        return Ok(());
    }

    // ── Build converter ──────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;
    let converter = Converter::from_config(config).context("Failed to set up the LLM provider")?;

    // ── Run conversion ───────────────────────────────────────────────────
    let report = if cli.input.is_dir() {
        converter
            .convert_directory(&cli.input, &cli.output)
            .await
            .context("Conversion failed")?
    } else {
        convert_single(&converter, &cli.input, &cli.output).await
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_summary(&report);
    }

    if report.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Single-file mode: same outcome bookkeeping as a one-document batch.
async fn convert_single(converter: &Converter, pdf: &Path, output_dir: &Path) -> BatchReport {
    let start = Instant::now();
    if let Some(cb) = &converter.config().progress_callback {
        cb.on_batch_start(1);
    }

    let outcome = match converter.convert_document(pdf, output_dir).await {
        Ok(out) => DocumentOutcome::Converted {
            source: out.source,
            markdown_path: out.markdown_path,
            stats: out.stats,
        },
        Err(e) => {
            tracing::error!("Error processing {}: {}", pdf.display(), e);
            DocumentOutcome::Failed {
                source: pdf.to_path_buf(),
                error: e.to_string(),
            }
        }
    };

    BatchReport {
        documents: vec![outcome],
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn print_summary(report: &BatchReport) {
    for doc in &report.documents {
        match doc {
            DocumentOutcome::Converted {
                markdown_path,
                stats,
                ..
            } => eprintln!(
                "{}  {}  {}",
                green("✔"),
                bold(&markdown_path.display().to_string()),
                dim(&format!(
                    "{} pages, {} cached, {} skipped, {}ms",
                    stats.selected_pages - stats.failed_pages,
                    stats.cached_pages,
                    stats.failed_pages,
                    stats.duration_ms
                )),
            ),
            DocumentOutcome::Failed { source, error } => eprintln!(
                "{}  {}  {}",
                red("✘"),
                bold(&source.display().to_string()),
                red(error.lines().next().unwrap_or(error)),
            ),
        }
    }

    let failed = report.failed();
    eprintln!(
        "{} {}/{} documents converted in {}ms{}",
        if failed == 0 { green("✔") } else { cyan("⚠") },
        report.succeeded(),
        report.documents.len(),
        report.duration_ms,
        if failed > 0 {
            format!("  ({} failed)", red(&failed.to_string()))
        } else {
            String::new()
        },
    );
}

/// The PDFs named by `input`: the file itself, or every PDF in the directory.
async fn input_pdfs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_dir() {
        pdf2md_vision::convert::list_pdfs(input)
            .await
            .with_context(|| format!("Failed to list {}", input.display()))
    } else {
        Ok(vec![input.to_path_buf()])
    }
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ConversionConfig::builder()
        .dpi(cli.dpi)
        .pages(parse_pages(&cli.pages)?)
        .page_failure(cli.on_page_error.into())
        .document_concurrency(cli.jobs)
        .extract_tables(!cli.no_tables)
        .python_exe(&cli.python)
        .pdftocairo_path(&cli.pdftocairo)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .render_timeout_secs(cli.render_timeout)
        .table_timeout_secs(cli.table_timeout);

    if let Some(ref dir) = cli.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(px) = cli.max_pixels {
        builder = builder.max_rendered_pixels(px);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}
