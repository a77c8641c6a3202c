//! Page rasterisation: render one PDF page to a PNG with `pdftocairo`.
//!
//! The renderer is an external process, so it sits behind [`PageRasterizer`]
//! and tests substitute a fake that writes a PNG directly.
//!
//! ## Output naming
//!
//! `pdftocairo -f N -l N doc.pdf out/page_N` writes `out/page_N-<N>.png`,
//! where `<N>` is zero-padded to the width of the document's page count
//! (`page_7-07.png` in a 30-page document). We therefore never build the
//! output path ourselves; [`find_rendered_page`] globs `page_N-*.png`.
//! The same lookup doubles as the cache check: an existing match is returned
//! without spawning anything, provided its PNG header still decodes.
//!
//! The renderer writes under a `page_N.partial` prefix and the file is renamed
//! to `page_N-*.png` only after the process exits successfully, so a killed
//! render never leaves a truncated image where the cache check would find it.

use crate::config::ConversionConfig;
use crate::error::Pdf2MdError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Produces the PNG for one page.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render `page` (1-based) of `pdf_path` into `out_dir` and return the
    /// PNG path. An already rendered page is returned without re-rendering.
    async fn rasterize(
        &self,
        pdf_path: &Path,
        page: usize,
        out_dir: &Path,
    ) -> Result<PathBuf, Pdf2MdError>;
}

/// Output prefix handed to the renderer for `page`.
pub fn page_prefix(page: usize) -> String {
    format!("page_{page}")
}

fn partial_prefix(page: usize) -> String {
    format!("page_{page}.partial")
}

/// Locate a rendered `page_N-*.png` in `out_dir`.
///
/// Returns the lexicographically first match, or `None` when the page has
/// not been rendered.
pub fn find_rendered_page(out_dir: &Path, page: usize) -> Result<Option<PathBuf>, Pdf2MdError> {
    Ok(find_with_prefix(out_dir, &page_prefix(page))?.into_iter().next())
}

fn find_with_prefix(out_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, Pdf2MdError> {
    let pattern = format!(
        "{}/{}-*.png",
        glob::Pattern::escape(&out_dir.to_string_lossy()),
        prefix
    );
    let paths = glob::glob(&pattern)
        .map_err(|e| Pdf2MdError::Internal(format!("bad glob pattern '{pattern}': {e}")))?;

    let mut matches: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
    matches.sort();
    Ok(matches)
}

/// `true` when `path` starts with a PNG header that decodes to a non-empty
/// image.
fn is_usable_png(path: &Path) -> bool {
    image::ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .ok()
        .and_then(|r| r.into_dimensions().ok())
        .is_some_and(|(w, h)| w > 0 && h > 0)
}

async fn remove_files(paths: &[PathBuf]) -> Result<(), Pdf2MdError> {
    for path in paths {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| Pdf2MdError::WorkDir {
                path: path.clone(),
                source: e,
            })?;
    }
    Ok(())
}

/// Rasteriser backed by poppler's `pdftocairo`.
#[derive(Debug, Clone)]
pub struct PdftocairoRasterizer {
    program: PathBuf,
    dpi: u32,
    scale_to: Option<u32>,
    timeout: Duration,
}

impl PdftocairoRasterizer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            dpi: 150,
            scale_to: None,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            program: config.pdftocairo_path.clone(),
            dpi: config.dpi,
            scale_to: config.max_rendered_pixels,
            timeout: Duration::from_secs(config.render_timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments for rendering exactly `page` to `<out_dir>/page_N.partial`.
    fn args(&self, pdf_path: &Path, page: usize, out_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-png".into(), "-r".into(), self.dpi.to_string().into()];
        if let Some(px) = self.scale_to {
            args.push("-scale-to".into());
            args.push(px.to_string().into());
        }
        args.extend([
            "-f".into(),
            page.to_string().into(),
            "-l".into(),
            page.to_string().into(),
            pdf_path.as_os_str().to_os_string(),
            out_dir.join(partial_prefix(page)).into_os_string(),
        ]);
        args
    }
}

#[async_trait]
impl PageRasterizer for PdftocairoRasterizer {
    async fn rasterize(
        &self,
        pdf_path: &Path,
        page: usize,
        out_dir: &Path,
    ) -> Result<PathBuf, Pdf2MdError> {
        let existing = find_with_prefix(out_dir, &page_prefix(page))?;
        if let Some(first) = existing.first() {
            let path = first.clone();
            let usable = tokio::task::spawn_blocking(move || is_usable_png(&path))
                .await
                .map_err(|e| Pdf2MdError::Internal(format!("image check panicked: {e}")))?;
            if usable {
                debug!("Page {} already rendered: {}", page, first.display());
                return Ok(first.clone());
            }
            warn!(
                "Page {} image {} is unreadable; rendering again",
                page,
                first.display()
            );
            remove_files(&existing).await?;
        }
        remove_files(&find_with_prefix(out_dir, &partial_prefix(page))?).await?;

        let args = self.args(pdf_path, page, out_dir);
        info!(
            "Running command: {} {}",
            self.program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| Pdf2MdError::RenderingFailed {
                page,
                detail: format!(
                    "{} timed out after {}s",
                    self.program.display(),
                    self.timeout.as_secs()
                ),
            })?
            .map_err(|e| Pdf2MdError::RenderingFailed {
                page,
                detail: format!("failed to run {}: {}", self.program.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Pdf2MdError::RenderingFailed {
                page,
                detail: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    stderr.trim()
                ),
            });
        }

        let partial = find_with_prefix(out_dir, &partial_prefix(page))?
            .into_iter()
            .next()
            .ok_or_else(|| Pdf2MdError::MissingRenderOutput {
                page,
                dir: out_dir.to_path_buf(),
            })?;
        let file_name = partial
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suffix = file_name
            .strip_prefix(&partial_prefix(page))
            .unwrap_or("-1.png");
        let png = out_dir.join(format!("{}{}", page_prefix(page), suffix));
        tokio::fs::rename(&partial, &png)
            .await
            .map_err(|e| Pdf2MdError::WorkDir {
                path: png.clone(),
                source: e,
            })?;
        info!("Using generated PNG file: {}", png.display());
        Ok(png)
    }
}
