//! Streaming conversion: page results as they are produced.
//!
//! [`convert_stream`] opens the document up front (so an unreadable PDF is
//! still an immediate `Err`) and then yields one item per selected page, in
//! page order. Nothing is assembled or written to `<stem>.md`; page images
//! and cached artefacts land in the working directory as usual, so a later
//! [`crate::Converter::convert_document`] reuses them.
//!
//! Under [`PageFailurePolicy::Abort`] the stream ends after the first failed
//! page; under [`PageFailurePolicy::Skip`] it yields the error and carries on.

use crate::config::PageFailurePolicy;
use crate::convert::Converter;
use crate::error::{PageError, Pdf2MdError};
use crate::output::PageResult;
use futures::stream;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of page results.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageResult, PageError>> + Send>>;

/// Convert `pdf_path` page by page.
///
/// `output_dir` only determines the working root when
/// [`crate::ConversionConfig::work_dir`] is unset.
pub async fn convert_stream(
    converter: &Converter,
    pdf_path: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
) -> Result<PageStream, Pdf2MdError> {
    let pdf_path = pdf_path.as_ref();
    info!("Starting streaming conversion: {}", pdf_path.display());

    let work_root = converter.work_root(output_dir.as_ref());
    let (doc, _total_pages, selected) = converter.open_document(pdf_path, &work_root).await?;
    let cache = converter.cache_for(&work_root);
    let abort = converter.config().page_failure == PageFailurePolicy::Abort;

    let converter = converter.clone();
    let doc = Arc::new(doc);

    // The stop flag is checked before the next page is touched, so nothing
    // past a failed page is rendered or sent to the model under Abort.
    let pages = stream::unfold(
        (selected.into_iter(), false),
        move |(mut remaining, stopped)| {
            let converter = converter.clone();
            let doc = Arc::clone(&doc);
            let cache = Arc::clone(&cache);
            async move {
                if stopped {
                    return None;
                }
                let page = remaining.next()?;
                let item = converter
                    .process_page(&doc, page, cache.as_ref())
                    .await
                    .map(|(result, _hit)| result)
                    .map_err(|e| PageError::from_error(page, &e));
                let stop = abort && item.is_err();
                Some((item, (remaining, stop)))
            }
        },
    );

    Ok(Box::pin(pages))
}
