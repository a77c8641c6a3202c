//! Progress-callback trait for batch, document and page events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the converter walks a directory. The CLI uses it to drive an
//! `indicatif` progress bar; library users can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use pdf2md_vision::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     described: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, source: &str, page: usize, total_pages: usize, cached: bool) {
//!         self.described.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{source}: page {page}/{total_pages} (cached: {cached})");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     described: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the converter as it processes documents and pages.
///
/// All methods have default no-op implementations. Implementations must be
/// `Send + Sync`: with `document_concurrency > 1` events for different
/// documents arrive from different tasks.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before the first document of a directory batch.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called after the document is opened and its pages selected.
    fn on_document_start(&self, source: &str, total_pages: usize) {
        let _ = (source, total_pages);
    }

    /// Called before a page is rendered.
    fn on_page_start(&self, source: &str, page: usize, total_pages: usize) {
        let _ = (source, page, total_pages);
    }

    /// Called when a page has its description.
    ///
    /// `cached` is true when the description came from the working directory
    /// rather than a model call.
    fn on_page_complete(&self, source: &str, page: usize, total_pages: usize, cached: bool) {
        let _ = (source, page, total_pages, cached);
    }

    /// Called when a page fails.
    fn on_page_error(&self, source: &str, page: usize, total_pages: usize, error: &str) {
        let _ = (source, page, total_pages, error);
    }

    /// Called once per document with its outcome; `error` is `None` when the
    /// Markdown file was written.
    fn on_document_complete(&self, source: &str, error: Option<&str>) {
        let _ = (source, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        pages: AtomicUsize,
        cached: AtomicUsize,
        errors: AtomicUsize,
        documents: AtomicUsize,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_page_complete(&self, _source: &str, _page: usize, _total: usize, cached: bool) {
            self.pages.fetch_add(1, Ordering::SeqCst);
            if cached {
                self.cached.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_page_error(&self, _source: &str, _page: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _source: &str, _error: Option<&str>) {
            self.documents.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start("a.pdf", 3);
        cb.on_page_start("a.pdf", 1, 3);
        cb.on_page_complete("a.pdf", 1, 3, false);
        cb.on_page_error("a.pdf", 2, 3, "boom");
        cb.on_document_complete("a.pdf", Some("boom"));
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = Arc::new(TrackingCallback::default());
        let cb: ProgressCallback = tracker.clone();

        cb.on_page_complete("a.pdf", 1, 2, true);
        cb.on_page_complete("a.pdf", 2, 2, false);
        cb.on_page_error("b.pdf", 1, 1, "render failed");
        cb.on_document_complete("a.pdf", None);

        assert_eq!(tracker.pages.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.cached.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.documents.load(Ordering::SeqCst), 1);
    }
}
