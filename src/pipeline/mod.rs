//! Per-page pipeline stages.
//!
//! ```text
//! render ──▶ extract ──▶ encode ──▶ llm ──▶ postprocess
//! (PNG)      (text,      (base64)   (VLM)   (fences, footers,
//!             tables)                         assembly)
//! ```
//!
//! 1. [`render`]: rasterise one page with `pdftocairo`; reuses an
//!    existing image
//! 2. [`extract`]: text layer via pdfium, tables via camelot; failures
//!    degrade to empty strings
//! 3. [`encode`]: load the PNG and base64-wrap it for the request body
//! 4. [`llm`]: one vision call per page; the only network I/O
//! 5. [`postprocess`]: clean each description and join the pages
//!
//! Stages 1, 2 and 4 sit behind traits ([`render::PageRasterizer`],
//! [`extract::PdfReader`], [`extract::TableExtractor`],
//! [`llm::PageDescriber`]) so a [`crate::Converter`] can run on fakes.

pub mod encode;
pub mod extract;
pub mod llm;
pub mod postprocess;
pub mod render;
