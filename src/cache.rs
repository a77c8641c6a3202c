//! Per-page artefact cache.
//!
//! Every intermediate text a page produces (extracted text, table Markdown,
//! model description) is stored under an [`ArtifactKey`]. A later run that
//! finds the key reuses the stored value verbatim instead of recomputing it,
//! which is what makes an interrupted batch resumable at page granularity.
//!
//! The policy ("compute if absent") lives in [`cached`]; the storage lives
//! behind [`ArtifactCache`]. [`FsArtifactCache`] lays entries out as
//! `<root>/<document>_pages/page_<kind>_<N>.txt`; [`MemoryArtifactCache`]
//! keeps them in a map for tests.
//!
//! Entries are written through a temporary file and renamed into place, so a
//! concurrent reader sees either no entry or a complete one. Two writers
//! racing on the same key both compute the value; the last rename wins.

use crate::error::Pdf2MdError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Kind of artefact stored for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Raw text pulled from the PDF text layer.
    Text,
    /// Extracted tables rendered as Markdown.
    Tables,
    /// The model's Markdown description of the page.
    Description,
}

impl ArtifactKind {
    fn file_stem(&self) -> &'static str {
        match self {
            ArtifactKind::Text => "page_text",
            ArtifactKind::Tables => "page_tables",
            ArtifactKind::Description => "page_description",
        }
    }
}

/// Identifies one cached artefact: document stem + 1-based page + kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub document: String,
    pub page: usize,
    pub kind: ArtifactKind,
}

impl ArtifactKey {
    pub fn new(document: impl Into<String>, page: usize, kind: ArtifactKind) -> Self {
        Self {
            document: document.into(),
            page,
            kind,
        }
    }

    /// The same document and page, another kind.
    pub fn with_kind(&self, kind: ArtifactKind) -> Self {
        Self {
            document: self.document.clone(),
            page: self.page,
            kind,
        }
    }

    /// File name of this entry inside the document's pages directory.
    pub fn file_name(&self) -> String {
        format!("{}_{}.txt", self.kind.file_stem(), self.page)
    }
}

/// Name of the per-document working subdirectory.
pub fn pages_dir_name(document: &str) -> String {
    format!("{document}_pages")
}

/// Storage for page artefacts.
#[async_trait]
pub trait ArtifactCache: Send + Sync {
    /// Return the stored value, or `None` if the key has never been stored.
    async fn load(&self, key: &ArtifactKey) -> Result<Option<String>, Pdf2MdError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn store(&self, key: &ArtifactKey, value: &str) -> Result<(), Pdf2MdError>;
}

/// A value returned by [`cached`], with whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cached {
    pub value: String,
    pub hit: bool,
}

/// Return the value stored under `key`, or run `create`, store its output
/// and return it.
///
/// `create` is not called on a hit. An error from `create` is returned
/// unchanged and nothing is stored.
pub async fn cached<F, Fut>(
    cache: &dyn ArtifactCache,
    key: &ArtifactKey,
    create: F,
) -> Result<Cached, Pdf2MdError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String, Pdf2MdError>>,
{
    if let Some(value) = cache.load(key).await? {
        debug!("{} exists, using content from there", key.file_name());
        return Ok(Cached { value, hit: true });
    }

    let value = create().await?;
    cache.store(key, &value).await?;
    debug!("{} stored", key.file_name());
    Ok(Cached { value, hit: false })
}

// ── Filesystem cache ─────────────────────────────────────────────────────

/// Cache rooted in the working directory.
#[derive(Debug, Clone)]
pub struct FsArtifactCache {
    root: PathBuf,
}

impl FsArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<document>_pages`
    pub fn pages_dir(&self, document: &str) -> PathBuf {
        self.root.join(pages_dir_name(document))
    }

    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.pages_dir(&key.document).join(key.file_name())
    }
}

#[async_trait]
impl ArtifactCache for FsArtifactCache {
    async fn load(&self, key: &ArtifactKey) -> Result<Option<String>, Pdf2MdError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Pdf2MdError::CacheIo { path, source: e }),
        }
    }

    async fn store(&self, key: &ArtifactKey, value: &str) -> Result<(), Pdf2MdError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Pdf2MdError::CacheIo {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let tmp_path = path.with_extension("txt.tmp");
        tokio::fs::write(&tmp_path, value)
            .await
            .map_err(|e| Pdf2MdError::CacheIo {
                path: tmp_path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Pdf2MdError::CacheIo { path, source: e })
    }
}

// ── In-memory cache ──────────────────────────────────────────────────────

/// Map-backed cache; nothing touches the disk.
#[derive(Debug, Default)]
pub struct MemoryArtifactCache {
    entries: Mutex<HashMap<ArtifactKey, String>>,
}

impl MemoryArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry, e.g. a description from an earlier run.
    pub fn insert(&self, key: ArtifactKey, value: impl Into<String>) {
        self.lock().insert(key, value.into());
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ArtifactKey, String>> {
        // A poisoned map is still a consistent map: every write is a single insert.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ArtifactCache for MemoryArtifactCache {
    async fn load(&self, key: &ArtifactKey) -> Result<Option<String>, Pdf2MdError> {
        Ok(self.get(key))
    }

    async fn store(&self, key: &ArtifactKey, value: &str) -> Result<(), Pdf2MdError> {
        self.insert(key.clone(), value);
        Ok(())
    }
}
