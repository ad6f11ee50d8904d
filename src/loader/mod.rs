//! Turns local files and web pages into [`Document`]s.
//!
//! One failing input never aborts a batch: failures and unsupported files
//! are collected into the [`LoadReport`] next to the documents that loaded.

pub mod pdf;
pub mod web;


use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::service::ServiceError;

pub use web::{ExtractedPage, WebLoader, extract_visible_text, validate_url};

/// Metadata key holding the file path or URL a document came from
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding the 0-based PDF page number
pub const PAGE_KEY: &str = "page";
/// Metadata key holding a web page's title
pub const TITLE_KEY: &str = "title";

/// Text plus metadata, immutable once loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    #[inline]
    pub fn new(text: impl Into<String>, metadata: BTreeMap<String, String>) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// Document whose only metadata is its source
    #[inline]
    pub fn from_source(text: impl Into<String>, source: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(SOURCE_KEY.to_string(), source.into());
        Self::new(text, metadata)
    }

    #[inline]
    pub fn source(&self) -> &str {
        self.metadata.get(SOURCE_KEY).map_or("", String::as_str)
    }

    #[inline]
    pub fn page(&self) -> Option<u32> {
        self.metadata.get(PAGE_KEY).and_then(|p| p.parse().ok())
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse PDF {path}: {message}")]
    Pdf { path: PathBuf, message: String },
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: ServiceError,
    },
    #[error("no visible text at {0}")]
    EmptyPage(String),
}

/// Which parser handles a file, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Text,
}

impl FileKind {
    /// Case-insensitive extension match; `None` for unsupported files
    #[inline]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }
}

/// An input that could not be loaded and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub failures: Vec<LoadFailure>,
    pub skipped: Vec<PathBuf>,
}

impl LoadReport {
    fn record_failure(&mut self, source: impl Into<String>, error: &LoadError) {
        let source = source.into();
        warn!("Failed to load {}: {}", source, error);
        self.failures.push(LoadFailure {
            source,
            error: error.to_string(),
        });
    }
}

/// Load one local file. Returns `Ok(None)` when the extension is unsupported.
pub fn load_file(path: &Path) -> Result<Option<Vec<Document>>, LoadError> {
    match FileKind::from_path(path) {
        Some(FileKind::Pdf) => pdf::load_pdf(path).map(Some),
        Some(FileKind::Text) => load_text(path).map(|doc| Some(vec![doc])),
        None => Ok(None),
    }
}

fn load_text(path: &Path) -> Result<Document, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    debug!("Read {} bytes of text from {}", text.len(), path.display());
    Ok(Document::from_source(text, path.display().to_string()))
}

#[derive(Debug, Clone)]
pub struct DocumentLoader {
    web: WebLoader,
}

impl DocumentLoader {
    #[inline]
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            web: WebLoader::new(config),
        }
    }

    #[inline]
    pub fn with_web_loader(web: WebLoader) -> Self {
        Self { web }
    }

    /// Load files first, in order, then links, in order
    pub async fn load(&self, files: &[PathBuf], links: &[String]) -> LoadReport {
        let files = files.to_vec();
        let mut report = tokio::task::spawn_blocking(move || load_files(&files))
            .await
            .unwrap_or_else(|e| {
                let mut report = LoadReport::default();
                report.failures.push(LoadFailure {
                    source: "files".to_string(),
                    error: format!("file loading task failed: {e}"),
                });
                report
            });

        for link in links {
            match self.web.load_url(link).await {
                Ok(document) => report.documents.push(document),
                Err(e) => report.record_failure(link.as_str(), &e),
            }
        }

        info!(
            "Loaded {} documents ({} failures, {} skipped)",
            report.documents.len(),
            report.failures.len(),
            report.skipped.len()
        );
        report
    }
}

/// Load local files synchronously, collecting failures instead of stopping
pub fn load_files(files: &[PathBuf]) -> LoadReport {
    let mut report = LoadReport::default();

    for path in files {
        match load_file(path) {
            Ok(Some(documents)) => {
                debug!("{} produced {} documents", path.display(), documents.len());
                report.documents.extend(documents);
            }
            Ok(None) => {
                warn!("Skipping unsupported file type: {}", path.display());
                report.skipped.push(path.clone());
            }
            Err(e) => report.record_failure(path.display().to_string(), &e),
        }
    }

    report
}
