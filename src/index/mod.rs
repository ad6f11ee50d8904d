//! Persisted vector index over loaded documents.
//!
//! An index directory holds `manifest.json` and a LanceDB dataset under
//! `lance/`. Indexes are only ever built whole by [`IndexBuilder`]; a rebuild
//! is written next to the old directory and swapped in when complete.

pub mod builder;
pub mod store;


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::loader::Document;
use crate::service::ServiceError;
use store::VectorStore;

pub use builder::{BuildFailure, BuildReport, IndexBuilder};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const LANCE_DIR: &str = "lance";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no index found at {0}")]
    NotFound(PathBuf),
    #[error("index was built with embedding model {found}, but {expected} is configured")]
    ModelMismatch { expected: String, found: String },
    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding failed: {0}")]
    Embedding(#[from] ServiceError),
    #[error("invalid manifest: {0}")]
    Manifest(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What an index was built from, stored beside the vectors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub model_id: String,
    /// `None` only for an index built from no documents
    pub dimension: Option<usize>,
    pub document_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    #[inline]
    pub fn new(model_id: impl Into<String>, dimension: Option<usize>, document_count: usize) -> Self {
        Self {
            version: MANIFEST_VERSION,
            model_id: model_id.into(),
            dimension,
            document_count,
            built_at: Utc::now(),
        }
    }

    pub fn read(index_dir: &Path) -> Result<Self, IndexError> {
        let path = index_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(IndexError::NotFound(index_dir.to_path_buf()));
        }

        let content = fs::read_to_string(&path)?;
        let manifest: Self =
            serde_json::from_str(&content).map_err(|e| IndexError::Manifest(e.to_string()))?;

        if manifest.version != MANIFEST_VERSION {
            return Err(IndexError::Manifest(format!(
                "unsupported manifest version {}",
                manifest.version
            )));
        }

        Ok(manifest)
    }

    pub fn write(&self, index_dir: &Path) -> Result<(), IndexError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| IndexError::Manifest(e.to_string()))?;
        fs::write(index_dir.join(MANIFEST_FILE), content)?;
        Ok(())
    }
}

/// A retrieved document and how far its vector is from the query
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    pub distance: f32,
    /// Position of the document in the build's input order
    pub position: usize,
}

/// A loaded, read-only index
pub struct DocumentIndex {
    dir: PathBuf,
    manifest: IndexManifest,
    store: Option<VectorStore>,
}

impl std::fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("dir", &self.dir)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl DocumentIndex {
    /// Load the index in `dir`, which must have been built with `model_id`
    pub async fn open(dir: &Path, model_id: &str) -> Result<Self, IndexError> {
        let manifest = IndexManifest::read(dir)?;

        if manifest.model_id != model_id {
            return Err(IndexError::ModelMismatch {
                expected: model_id.to_string(),
                found: manifest.model_id,
            });
        }

        let store = match manifest.dimension {
            Some(dimension) if manifest.document_count > 0 => {
                Some(VectorStore::open(&dir.join(LANCE_DIR), dimension).await?)
            }
            _ => None,
        };

        info!(
            "Opened index at {} ({} documents, model {})",
            dir.display(),
            manifest.document_count,
            manifest.model_id
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            store,
        })
    }

    /// Like [`DocumentIndex::open`], but a directory without an index is `Ok(None)`
    pub async fn open_if_exists(dir: &Path, model_id: &str) -> Result<Option<Self>, IndexError> {
        match Self::open(dir, model_id).await {
            Ok(index) => Ok(Some(index)),
            Err(IndexError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The `k` stored documents closest to `query_vector`, closest first.
    /// An empty index yields no hits for any query.
    pub async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let (Some(store), Some(dimension)) = (&self.store, self.manifest.dimension) else {
            debug!("Search against empty index");
            return Ok(Vec::new());
        };

        if query_vector.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: query_vector.len(),
            });
        }

        if k == 0 {
            return Ok(Vec::new());
        }

        let hits = store.search(query_vector, k).await?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchHit {
                document: hit.document,
                distance: hit.distance,
                position: hit.position as usize,
            })
            .collect())
    }

    #[inline]
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.manifest.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.manifest.document_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.manifest.document_count == 0
    }
}
