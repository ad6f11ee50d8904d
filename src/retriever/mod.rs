#[cfg(test)]
mod tests;

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::embeddings::Embedder;
use crate::index::{DocumentIndex, IndexError, SearchHit};
use crate::loader::Document;
use crate::service::ServiceError;

pub const DEFAULT_TOP_K: usize = 4;

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("failed to embed query: {0}")]
    Embedding(#[from] ServiceError),
    #[error("query vector has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("index error: {0}")]
    Index(IndexError),
}

impl From<IndexError> for RetrieveError {
    #[inline]
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::Index(other),
        }
    }
}

/// Maps a query to the most similar stored documents
#[derive(Clone)]
pub struct Retriever {
    index: Arc<DocumentIndex>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("index", &self.index)
            .field("embedder", &self.embedder.model_id())
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl Retriever {
    #[inline]
    pub fn new(index: Arc<DocumentIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            top_k: DEFAULT_TOP_K,
        }
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    #[inline]
    pub fn index(&self) -> &DocumentIndex {
        &self.index
    }

    /// Top-k documents for `query`, most similar first
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Document>, RetrieveError> {
        Ok(self
            .retrieve_with_scores(query)
            .await?
            .into_iter()
            .map(|hit| hit.document)
            .collect())
    }

    /// Like [`Retriever::retrieve`], keeping each hit's distance
    pub async fn retrieve_with_scores(&self, query: &str) -> Result<Vec<SearchHit>, RetrieveError> {
        if self.index.is_empty() {
            debug!("Index is empty, nothing to retrieve");
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query).await?;
        let hits = self.index.search(&query_vector, self.top_k).await?;

        debug!("Retrieved {} documents for query", hits.len());
        Ok(hits)
    }
}
