
use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{IndexRecord, VectorStore};
use super::{DocumentIndex, IndexError, IndexManifest, LANCE_DIR};
use crate::config::EmbeddingConfig;
use crate::embeddings::{Embedder, SplitterConfig, TextSplitter};
use crate::loader::Document;
use crate::service::ServiceError;

/// A document left out of the index and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub indexed: usize,
    pub failures: Vec<BuildFailure>,
    pub dimension: Option<usize>,
}

/// Embedding outcome per document, in input order
type BatchOutcome = Vec<Result<Vec<f32>, ServiceError>>;

/// Embeds documents and writes a complete index directory
pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    concurrency: usize,
    splitter: Option<TextSplitter>,
}

impl IndexBuilder {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self {
            embedder,
            batch_size: (config.batch_size as usize).max(1),
            concurrency: config.concurrency.max(1),
            splitter: None,
        }
    }

    /// Split documents before embedding when splitting is enabled
    #[inline]
    pub fn with_splitting(mut self, config: &SplitterConfig) -> Self {
        self.splitter = config.enabled.then(|| TextSplitter::from_config(config));
        self
    }

    /// Embed `documents` and persist them as a fresh index in `index_dir`,
    /// replacing whatever was there only once the new index is complete.
    ///
    /// Documents that fail to embed are skipped and reported. Authentication
    /// and quota failures abort the build and leave any old index untouched.
    pub async fn build(
        &self,
        documents: Vec<Document>,
        index_dir: &Path,
    ) -> Result<(DocumentIndex, BuildReport), IndexError> {
        let documents = match &self.splitter {
            Some(splitter) => splitter.split_documents(&documents),
            None => documents,
        };

        info!(
            "Building index of {} documents with {}",
            documents.len(),
            self.embedder.model_id()
        );

        let outcomes = self.embed_all(&documents).await?;
        let (records, report) = collect_records(documents, outcomes);

        let staging_dir = sibling_dir(index_dir, "building")?;
        let written = self.write_index(&staging_dir, &records, report.dimension).await;
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&staging_dir);
            return Err(e);
        }

        swap_into_place(&staging_dir, index_dir)?;

        info!(
            "Indexed {} documents ({} skipped) into {}",
            report.indexed,
            report.failures.len(),
            index_dir.display()
        );

        let index = DocumentIndex::open(index_dir, self.embedder.model_id()).await?;
        Ok((index, report))
    }

    async fn embed_all(&self, documents: &[Document]) -> Result<BatchOutcome, IndexError> {
        let batches: Vec<Vec<String>> = documents
            .chunks(self.batch_size)
            .map(|batch| batch.iter().map(|d| d.text.clone()).collect())
            .collect();

        let total = batches.len();
        let outcomes: Vec<BatchOutcome> = stream::iter(batches.into_iter().enumerate())
            .map(|(number, texts)| async move {
                debug!("Embedding batch {}/{}", number + 1, total);
                self.embed_batch(texts).await
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(outcomes.into_iter().flatten().collect())
    }

    /// Embed one batch, falling back to one request per document when the
    /// batch call fails with a recoverable error.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<BatchOutcome, ServiceError> {
        match self.embedder.embed_documents(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => Ok(vectors.into_iter().map(Ok).collect()),
            Ok(vectors) => {
                warn!(
                    "Batch returned {} vectors for {} texts, retrying one at a time",
                    vectors.len(),
                    texts.len()
                );
                self.embed_each(&texts).await
            }
            Err(e) if e.is_fatal_for_batch() => Err(e),
            Err(e) => {
                warn!("Batch embedding failed ({}), retrying one at a time", e);
                self.embed_each(&texts).await
            }
        }
    }

    async fn embed_each(&self, texts: &[String]) -> Result<BatchOutcome, ServiceError> {
        let mut outcome = Vec::with_capacity(texts.len());
        for text in texts {
            match self.embedder.embed_query(text).await {
                Err(e) if e.is_fatal_for_batch() => return Err(e),
                result => outcome.push(result),
            }
        }
        Ok(outcome)
    }

    async fn write_index(
        &self,
        dir: &Path,
        records: &[IndexRecord],
        dimension: Option<usize>,
    ) -> Result<(), IndexError> {
        fs::create_dir_all(dir)?;

        if let Some(dimension) = dimension {
            let store = VectorStore::create(&dir.join(LANCE_DIR), dimension).await?;
            store.add_records(records).await?;
        }

        IndexManifest::new(self.embedder.model_id(), dimension, records.len()).write(dir)
    }
}

/// Pair documents with their vectors in input order. The first vector fixes
/// the index dimension; later vectors of another size count as failures.
fn collect_records(
    documents: Vec<Document>,
    outcomes: BatchOutcome,
) -> (Vec<IndexRecord>, BuildReport) {
    let mut report = BuildReport::default();
    let mut records = Vec::with_capacity(documents.len());

    for (document, outcome) in documents.into_iter().zip(outcomes) {
        let vector = match outcome {
            Ok(vector) => vector,
            Err(e) => {
                report.record_failure(&document, e.to_string());
                continue;
            }
        };

        if vector.is_empty() {
            report.record_failure(&document, "service returned an empty vector".to_string());
            continue;
        }

        let expected = *report.dimension.get_or_insert(vector.len());
        if vector.len() != expected {
            report.record_failure(
                &document,
                IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                }
                .to_string(),
            );
            continue;
        }

        let position = u32::try_from(records.len()).unwrap_or(u32::MAX);
        records.push(IndexRecord {
            id: Uuid::new_v4().to_string(),
            vector,
            position,
            document,
        });
    }

    report.indexed = records.len();
    if records.is_empty() {
        report.dimension = None;
    }

    (records, report)
}

impl BuildReport {
    fn record_failure(&mut self, document: &Document, error: String) {
        warn!("Skipping {}: {}", document.source(), error);
        self.failures.push(BuildFailure {
            source: document.source().to_string(),
            error,
        });
    }
}

/// A fresh path next to `index_dir`, so the final rename stays on one filesystem
fn sibling_dir(index_dir: &Path, purpose: &str) -> Result<PathBuf, IndexError> {
    let parent = index_dir.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let name = index_dir
        .file_name()
        .map_or_else(|| "index".into(), |n| n.to_string_lossy());
    Ok(parent.join(format!(".{name}.{purpose}-{}", Uuid::new_v4().simple())))
}

fn swap_into_place(staging_dir: &Path, index_dir: &Path) -> Result<(), IndexError> {
    if index_dir.exists() {
        let retired = sibling_dir(index_dir, "retired")?;
        fs::rename(index_dir, &retired)?;

        if let Err(e) = fs::rename(staging_dir, index_dir) {
            // Restore the previous index
            let _ = fs::rename(&retired, index_dir);
            return Err(e.into());
        }

        if let Err(e) = fs::remove_dir_all(&retired) {
            warn!("Failed to remove old index {}: {}", retired.display(), e);
        }
    } else {
        fs::rename(staging_dir, index_dir)?;
    }

    debug!("Swapped new index into {}", index_dir.display());
    Ok(())
}
