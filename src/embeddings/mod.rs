// Embeddings module
// Embedding service clients and optional document splitting

pub mod ollama;
pub mod openai;
pub mod splitter;


use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{ConfigError, EmbeddingConfig, Provider};
use crate::service::ServiceError;

pub use ollama::OllamaClient;
pub use openai::OpenAiEmbedder;
pub use splitter::{SplitterConfig, TextSplitter, estimate_token_count};

/// A remote embedding model. Every vector one embedder returns has the same
/// dimension; `model_id` is what the index manifest records.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier of provider and model, e.g. `ollama/nomic-embed-text:latest`
    fn model_id(&self) -> &str;

    /// Embed several texts, returning one vector per input in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;

    /// Embed a single query string
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ServiceError::InvalidResponse("no embedding returned".to_string()))
    }
}

/// Build the embedder described by the configuration
#[inline]
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, ConfigError> {
    Ok(match config.provider {
        Provider::Ollama => Arc::new(OllamaClient::new(config)?),
        Provider::OpenAi => Arc::new(OpenAiEmbedder::new(config)?),
    })
}

/// Check that a service answered with one vector per input
pub(crate) fn expect_count(
    vectors: Vec<Vec<f32>>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ServiceError> {
    if vectors.len() == expected {
        Ok(vectors)
    } else {
        Err(ServiceError::InvalidResponse(format!(
            "Mismatch between request and response counts: {} vs {}",
            expected,
            vectors.len()
        )))
    }
}
