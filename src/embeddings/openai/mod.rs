#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{Embedder, expect_count};
use crate::config::{ConfigError, EmbeddingConfig};
use crate::service::{self, RetryPolicy, ServiceError};

/// Embedding client for OpenAI-compatible `/embeddings` endpoints
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    embeddings_url: Url,
    model: String,
    model_id: String,
    batch_size: u32,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            embeddings_url: config.endpoint_url("embeddings")?,
            model: config.model.clone(),
            model_id: format!("openai/{}", config.model),
            batch_size: config.batch_size.max(1),
            api_key: service::api_key_from_env(config.api_key_env.as_deref()),
            agent: service::build_agent(config.timeout(), None),
            retry: RetryPolicy::new(config.retry_attempts),
        })
    }

    #[inline]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut results = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size as usize) {
            let request_json = serde_json::to_string(&EmbeddingsRequest {
                model: &self.model,
                input: chunk,
            })?;

            let response_text = self.retry.run("OpenAI embedding", || {
                service::post_json(
                    &self.agent,
                    self.embeddings_url.as_str(),
                    &request_json,
                    self.api_key.as_deref(),
                )
            })?;

            let mut response: EmbeddingsResponse = serde_json::from_str(&response_text)?;
            // The API may return entries out of order
            response.data.sort_by_key(|d| d.index);
            let vectors = response.data.into_iter().map(|d| d.embedding).collect();
            results.extend(expect_count(vectors, chunk.len())?);
        }

        debug!("Generated {} embeddings via {}", results.len(), self.model_id);
        Ok(results)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.clone();
        let texts = texts.to_vec();
        service::run_blocking(move || client.generate_embeddings_batch(&texts)).await
    }
}
