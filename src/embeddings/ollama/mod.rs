#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::{Embedder, expect_count};
use crate::config::{ConfigError, EmbeddingConfig};
use crate::service::{self, RetryPolicy, ServiceError};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    model_id: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        let base_url = config.endpoint_url("")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            model_id: format!("ollama/{}", config.model),
            batch_size: config.batch_size.max(1),
            agent: service::build_agent(config.timeout(), None),
            retry: RetryPolicy::new(config.retry_attempts),
        })
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<(), ServiceError> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models()?;

        if models.iter().any(|m| m.name == self.model) {
            info!(
                "Health check passed for Ollama server at {} with model {}",
                self.base_url, self.model
            );
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(ServiceError::InvalidResponse(format!(
                "Model '{}' is not available. Available models: {:?}",
                self.model, available_models
            )))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>, ServiceError> {
        let url = self.url("api/tags")?;
        debug!("Fetching available models from {}", url);

        let response_text = self
            .retry
            .run("Ollama model listing", || {
                service::get_text(&self.agent, url.as_str(), None)
            })?;

        let models_response: ModelsResponse = serde_json::from_str(&response_text)?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate embeddings for multiple texts, `batch_size` texts per request
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());

        // Process in batches to avoid overwhelming the server
        for chunk in texts.chunks(self.batch_size as usize) {
            results.extend(self.generate_embeddings_single_batch(chunk)?);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn generate_embeddings_single_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ServiceError> {
        let url = self.url("api/embed")?;
        let request_json = serde_json::to_string(&BatchEmbedRequest {
            model: &self.model,
            inputs: texts,
        })?;

        let response_text = self.retry.run("Ollama embedding", || {
            service::post_json(&self.agent, url.as_str(), &request_json, None)
        })?;

        let batch_response: BatchEmbedResponse = serde_json::from_str(&response_text)?;
        expect_count(batch_response.embeddings, texts.len())
    }

    fn url(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(path)
            .map_err(|e| ServiceError::InvalidResponse(format!("bad URL for {path}: {e}")))
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let client = self.clone();
        let texts = texts.to_vec();
        service::run_blocking(move || client.generate_embeddings_batch(&texts)).await
    }
}
