// Shared doubles for the integration tests: a vocabulary embedder that needs
// no network and a chat model that streams canned text.

#![allow(dead_code, reason = "each test crate uses a different subset")]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ask_docs::embeddings::Embedder;
use ask_docs::llm::{ChatModel, ChatRequest, ChatStream, CredentialStatus};
use ask_docs::service::ServiceError;

/// One dimension per vocabulary word; words outside the vocabulary are ignored
#[derive(Debug)]
pub struct VocabularyEmbedder {
    model_id: String,
    vocabulary: Vec<String>,
}

impl VocabularyEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            model_id: "test/vocabulary".to_string(),
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    pub fn with_model(mut self, model_id: &str) -> Self {
        self.model_id = model_id.to_string();
        self
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        embed_with_vocabulary(&self.vocabulary, text)
    }
}

/// Normalized word-count vector of `text` over `vocabulary`
pub fn embed_with_vocabulary(vocabulary: &[String], text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; vocabulary.len()];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        if let Some(slot) = vocabulary.iter().position(|v| *v == word) {
            vector[slot] += 1.0;
        }
    }

    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
    vector
}

#[async_trait]
impl Embedder for VocabularyEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

/// Streams a fixed answer in the given chunks and records every request
#[derive(Debug)]
pub struct CannedChatModel {
    chunks: Vec<String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl CannedChatModel {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| (*c).to_string()).collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("request lock poisoned").clone()
    }

    fn record(&self, request: ChatRequest) {
        self.requests
            .lock()
            .expect("request lock poisoned")
            .push(request);
    }
}

#[async_trait]
impl ChatModel for CannedChatModel {
    fn model_id(&self) -> &str {
        "test/canned"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, ServiceError> {
        self.record(request);
        Ok(self.chunks.concat())
    }

    fn stream(&self, request: ChatRequest) -> ChatStream {
        self.record(request);
        let chunks = self.chunks.clone();
        ChatStream::from_blocking(move |sender| {
            for chunk in chunks {
                sender.send(chunk)?;
            }
            Ok(())
        })
    }

    async fn check_credentials(&self, _api_key: Option<String>) -> CredentialStatus {
        CredentialStatus::Valid
    }
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("should write test file");
    path
}

pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}
