//! Deterministic stand-ins for the remote services, used by unit tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embeddings::Embedder;
use crate::llm::{ChatModel, ChatRequest, ChatStream, CredentialStatus};
use crate::service::ServiceError;

pub const TEST_DIMENSION: usize = 64;

/// Bag-of-words embedder: every word adds weight to a hashed bucket and
/// the result is L2-normalized, so texts sharing words land close together.
#[derive(Debug)]
pub struct HashingEmbedder {
    model_id: String,
    dimension: usize,
    poison: Option<String>,
    failure: Option<ServiceError>,
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::with_model("test/hashing")
    }

    pub fn with_model(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            dimension: TEST_DIMENSION,
            poison: None,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Fail any request containing a text with this word, with a connection error
    pub fn failing_on(mut self, word: &str) -> Self {
        self.poison = Some(word.to_lowercase());
        self
    }

    /// Fail every request with the given error
    pub fn always_failing(mut self, error: ServiceError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];

        for word in words(text) {
            let bucket = fnv1a(&word) % self.dimension as u64;
            vector[bucket as usize] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        if let Some(poison) = &self.poison {
            if texts.iter().any(|t| words(t).any(|w| &w == poison)) {
                return Err(ServiceError::Connection("connection reset".to_string()));
            }
        }

        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// How one scripted streaming call behaves
#[derive(Debug, Clone)]
pub enum StreamScript {
    Chunks(Vec<String>),
    FailAfter(Vec<String>, ServiceError),
}

impl StreamScript {
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::Chunks(chunks.iter().map(|c| (*c).to_string()).collect())
    }

    pub fn fail_after(chunks: &[&str], error: ServiceError) -> Self {
        Self::FailAfter(chunks.iter().map(|c| (*c).to_string()).collect(), error)
    }
}

/// Chat model that replays queued responses and records every request.
/// With nothing queued, streams and completions answer "ok".
#[derive(Debug, Default)]
pub struct ScriptedChatModel {
    streams: Mutex<VecDeque<StreamScript>>,
    completions: Mutex<VecDeque<Result<String, ServiceError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(self, script: StreamScript) -> Self {
        self.streams
            .lock()
            .expect("script lock poisoned")
            .push_back(script);
        self
    }

    pub fn with_completion(self, result: Result<String, ServiceError>) -> Self {
        self.completions
            .lock()
            .expect("script lock poisoned")
            .push_back(result);
        self
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
impl ChatModel for ScriptedChatModel {
    fn model_id(&self) -> &str {
        "test/scripted"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, ServiceError> {
        self.record(request);
        self.completions
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }

    fn stream(&self, request: ChatRequest) -> ChatStream {
        self.record(request);
        let script = self
            .streams
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| StreamScript::chunks(&["ok"]));

        ChatStream::from_blocking(move |sender| {
            let (chunks, failure) = match script {
                StreamScript::Chunks(chunks) => (chunks, None),
                StreamScript::FailAfter(chunks, error) => (chunks, Some(error)),
            };
            for chunk in chunks {
                sender.send(chunk)?;
            }
            failure.map_or(Ok(()), Err)
        })
    }

    async fn check_credentials(&self, _api_key: Option<String>) -> CredentialStatus {
        CredentialStatus::Valid
    }
}
