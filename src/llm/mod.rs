// Chat model clients
// Ollama and OpenAI-compatible chat completion with streaming output

pub mod ollama;
pub mod openai;
pub mod stream;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{ConfigError, LlmConfig, Provider};
use crate::service::ServiceError;

pub use ollama::OllamaChat;
pub use openai::OpenAiChat;
pub use stream::{ChatStream, ChunkSender, LineEvent, StreamEnd};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[inline]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Messages for one model call, plus an API key that overrides the client's
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub api_key: Option<String>,
}

impl ChatRequest {
    #[inline]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            api_key: None,
        }
    }

    #[inline]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// The per-call key if present, else the client's configured key
    #[inline]
    pub fn effective_key<'a>(&'a self, configured: Option<&'a str>) -> Option<&'a str> {
        self.api_key.as_deref().or(configured)
    }
}

/// Outcome of probing a chat service with a set of credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    Valid,
    Invalid(String),
    Unreachable(String),
}

impl CredentialStatus {
    /// Classify the result of a model-listing request
    #[inline]
    pub fn from_check(result: Result<(), ServiceError>) -> Self {
        match result {
            Ok(()) => Self::Valid,
            Err(e @ ServiceError::Authentication { .. }) => Self::Invalid(e.to_string()),
            Err(e) => Self::Unreachable(e.to_string()),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// A remote generative model
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Stable identifier of provider and model, e.g. `openai/gemini-2.0-flash`
    fn model_id(&self) -> &str;

    /// Whole response in one call
    async fn complete(&self, request: ChatRequest) -> Result<String, ServiceError>;

    /// Response delivered chunk by chunk
    fn stream(&self, request: ChatRequest) -> ChatStream;

    /// Probe the service's model listing with the given (or configured) key
    async fn check_credentials(&self, api_key: Option<String>) -> CredentialStatus;
}

/// Build the chat model described by the configuration
#[inline]
pub fn build_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>, ConfigError> {
    Ok(match config.provider {
        Provider::Ollama => Arc::new(OllamaChat::new(config)?),
        Provider::OpenAi => Arc::new(OpenAiChat::new(config)?),
    })
}
