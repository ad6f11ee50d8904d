#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::stream::{ChatStream, LineEvent, pump_lines};
use super::{ChatModel, ChatRequest, CredentialStatus, Message};
use crate::config::{ConfigError, LlmConfig};
use crate::service::{self, RetryPolicy, ServiceError};

/// Chat client for Ollama's `/api/chat`, streaming newline-delimited JSON
#[derive(Debug, Clone)]
pub struct OllamaChat {
    chat_url: Url,
    tags_url: Url,
    model: String,
    model_id: String,
    options: ChatOptions,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct ChatOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChat {
    #[inline]
    pub fn new(config: &LlmConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            chat_url: config.endpoint_url("api/chat")?,
            tags_url: config.endpoint_url("api/tags")?,
            model: config.model.clone(),
            model_id: format!("ollama/{}", config.model),
            options: ChatOptions {
                temperature: config.temperature,
                top_p: config.top_p,
            },
            api_key: service::api_key_from_env(config.api_key_env.as_deref()),
            agent: service::build_agent(config.timeout(), None),
            retry: RetryPolicy::new(config.max_retries.saturating_add(1)),
        })
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> Result<String, ServiceError> {
        Ok(serde_json::to_string(&OllamaChatRequest {
            model: &self.model,
            messages: &request.messages,
            stream,
            options: self.options,
        })?)
    }

    fn complete_blocking(&self, request: &ChatRequest) -> Result<String, ServiceError> {
        let body = self.request_body(request, false)?;
        let key = request.effective_key(self.api_key.as_deref());

        let response_text = self.retry.run("Ollama chat", || {
            service::post_json(&self.agent, self.chat_url.as_str(), &body, key)
        })?;

        let response: OllamaChatResponse = serde_json::from_str(&response_text)?;
        if let Some(error) = response.error {
            return Err(ServiceError::InvalidResponse(error));
        }

        let content = response.message.map(|m| m.content).unwrap_or_default();
        debug!("Ollama returned {} characters", content.len());
        Ok(content)
    }
}

/// Interpret one NDJSON line of a streamed chat response
pub(crate) fn parse_stream_line(line: &str) -> Result<LineEvent, ServiceError> {
    let response: OllamaChatResponse = serde_json::from_str(line)?;

    if let Some(error) = response.error {
        return Err(ServiceError::InvalidResponse(error));
    }

    if response.done {
        return Ok(LineEvent::Done);
    }

    Ok(response
        .message
        .map_or(LineEvent::Skip, |m| LineEvent::Chunk(m.content)))
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, ServiceError> {
        let client = self.clone();
        service::run_blocking(move || client.complete_blocking(&request)).await
    }

    fn stream(&self, request: ChatRequest) -> ChatStream {
        let client = self.clone();

        ChatStream::from_blocking(move |sender| {
            let body = client.request_body(&request, true)?;
            let key = request.effective_key(client.api_key.as_deref());

            let reader = client.retry.run("Ollama chat stream", || {
                service::post_json_streaming(&client.agent, client.chat_url.as_str(), &body, key)
            })?;

            pump_lines(reader, sender, parse_stream_line)?.require_done()
        })
    }

    async fn check_credentials(&self, api_key: Option<String>) -> CredentialStatus {
        let agent = self.agent.clone();
        let url = self.tags_url.to_string();
        let key = api_key.or_else(|| self.api_key.clone());

        let checked = service::run_blocking(move || {
            service::get_text(&agent, &url, key.as_deref()).map(|_| ())
        })
        .await;

        let status = CredentialStatus::from_check(checked);
        info!("Ollama credential check: {:?}", status);
        status
    }
}
