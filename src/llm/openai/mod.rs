
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::stream::{ChatStream, LineEvent, pump_lines};
use super::{ChatModel, ChatRequest, CredentialStatus, Message};
use crate::config::{ConfigError, LlmConfig};
use crate::service::{self, RetryPolicy, ServiceError};

/// Chat client for OpenAI-compatible `/chat/completions`, streaming server-sent events
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    completions_url: Url,
    models_url: Url,
    model: String,
    model_id: String,
    temperature: f32,
    top_p: f32,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    top_p: f32,
    stream: bool,
}

impl OpenAiChat {
    #[inline]
    pub fn new(config: &LlmConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            completions_url: config.endpoint_url("chat/completions")?,
            models_url: config.endpoint_url("models")?,
            model: config.model.clone(),
            model_id: format!("openai/{}", config.model),
            temperature: config.temperature,
            top_p: config.top_p,
            api_key: service::api_key_from_env(config.api_key_env.as_deref()),
            agent: service::build_agent(config.timeout(), None),
            retry: RetryPolicy::new(config.max_retries.saturating_add(1)),
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

    fn request_body(&self, request: &ChatRequest, stream: bool) -> Result<String, ServiceError> {
        Ok(serde_json::to_string(&CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: self.temperature,
            top_p: self.top_p,
            stream,
        })?)
    }

    fn complete_blocking(&self, request: &ChatRequest) -> Result<String, ServiceError> {
        let body = self.request_body(request, false)?;
        let key = request.effective_key(self.api_key.as_deref());

        let response_text = self.retry.run("OpenAI chat", || {
            service::post_json(&self.agent, self.completions_url.as_str(), &body, key)
        })?;

        let response: Value = serde_json::from_str(&response_text)?;
        check_error(&response)?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ServiceError::InvalidResponse("response has no message content".to_string()))?
            .to_string();

        debug!("{} returned {} characters", self.model_id, content.len());
        Ok(content)
    }
}

fn check_error(payload: &Value) -> Result<(), ServiceError> {
    match payload.get("error") {
        Some(error) if !error.is_null() => {
            let message = error["message"].as_str().map_or_else(|| error.to_string(), str::to_string);
            Err(ServiceError::InvalidResponse(message))
        }
        _ => Ok(()),
    }
}

/// Interpret one line of a server-sent event stream
pub(crate) fn parse_sse_line(line: &str, finished: &mut bool) -> Result<LineEvent, ServiceError> {
    // Comments and fields other than `data` carry nothing we use
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(LineEvent::Skip);
    };

    let data = data.trim();
    if data == "[DONE]" {
        return Ok(LineEvent::Done);
    }

    let payload: Value = serde_json::from_str(data)?;
    check_error(&payload)?;

    let choice = &payload["choices"][0];
    if choice["finish_reason"].is_string() {
        *finished = true;
    }

    Ok(choice["delta"]["content"]
        .as_str()
        .map_or(LineEvent::Skip, |content| LineEvent::Chunk(content.to_string())))
}

#[async_trait]
impl ChatModel for OpenAiChat {
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

            let reader = client.retry.run("OpenAI chat stream", || {
                service::post_json_streaming(
                    &client.agent,
                    client.completions_url.as_str(),
                    &body,
                    key,
                )
            })?;

            // Some servers close the stream after the final choice without `[DONE]`
            let mut finished = false;
            let end = pump_lines(reader, sender, |line| parse_sse_line(line, &mut finished))?;
            if finished {
                Ok(())
            } else {
                end.require_done()
            }
        })
    }

    async fn check_credentials(&self, api_key: Option<String>) -> CredentialStatus {
        let agent = self.agent.clone();
        let url = self.models_url.to_string();
        let key = api_key.or_else(|| self.api_key.clone());

        if key.is_none() {
            return CredentialStatus::Invalid("no API key configured".to_string());
        }

        let checked = service::run_blocking(move || {
            service::get_text(&agent, &url, key.as_deref()).map(|_| ())
        })
        .await;

        let status = CredentialStatus::from_check(checked);
        info!("{} credential check: {:?}", self.model_id, status);
        status
    }
}
