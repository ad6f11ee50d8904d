//! Turns a question, retrieved documents and the chat history into a model
//! call, and delivers the answer as it streams.
//!
//! Every model goes through the same retrieve-then-prompt path; only the
//! configured [`PromptStyle`] changes the prompt wording.


use itertools::Itertools;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, PromptStyle};
use crate::embeddings::estimate_token_count;
use crate::llm::{ChatModel, ChatRequest, ChatStream, Message};
use crate::loader::Document;
use crate::retriever::Retriever;
use crate::service::ServiceError;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("prompt needs about {estimated} tokens, limit is {limit}")]
    ContextTooLarge { estimated: usize, limit: usize },
    #[error("model call failed: {0}")]
    Model(#[from] ServiceError),
}

/// A prompt ready to send, and whether retrieved context went into it
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub request: ChatRequest,
    pub grounded: bool,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub grounded: bool,
    /// Distinct sources of the retrieved documents, in retrieval order
    pub sources: Vec<String>,
    /// The streamed call failed and the text came from a single retry call
    pub fallback_used: bool,
}

/// Progress reported while an answer streams in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerEvent<'a> {
    Chunk(&'a str),
    /// Streaming failed; text delivered so far is void and a full answer follows
    Restart,
}

/// Join retrieved documents into one context block, in retrieval order
#[inline]
pub fn compose_context(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|document| document.text.as_str())
        .join("\n\n")
}

/// Fill the template for `style` with context and question
#[inline]
pub fn build_prompt(style: PromptStyle, context: &str, question: &str) -> String {
    match style {
        PromptStyle::Instruction => format!(
            "Based on the retrieved information: {context} Answer the following question: {question}"
        ),
        PromptStyle::RetrievalQa => format!(
            "Use the following pieces of context to answer the question at the end. \
             If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
             {context}\n\nQuestion: {question}\nHelpful Answer:"
        ),
    }
}

pub struct AnswerComposer {
    model: Arc<dyn ChatModel>,
    prompt_style: PromptStyle,
    max_context_tokens: usize,
}

impl AnswerComposer {
    #[inline]
    pub fn new(model: Arc<dyn ChatModel>, config: &LlmConfig) -> Self {
        Self {
            model,
            prompt_style: config.prompt_style,
            max_context_tokens: config.max_context_tokens,
        }
    }

    #[inline]
    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Retrieve context and build the request. Without usable context the
    /// request carries the previous conversation turn and the bare question.
    pub async fn prepare(
        &self,
        question: &str,
        retriever: Option<&Retriever>,
        history: &[Message],
        api_key: Option<String>,
    ) -> Result<PreparedPrompt, ComposeError> {
        let documents = match retriever {
            Some(retriever) => match retriever.retrieve(question).await {
                Ok(documents) => documents,
                Err(e) => {
                    warn!("Retrieval failed, answering without documents: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let prepared = if documents.is_empty() {
            debug!("No retrieved context, using ungrounded prompt");
            let mut messages: Vec<Message> = history.last().cloned().into_iter().collect();
            messages.push(Message::user(question));
            PreparedPrompt {
                request: ChatRequest::new(messages),
                grounded: false,
                sources: Vec::new(),
            }
        } else {
            let context = compose_context(&documents);
            let prompt = build_prompt(self.prompt_style, &context, question);
            PreparedPrompt {
                request: ChatRequest::new(vec![Message::user(prompt)]),
                grounded: true,
                sources: distinct_sources(&documents),
            }
        };

        self.check_size(&prepared.request)?;

        Ok(PreparedPrompt {
            request: prepared.request.with_api_key(api_key),
            ..prepared
        })
    }

    fn check_size(&self, request: &ChatRequest) -> Result<(), ComposeError> {
        let estimated: usize = request
            .messages
            .iter()
            .map(|message| estimate_token_count(&message.content))
            .sum();

        if estimated > self.max_context_tokens {
            return Err(ComposeError::ContextTooLarge {
                estimated,
                limit: self.max_context_tokens,
            });
        }
        Ok(())
    }

    /// Start streaming the model's answer to a prepared prompt
    #[inline]
    pub fn stream(&self, prepared: &PreparedPrompt) -> ChatStream {
        self.model.stream(prepared.request.clone())
    }

    /// Stream the answer through `on_event`. If the stream fails part way,
    /// the partial text is dropped and one non-streaming call is made.
    pub async fn respond<F>(&self, prepared: PreparedPrompt, mut on_event: F) -> Result<Answer, ComposeError>
    where
        F: FnMut(AnswerEvent<'_>),
    {
        let mut stream = self.stream(&prepared);
        let mut text = String::new();
        let mut failure = None;

        while let Some(chunk) = stream.next_chunk().await {
            match chunk {
                Ok(chunk) => {
                    on_event(AnswerEvent::Chunk(&chunk));
                    text.push_str(&chunk);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        drop(stream);

        let Some(error) = failure else {
            info!("Streamed {} characters from {}", text.len(), self.model_id());
            return Ok(Answer {
                text,
                grounded: prepared.grounded,
                sources: prepared.sources,
                fallback_used: false,
            });
        };

        warn!(
            "Streaming failed after {} characters ({}), retrying without streaming",
            text.len(),
            error
        );
        on_event(AnswerEvent::Restart);

        let text = self.model.complete(prepared.request).await?;
        on_event(AnswerEvent::Chunk(&text));

        Ok(Answer {
            text,
            grounded: prepared.grounded,
            sources: prepared.sources,
            fallback_used: true,
        })
    }

    /// Prepare and respond in one step
    pub async fn answer<F>(
        &self,
        question: &str,
        retriever: Option<&Retriever>,
        history: &[Message],
        api_key: Option<String>,
        on_event: F,
    ) -> Result<Answer, ComposeError>
    where
        F: FnMut(AnswerEvent<'_>),
    {
        let prepared = self.prepare(question, retriever, history, api_key).await?;
        self.respond(prepared, on_event).await
    }
}

fn distinct_sources(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .map(Document::source)
        .filter(|source| !source.is_empty())
        .unique()
        .map(str::to_string)
        .collect()
}
