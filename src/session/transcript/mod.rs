
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{Message, Role};

pub const GREETING: &str = "Hello! I am your AI assistant. How can I help you today?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub asked_at: DateTime<Utc>,
    pub question: String,
}

/// Chat messages and the question log of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub questions: Vec<QuestionRecord>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// A fresh transcript opening with the assistant greeting
    #[inline]
    pub fn new() -> Self {
        Self {
            messages: vec![Message::assistant(GREETING)],
            questions: Vec::new(),
        }
    }

    /// Log a question and append it as a user message
    pub fn record_question(&mut self, question: &str, asked_at: DateTime<Utc>) {
        self.questions.push(QuestionRecord {
            asked_at,
            question: question.to_string(),
        });
        self.messages.push(Message::user(question));
    }

    #[inline]
    pub fn record_answer(&mut self, answer: &str) {
        self.messages.push(Message::assistant(answer));
    }

    /// Drop a trailing user message that never got an answer
    pub fn discard_unanswered(&mut self) {
        if self.messages.last().is_some_and(|m| m.role == Role::User) {
            self.messages.pop();
        }
    }

    /// Empty both the chat and the question log
    #[inline]
    pub fn clear(&mut self) {
        self.messages.clear();
        self.questions.clear();
    }

    /// Messages before the most recent user question
    pub fn history_before_last_question(&self) -> &[Message] {
        let end = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or(self.messages.len());
        &self.messages[..end]
    }
}
