//! Incremental model output delivered over a bounded channel.
//!
//! The producer runs on tokio's blocking pool and pushes text chunks through
//! a [`ChunkSender`]; the caller polls the [`ChatStream`]. Cancelling or
//! dropping the stream makes the next send fail, which ends the producer
//! and closes its HTTP response.


use futures::Stream;
use std::io::BufRead;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

use crate::service::ServiceError;

const CHANNEL_CAPACITY: usize = 32;

pub type ChunkResult = Result<String, ServiceError>;

#[derive(Debug)]
pub struct ChatStream {
    receiver: mpsc::Receiver<ChunkResult>,
    cancelled: Arc<AtomicBool>,
}

/// Producer half of a [`ChatStream`]
#[derive(Debug, Clone)]
pub struct ChunkSender {
    sender: mpsc::Sender<ChunkResult>,
    cancelled: Arc<AtomicBool>,
}

/// What one line of a streamed response contributed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Chunk(String),
    Skip,
    Done,
}

impl ChatStream {
    pub fn channel() -> (ChunkSender, Self) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            ChunkSender {
                sender,
                cancelled: Arc::clone(&cancelled),
            },
            Self {
                receiver,
                cancelled,
            },
        )
    }

    /// Run `producer` on the blocking pool. An error it returns becomes the
    /// final item of the stream.
    pub fn from_blocking<F>(producer: F) -> Self
    where
        F: FnOnce(&ChunkSender) -> Result<(), ServiceError> + Send + 'static,
    {
        let (sender, stream) = Self::channel();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = producer(&sender) {
                if !sender.is_cancelled() {
                    let _ = sender.sender.blocking_send(Err(e));
                }
            }
        });

        stream
    }

    /// A stream that yields a single error
    pub fn failed(error: ServiceError) -> Self {
        let (sender, stream) = Self::channel();
        let _ = sender.sender.try_send(Err(error));
        stream
    }

    /// Stop the producer; chunks already buffered are dropped
    pub fn cancel(&mut self) {
        debug!("Chat stream cancelled");
        self.cancelled.store(true, Ordering::SeqCst);
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Receive the next chunk, or `None` once the response is complete
    pub async fn next_chunk(&mut self) -> Option<ChunkResult> {
        self.receiver.recv().await
    }

    /// Drain the stream into one string. Any error discards the partial text.
    pub async fn collect_text(mut self) -> Result<String, ServiceError> {
        let mut text = String::new();
        while let Some(chunk) = self.next_chunk().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

impl Stream for ChatStream {
    type Item = ChunkResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl ChunkSender {
    /// Blocking send of one chunk; fails with `Cancelled` once the stream is gone
    pub fn send(&self, chunk: String) -> Result<(), ServiceError> {
        if self.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        self.sender
            .blocking_send(Ok(chunk))
            .map_err(|_| ServiceError::Cancelled)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.sender.is_closed()
    }
}

/// How a streamed body ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// A line reported [`LineEvent::Done`]
    Done,
    /// The body ran out first
    Eof,
}

impl StreamEnd {
    /// Treat a body that ran out without a completion marker as a failure
    #[inline]
    pub fn require_done(self) -> Result<(), ServiceError> {
        match self {
            Self::Done => Ok(()),
            Self::Eof => Err(ServiceError::InvalidResponse(
                "stream ended before the response was complete".to_string(),
            )),
        }
    }
}

/// Forward a line-oriented streamed body to `sender`, parsing each line with
/// `parse`, until a line reports [`LineEvent::Done`] or the body ends.
pub fn pump_lines<R, F>(reader: R, sender: &ChunkSender, mut parse: F) -> Result<StreamEnd, ServiceError>
where
    R: BufRead,
    F: FnMut(&str) -> Result<LineEvent, ServiceError>,
{
    for line in reader.lines() {
        if sender.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let line = line.map_err(|e| ServiceError::Connection(e.to_string()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse(line)? {
            LineEvent::Chunk(text) if text.is_empty() => {}
            LineEvent::Chunk(text) => sender.send(text)?,
            LineEvent::Skip => {}
            LineEvent::Done => return Ok(StreamEnd::Done),
        }
    }

    Ok(StreamEnd::Eof)
}
